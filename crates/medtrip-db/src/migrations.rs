use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id          TEXT PRIMARY KEY,
            full_name   TEXT,
            email       TEXT UNIQUE,
            role        TEXT NOT NULL DEFAULT 'patient',
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS clinics (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            city        TEXT,
            country     TEXT,
            is_verified BOOLEAN NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS treatments (
            id          TEXT PRIMARY KEY,
            clinic_id   TEXT NOT NULL REFERENCES clinics(id),
            name        TEXT NOT NULL,
            price       INTEGER NOT NULL,
            currency    TEXT NOT NULL DEFAULT 'eur',
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS bookings (
            id                  TEXT PRIMARY KEY,
            user_id             TEXT NOT NULL REFERENCES profiles(id),
            clinic_id           TEXT NOT NULL REFERENCES clinics(id),
            treatment_id        TEXT NOT NULL REFERENCES treatments(id),
            booking_date        TEXT NOT NULL,
            status              TEXT NOT NULL DEFAULT 'pending',
            payment_status      TEXT NOT NULL DEFAULT 'pending',
            total_amount        INTEGER NOT NULL,
            currency            TEXT NOT NULL,
            notes               TEXT,
            payment_session_id  TEXT,
            created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_bookings_user
            ON bookings(user_id, created_at);

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            patient_id  TEXT NOT NULL REFERENCES profiles(id),
            clinic_id   TEXT NOT NULL REFERENCES clinics(id),
            subject     TEXT,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(patient_id, clinic_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL,
            sender_type     TEXT NOT NULL,
            content         TEXT NOT NULL,
            message_type    TEXT NOT NULL DEFAULT 'text',
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            read_at         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        -- No FK on message_id: attachments are written before their message row.
        CREATE TABLE IF NOT EXISTS message_attachments (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL,
            file_name   TEXT NOT NULL,
            file_url    TEXT NOT NULL,
            file_type   TEXT NOT NULL,
            file_size   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message
            ON message_attachments(message_id);

        CREATE TABLE IF NOT EXISTS typing_status (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL,
            is_typing       BOOLEAN NOT NULL DEFAULT 0,
            updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (conversation_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
