mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use medtrip_client::conversation::ConversationSnapshot;
use medtrip_client::notify::{LogNavigator, TracingNotifier};
use medtrip_client::{BookingService, ClientConfig, ConversationStore, RateLimiter, TypingTracker};
use medtrip_gateway::{FunctionRegistry, Gateway, HttpFunctions, LocalGateway};
use medtrip_types::api::{NewBooking, NewMessage};
use medtrip_types::models::{MessageType, Money, SenderType};
use medtrip_types::record;

use commands::{Command, HELP, Role};

const DEMO_PATIENT: Uuid = Uuid::from_u128(0x5a1e_0000_0000_4000_8000_0000_0000_0001);
const DEMO_CLINIC: Uuid = Uuid::from_u128(0x5a1e_0000_0000_4000_8000_0000_0000_0002);
const DEMO_TREATMENT: Uuid = Uuid::from_u128(0x5a1e_0000_0000_4000_8000_0000_0000_0003);
const DEMO_CONVERSATION: Uuid = Uuid::from_u128(0x5a1e_0000_0000_4000_8000_0000_0000_0004);
const DEMO_PRICE: i64 = 125_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medtrip=debug,medtrip_client=debug".into()),
        )
        .init();

    // Config
    let config = ClientConfig::from_env()?;
    let db_path = std::env::var("MEDTRIP_DB_PATH").unwrap_or_else(|_| "medtrip.db".into());

    // Init backend
    let db = medtrip_db::Database::open(&PathBuf::from(&db_path))?;
    let local = LocalGateway::new(db);
    let local = match &config.functions_url {
        Some(url) => {
            info!("Calling functions at {}", url);
            local.with_functions(HttpFunctions::new(
                url,
                config.functions_key.clone(),
                config.request_timeout,
            )?)
        }
        None => local.with_functions(demo_functions(&config)),
    };
    seed_demo(&local).await?;
    local.sign_in(DEMO_PATIENT);
    let gateway: Arc<dyn Gateway> = Arc::new(local);

    // Services
    let notifier = Arc::new(TracingNotifier);
    let limiter = RateLimiter::new(notifier.clone());
    let _reset = limiter.spawn_reset_task(config.rate_limit_reset_interval);

    let store = ConversationStore::new(gateway.clone(), limiter.clone(), notifier.clone(), &config);
    let tracker = TypingTracker::new(gateway.clone(), &config);
    let bookings = BookingService::new(
        gateway.clone(),
        limiter,
        notifier,
        Arc::new(LogNavigator),
        config.clone(),
    );

    let mut role = Role::Patient;
    let mut feed = store.subscribe(Some(DEMO_CONVERSATION));
    let mut typing = tracker.observe(Some(DEMO_CONVERSATION), identity(role).0);
    let mut shown = 0;

    println!("medtrip console ({}), type /help for commands", db_path);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match Command::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };

                let (me, sender_type) = identity(role);
                match command {
                    Command::Quit => break,
                    Command::Help => println!("{}", HELP),
                    Command::Say(content) => {
                        tracker.set_typing(DEMO_CONVERSATION, me, false);
                        let message = NewMessage {
                            conversation_id: DEMO_CONVERSATION,
                            sender_id: me,
                            sender_type,
                            content,
                            message_type: MessageType::Text,
                            attachments: Vec::new(),
                        };
                        if let Err(e) = store.send_message(message).await {
                            println!("not sent: {}", e);
                        }
                    }
                    Command::As(next) => {
                        role = next;
                        typing = tracker.observe(Some(DEMO_CONVERSATION), identity(role).0);
                        println!("speaking as {:?}", role);
                    }
                    Command::Typing(on) => tracker.set_typing(DEMO_CONVERSATION, me, on),
                    Command::Read => match store.mark_as_read(DEMO_CONVERSATION, me).await {
                        Ok(n) => println!("{} message(s) marked read", n),
                        Err(e) => println!("{}", e),
                    },
                    Command::Book => {
                        let new = NewBooking {
                            clinic_id: DEMO_CLINIC,
                            treatment_id: DEMO_TREATMENT,
                            booking_date: Utc::now() + ChronoDuration::days(30),
                            total_amount: DEMO_PRICE,
                            currency: "eur".into(),
                            notes: None,
                        };
                        match bookings.create_booking(new).await {
                            Ok(booking) => println!("booking {} created", booking.id),
                            Err(e) => println!("{}", e),
                        }
                    }
                    Command::Bookings => match bookings.list_bookings().await {
                        Ok(list) if list.is_empty() => println!("no bookings yet"),
                        Ok(list) => {
                            for b in list {
                                println!(
                                    "{}  {:?}/{:?}  {}",
                                    b.id,
                                    b.status,
                                    b.payment_status,
                                    Money::new(b.total_amount, b.currency)
                                );
                            }
                        }
                        Err(e) => println!("{}", e),
                    },
                    Command::Pay(id) => {
                        match bookings.process_payment(id, Money::new(DEMO_PRICE, "eur")).await {
                            Ok(session) => println!("checkout at {}", session.url),
                            Err(e) => println!("{}", e),
                        }
                    }
                    Command::Paid(id) => {
                        if let Err(e) = bookings.handle_payment_success(id, None).await {
                            println!("{}", e);
                        }
                    }
                    Command::Failed(id) => {
                        if let Err(e) = bookings.handle_payment_failure(id).await {
                            println!("{}", e);
                        }
                    }
                }
            }
            snapshot = feed.changed() => {
                let Some(snapshot) = snapshot else {
                    warn!("Conversation feed stopped");
                    break;
                };
                shown = print_new(&snapshot, shown);
            }
            names = typing.changed() => {
                let Some(names) = names else {
                    warn!("Typing feed stopped");
                    break;
                };
                if !names.is_empty() {
                    println!("  ({} typing...)", names.join(", "));
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Bye");
    Ok(())
}

fn identity(role: Role) -> (Uuid, SenderType) {
    match role {
        Role::Patient => (DEMO_PATIENT, SenderType::Patient),
        Role::Clinic => (DEMO_CLINIC, SenderType::Clinic),
    }
}

/// Print messages past the first `shown`. Returns the new count.
fn print_new(snapshot: &ConversationSnapshot, shown: usize) -> usize {
    if let Some(e) = &snapshot.error {
        println!("  (could not load messages: {})", e);
        return shown;
    }
    for m in snapshot.messages.iter().skip(shown) {
        println!(
            "[{}] {}: {}",
            m.message.created_at.format("%H:%M"),
            m.sender_name,
            m.message.content
        );
    }
    snapshot.messages.len()
}

/// Stand-in checkout when no functions endpoint is configured.
fn demo_functions(config: &ClientConfig) -> FunctionRegistry {
    let registry = FunctionRegistry::new();
    let success_url = config.success_url.clone();
    registry.register("create-checkout", move |body| {
        let booking = body
            .get("bookingId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "bookingId is required".to_string())?;
        let session = format!("cs_demo_{}", booking.replace('-', ""));
        Ok(json!({
            "url": format!("{}?session_id={}", success_url, session),
            "sessionId": session,
        }))
    });
    registry
}

async fn seed_demo(gateway: &LocalGateway) -> anyhow::Result<()> {
    let rows = [
        ("profiles", json!({ "id": DEMO_PATIENT, "full_name": "Demo Patient", "role": "patient" })),
        (
            "clinics",
            json!({ "id": DEMO_CLINIC, "name": "Demo Dental Clinic", "city": "Istanbul", "country": "TR", "is_verified": true }),
        ),
        (
            "treatments",
            json!({ "id": DEMO_TREATMENT, "clinic_id": DEMO_CLINIC, "name": "Dental implant", "price": DEMO_PRICE, "currency": "eur" }),
        ),
        (
            "conversations",
            json!({ "id": DEMO_CONVERSATION, "patient_id": DEMO_PATIENT, "clinic_id": DEMO_CLINIC, "subject": "Implant consultation" }),
        ),
    ];
    for (table, row) in rows {
        gateway.upsert(table, record(row), &["id"]).await?;
    }
    Ok(())
}
