#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use medtrip_client::ClientConfig;
use medtrip_client::notify::{ChannelNotifier, Navigator, Notice};
use medtrip_db::Database;
use medtrip_gateway::{ChangeStream, FunctionRegistry, Gateway, GatewayError, LocalGateway};
use medtrip_types::events::ChangeFilter;
use medtrip_types::{Filter, Record, Select, record};

pub const PATIENT_NAME: &str = "Ana Ruiz";
pub const CLINIC_NAME: &str = "Clinica Sol";
pub const TREATMENT_NAME: &str = "Dental implant";

/// A seeded in-memory backend: one patient, one clinic with a treatment, and
/// the conversation between them.
pub struct World {
    pub local: LocalGateway,
    pub gateway: Arc<dyn Gateway>,
    pub functions: FunctionRegistry,
    pub patient: Uuid,
    pub clinic: Uuid,
    pub treatment: Uuid,
    pub conversation: Uuid,
}

pub async fn world() -> World {
    let functions = FunctionRegistry::new();
    let local = LocalGateway::new(Database::open_in_memory().unwrap()).with_functions(functions.clone());
    seed(local, functions).await
}

async fn seed(local: LocalGateway, functions: FunctionRegistry) -> World {
    let patient = Uuid::new_v4();
    let clinic = Uuid::new_v4();
    let treatment = Uuid::new_v4();
    let conversation = Uuid::new_v4();

    local
        .insert(
            "profiles",
            record(json!({ "id": patient, "full_name": PATIENT_NAME, "email": "ana@example.com" })),
        )
        .await
        .unwrap();
    local
        .insert(
            "clinics",
            record(json!({ "id": clinic, "name": CLINIC_NAME, "city": "Istanbul", "country": "TR" })),
        )
        .await
        .unwrap();
    local
        .insert(
            "treatments",
            record(json!({
                "id": treatment,
                "clinic_id": clinic,
                "name": TREATMENT_NAME,
                "price": 125050,
                "currency": "eur",
            })),
        )
        .await
        .unwrap();
    local
        .insert(
            "conversations",
            record(json!({ "id": conversation, "patient_id": patient, "clinic_id": clinic })),
        )
        .await
        .unwrap();

    World {
        gateway: Arc::new(local.clone()),
        local,
        functions,
        patient,
        clinic,
        treatment,
        conversation,
    }
}

impl World {
    /// A second conversation between the same patient and a new clinic.
    pub async fn another_conversation(&self, clinic_name: &str) -> Uuid {
        let clinic = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        self.local
            .insert("clinics", record(json!({ "id": clinic, "name": clinic_name })))
            .await
            .unwrap();
        self.local
            .insert(
                "conversations",
                record(json!({ "id": conversation, "patient_id": self.patient, "clinic_id": clinic })),
            )
            .await
            .unwrap();
        conversation
    }

    /// Insert a message row directly, bypassing the client.
    pub async fn raw_message(&self, conversation: Uuid, sender: Uuid, sender_type: &str, content: &str) -> Uuid {
        let row = self
            .local
            .insert(
                "messages",
                record(json!({
                    "conversation_id": conversation,
                    "sender_id": sender,
                    "sender_type": sender_type,
                    "content": content,
                })),
            )
            .await
            .unwrap();
        serde_json::from_value(row["id"].clone()).unwrap()
    }

    pub async fn attach(&self, message: Uuid, file_name: &str) {
        self.local
            .insert(
                "message_attachments",
                record(json!({
                    "message_id": message,
                    "file_name": file_name,
                    "file_url": format!("https://files.example.com/{}", file_name),
                    "file_type": "application/pdf",
                    "file_size": 2048,
                })),
            )
            .await
            .unwrap();
    }

    pub fn subscribers(&self) -> usize {
        self.local.dispatcher().subscriber_count()
    }

    /// Wait until exactly `n` change streams are open.
    pub async fn wait_for_subscribers(&self, n: usize) {
        within(async {
            while self.subscribers() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
    }
}

pub fn config() -> ClientConfig {
    ClientConfig {
        request_timeout: Duration::from_secs(5),
        typing_stale_after: Duration::from_secs(10),
        ..ClientConfig::default()
    }
}

pub fn notifier() -> (Arc<ChannelNotifier>, tokio::sync::mpsc::UnboundedReceiver<Notice>) {
    let (notifier, rx) = ChannelNotifier::new();
    (Arc::new(notifier), rx)
}

/// Fail the test instead of hanging when a live view never settles.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting")
}

/// Remembers every URL it was asked to open.
#[derive(Default)]
pub struct RecordingNavigator {
    pub visited: Mutex<Vec<String>>,
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, url: &str) {
        self.visited.lock().unwrap().push(url.to_string());
    }
}

/// Wraps a gateway to slow down attachment lookups per message, fail message
/// reads, or stall upserts.
pub struct ScriptedGateway {
    inner: LocalGateway,
    attachment_delays: Mutex<HashMap<Uuid, Duration>>,
    fail_message_reads: AtomicBool,
    delayed_reads_finished: AtomicUsize,
    stall_upserts: AtomicBool,
}

impl ScriptedGateway {
    pub fn new(inner: LocalGateway) -> Self {
        Self {
            inner,
            attachment_delays: Mutex::new(HashMap::new()),
            fail_message_reads: AtomicBool::new(false),
            delayed_reads_finished: AtomicUsize::new(0),
            stall_upserts: AtomicBool::new(false),
        }
    }

    pub fn delay_attachments(&self, message: Uuid, by: Duration) {
        self.attachment_delays.lock().unwrap().insert(message, by);
    }

    pub fn fail_message_reads(&self, fail: bool) {
        self.fail_message_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every upsert hang until the caller gives up.
    pub fn stall_upserts(&self, stall: bool) {
        self.stall_upserts.store(stall, Ordering::SeqCst);
    }

    /// How many delayed attachment lookups ran to completion.
    pub fn delayed_reads_finished(&self) -> usize {
        self.delayed_reads_finished.load(Ordering::SeqCst)
    }

    fn attachment_delay(&self, query: &Select) -> Option<Duration> {
        if query.table != "message_attachments" {
            return None;
        }
        let id = query.filters.iter().find_map(|f| match f {
            Filter::Eq(column, Value::String(id)) if column == "message_id" => id.parse::<Uuid>().ok(),
            _ => None,
        })?;
        self.attachment_delays.lock().unwrap().get(&id).copied()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn select(&self, query: Select) -> Result<Vec<Record>, GatewayError> {
        if query.table == "messages" && self.fail_message_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::Database("permission denied for table messages".into()));
        }
        if let Some(delay) = self.attachment_delay(&query) {
            tokio::time::sleep(delay).await;
            let rows = self.inner.select(query).await;
            self.delayed_reads_finished.fetch_add(1, Ordering::SeqCst);
            return rows;
        }
        self.inner.select(query).await
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, GatewayError> {
        self.inner.insert(table, record).await
    }

    async fn update(&self, table: &str, filters: Vec<Filter>, patch: Record) -> Result<Vec<Record>, GatewayError> {
        self.inner.update(table, filters, patch).await
    }

    async fn delete(&self, table: &str, filters: Vec<Filter>) -> Result<Vec<Record>, GatewayError> {
        self.inner.delete(table, filters).await
    }

    async fn upsert(&self, table: &str, record: Record, on_conflict: &[&str]) -> Result<Record, GatewayError> {
        if self.stall_upserts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.upsert(table, record, on_conflict).await
    }

    fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        self.inner.subscribe(filter)
    }

    async fn invoke(&self, function: &str, body: Value) -> Result<Value, GatewayError> {
        self.inner.invoke(function, body).await
    }

    fn current_user(&self) -> Option<Uuid> {
        self.inner.current_user()
    }
}
