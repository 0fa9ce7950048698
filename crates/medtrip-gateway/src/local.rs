use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use medtrip_db::Database;
use medtrip_db::queries::RowChange;
use medtrip_types::events::{ChangeEvent, ChangeFilter, ChangeKind};
use medtrip_types::{Filter, Record, Select};

use crate::dispatcher::{ChangeStream, Dispatcher};
use crate::error::GatewayError;
use crate::functions::{FunctionInvoker, FunctionRegistry};
use crate::gateway::Gateway;

/// A gateway backed by a SQLite database in this process. Every successful
/// mutation is published on the change feed, one event per affected row.
#[derive(Clone)]
pub struct LocalGateway {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    functions: Arc<dyn FunctionInvoker>,
    session: Arc<RwLock<Option<Uuid>>>,
}

impl LocalGateway {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            functions: Arc::new(FunctionRegistry::new()),
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_functions(mut self, functions: impl FunctionInvoker + 'static) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sign_in(&self, user_id: Uuid) {
        if let Ok(mut session) = self.session.write() {
            *session = Some(user_id);
            info!("Signed in as {}", user_id);
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut session) = self.session.write() {
            *session = None;
        }
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                GatewayError::Internal(e.to_string())
            })?
            .map_err(|e| GatewayError::Database(format!("{:#}", e)))
    }

    fn publish(&self, table: &str, kind: ChangeKind, change: RowChange) {
        self.dispatcher.publish(ChangeEvent {
            table: table.to_string(),
            kind,
            record: change.record,
            old_record: change.old_record,
        });
    }
}

#[async_trait]
impl Gateway for LocalGateway {
    async fn select(&self, query: Select) -> Result<Vec<Record>, GatewayError> {
        self.blocking(move |db| db.select(&query)).await
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, GatewayError> {
        let name = table.to_string();
        let row = self.blocking(move |db| db.insert(&name, record)).await?;

        self.publish(
            table,
            ChangeKind::Insert,
            RowChange {
                record: row.clone(),
                old_record: None,
            },
        );
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filters: Vec<Filter>,
        patch: Record,
    ) -> Result<Vec<Record>, GatewayError> {
        let name = table.to_string();
        let changes = self
            .blocking(move |db| db.update(&name, &filters, patch))
            .await?;

        let rows = changes.iter().map(|c| c.record.clone()).collect();
        for change in changes {
            self.publish(table, ChangeKind::Update, change);
        }
        Ok(rows)
    }

    async fn delete(&self, table: &str, filters: Vec<Filter>) -> Result<Vec<Record>, GatewayError> {
        let name = table.to_string();
        let changes = self.blocking(move |db| db.delete(&name, &filters)).await?;

        let rows = changes.iter().map(|c| c.record.clone()).collect();
        for change in changes {
            self.publish(table, ChangeKind::Delete, change);
        }
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: &str,
        record: Record,
        on_conflict: &[&str],
    ) -> Result<Record, GatewayError> {
        let name = table.to_string();
        let keys: Vec<String> = on_conflict.iter().map(|k| k.to_string()).collect();
        let change = self
            .blocking(move |db| {
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                db.upsert(&name, record, &keys)
            })
            .await?;

        let row = change.record.clone();
        let kind = if change.old_record.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.publish(table, kind, change);
        Ok(row)
    }

    fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        self.dispatcher.subscribe(filter)
    }

    async fn invoke(&self, function: &str, body: Value) -> Result<Value, GatewayError> {
        self.functions.invoke(function, body).await
    }

    fn current_user(&self) -> Option<Uuid> {
        self.session.read().ok().and_then(|session| *session)
    }
}
