use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use medtrip_types::events::ChangeFilter;
use medtrip_types::{Filter, Record, Select};

use crate::dispatcher::ChangeStream;
use crate::error::GatewayError;

/// Capabilities of the hosted backend the client talks to.
///
/// Every read and write is a single remote call; nothing here caches.
/// Change streams are at-least-once "something changed" signals, not diffs.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn select(&self, query: Select) -> Result<Vec<Record>, GatewayError>;

    /// Exactly one row, or [`GatewayError::NoRows`].
    async fn single(&self, query: Select) -> Result<Record, GatewayError> {
        self.select(query.limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or(GatewayError::NoRows)
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, GatewayError>;

    async fn update(
        &self,
        table: &str,
        filters: Vec<Filter>,
        patch: Record,
    ) -> Result<Vec<Record>, GatewayError>;

    async fn delete(&self, table: &str, filters: Vec<Filter>) -> Result<Vec<Record>, GatewayError>;

    /// Insert or overwrite the row sharing `on_conflict`'s values. Last writer wins.
    async fn upsert(
        &self,
        table: &str,
        record: Record,
        on_conflict: &[&str],
    ) -> Result<Record, GatewayError>;

    fn subscribe(&self, filter: ChangeFilter) -> ChangeStream;

    async fn invoke(&self, function: &str, body: Value) -> Result<Value, GatewayError>;

    /// The signed-in user, if any.
    fn current_user(&self) -> Option<Uuid>;
}

/// Turns the "no rows" sentinel into an empty result.
pub trait GatewayResultExt<T> {
    fn optional(self) -> Result<Option<T>, GatewayError>;
}

impl<T> GatewayResultExt<T> for Result<T, GatewayError> {
    fn optional(self) -> Result<Option<T>, GatewayError> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(GatewayError::NoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
