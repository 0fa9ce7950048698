use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use medtrip_gateway::GatewayError;
use medtrip_types::Record;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Gateway failures keep the gateway's own message so it can be shown verbatim.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("malformed {entity} record: {source}")]
    Decode {
        entity: &'static str,
        source: serde_json::Error,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("too many {endpoint} requests, try again later")]
    RateLimited { endpoint: String },

    #[error("you need to be signed in")]
    NotSignedIn,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Deserialize a gateway record into a model.
pub fn decode<T: DeserializeOwned>(entity: &'static str, record: Record) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(record))
        .map_err(|source| ClientError::Decode { entity, source })
}

/// Bound a gateway round trip so a stalled call cannot leave a caller waiting forever.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| ClientError::Timeout { operation, after })?
}
