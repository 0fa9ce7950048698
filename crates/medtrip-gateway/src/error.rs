use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// A single-row read matched nothing. Callers usually turn this into
    /// `None` with [`crate::GatewayResultExt::optional`].
    #[error("no rows returned")]
    NoRows,

    /// The table layer rejected the operation; the message is shown to users as-is.
    #[error("{0}")]
    Database(String),

    #[error("function {name} failed: {message}")]
    Function { name: String, message: String },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway task failed: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
