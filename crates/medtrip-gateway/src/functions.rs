use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use medtrip_types::api::FunctionErrorBody;

use crate::error::GatewayError;

/// Invokes named serverless functions with a JSON body.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, name: &str, body: Value) -> Result<Value, GatewayError>;
}

/// Calls functions hosted at `{base_url}/{name}` over HTTPS.
pub struct HttpFunctions {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpFunctions {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl FunctionInvoker for HttpFunctions {
    async fn invoke(&self, name: &str, body: Value) -> Result<Value, GatewayError> {
        let url = format!("{}/{}", self.base_url, name);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(status = %status, function = name, "function response received");

        let text = response.text().await?;
        if !status.is_success() {
            let message = match serde_json::from_str::<FunctionErrorBody>(&text) {
                Ok(body) => body.error,
                Err(_) if text.is_empty() => format!("HTTP {}", status),
                Err(_) => text,
            };
            warn!("Function {} returned {}: {}", name, status, message);
            return Err(GatewayError::Function {
                name: name.to_string(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| GatewayError::Function {
            name: name.to_string(),
            message: format!("invalid JSON response: {e}"),
        })
    }
}

type Handler = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// In-process functions, keyed by name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(name.to_string(), Arc::new(handler));
        }
    }
}

#[async_trait]
impl FunctionInvoker for FunctionRegistry {
    async fn invoke(&self, name: &str, body: Value) -> Result<Value, GatewayError> {
        let handler = self
            .handlers
            .read()
            .map_err(|e| GatewayError::Internal(format!("function registry poisoned: {e}")))?
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownFunction(name.to_string()))?;

        handler(body).map_err(|message| GatewayError::Function {
            name: name.to_string(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let registry = FunctionRegistry::new();
        registry.register("echo", Ok);
        registry.register("fail", |_| Err("card declined".to_string()));

        let out = registry.invoke("echo", json!({ "a": 1 })).await.unwrap();
        assert_eq!(out, json!({ "a": 1 }));

        match registry.invoke("fail", json!({})).await {
            Err(GatewayError::Function { name, message }) => {
                assert_eq!(name, "fail");
                assert_eq!(message, "card declined");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(matches!(
            registry.invoke("missing", json!({})).await,
            Err(GatewayError::UnknownFunction(_))
        ));
    }
}
