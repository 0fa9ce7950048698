use std::time::Duration;

use anyhow::{Context, Result};

/// Client settings. Read from `MEDTRIP_*` environment variables; a `.env`
/// file is honoured when the binary loads it first.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on any single gateway round trip.
    pub request_timeout: Duration,
    /// How often the rate limiter forgets every window.
    pub rate_limit_reset_interval: Duration,
    /// Typing flags older than this are treated as stopped.
    pub typing_stale_after: Duration,
    pub functions_url: Option<String>,
    pub functions_key: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            rate_limit_reset_interval: Duration::from_secs(60 * 60),
            typing_stale_after: Duration::from_secs(10),
            functions_url: None,
            functions_key: None,
            success_url: "http://localhost:5173/payment-success".into(),
            cancel_url: "http://localhost:5173/payment-cancelled".into(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            request_timeout: secs_var("MEDTRIP_REQUEST_TIMEOUT_SECS")?.unwrap_or(defaults.request_timeout),
            rate_limit_reset_interval: secs_var("MEDTRIP_RATE_LIMIT_RESET_MINS")?
                .map(|d| d * 60)
                .unwrap_or(defaults.rate_limit_reset_interval),
            typing_stale_after: secs_var("MEDTRIP_TYPING_STALE_SECS")?.unwrap_or(defaults.typing_stale_after),
            functions_url: std::env::var("MEDTRIP_FUNCTIONS_URL").ok(),
            functions_key: std::env::var("MEDTRIP_FUNCTIONS_KEY").ok(),
            success_url: std::env::var("MEDTRIP_SUCCESS_URL").unwrap_or(defaults.success_url),
            cancel_url: std::env::var("MEDTRIP_CANCEL_URL").unwrap_or(defaults.cancel_url),
        })
    }
}

fn secs_var(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => parse_secs(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

/// A positive whole number of seconds (or minutes, scaled by the caller).
fn parse_secs(name: &str, raw: &str) -> Result<Duration> {
    let n: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{} must be a whole number, got {:?}", name, raw))?;
    if n == 0 {
        anyhow::bail!("{} must be greater than zero", name);
    }
    Ok(Duration::from_secs(n))
}
