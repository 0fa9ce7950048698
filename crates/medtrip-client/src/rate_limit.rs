use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::live::Scope;
use crate::notify::{Notice, Notifier};

pub const DEFAULT_LIMIT: u32 = 10;
pub const DEFAULT_WINDOW_MINUTES: u32 = 15;

/// Request counter for one endpoint, valid for `window_minutes` from `window_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub endpoint: String,
    pub request_count: u32,
    pub window_start: DateTime<Utc>,
    pub limit: u32,
    pub window_minutes: u32,
}

/// Client-side throttle for user-initiated actions.
///
/// Advisory only: it keeps honest clients from hammering an endpoint but
/// cannot stop direct calls to the gateway. Any internal failure allows the
/// action through.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, RateLimitWindow>>>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl RateLimiter {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::with_clock(notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            clock,
            notifier,
        }
    }

    /// [`check`](Self::check) with 10 requests per 15 minutes.
    pub fn check_default(&self, endpoint: &str) -> bool {
        self.check(endpoint, DEFAULT_LIMIT, DEFAULT_WINDOW_MINUTES)
    }

    /// Count one request against `endpoint`. Returns `false` (and warns the
    /// user) when the endpoint already used `limit` requests in the current window.
    pub fn check(&self, endpoint: &str, limit: u32, window_minutes: u32) -> bool {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::minutes(i64::from(window_minutes));

        let allowed = {
            let mut windows = match self.windows.lock() {
                Ok(windows) => windows,
                Err(e) => {
                    warn!("Rate limiter state poisoned, allowing {}: {}", endpoint, e);
                    return true;
                }
            };

            if let Some(window) = windows
                .get_mut(endpoint)
                .filter(|w| w.window_start > cutoff)
            {
                if window.request_count >= limit {
                    false
                } else {
                    window.request_count += 1;
                    window.limit = limit;
                    window.window_minutes = window_minutes;
                    true
                }
            } else {
                windows.insert(
                    endpoint.to_string(),
                    RateLimitWindow {
                        endpoint: endpoint.to_string(),
                        request_count: 1,
                        window_start: now,
                        limit,
                        window_minutes,
                    },
                );
                true
            }
        };

        if !allowed {
            warn!("Rate limit hit for {} ({} per {} min)", endpoint, limit, window_minutes);
            self.notifier.notify(Notice::warning(
                "Rate limit exceeded",
                format!(
                    "Too many requests. Please wait before trying again. Limit: {} requests per {} minutes.",
                    limit, window_minutes
                ),
            ));
        }

        allowed
    }

    /// The current window for `endpoint`, if one exists.
    pub fn window(&self, endpoint: &str) -> Option<RateLimitWindow> {
        self.windows.lock().ok()?.get(endpoint).cloned()
    }

    /// Forget every window, whatever its age.
    pub fn reset(&self) {
        match self.windows.lock() {
            Ok(mut windows) => windows.clear(),
            Err(e) => {
                let mut windows = e.into_inner();
                windows.clear();
                self.windows.clear_poison();
            }
        }
    }

    /// Clear all windows every `every`, at most once a second. The task stops
    /// when the returned scope is dropped.
    pub fn spawn_reset_task(&self, every: Duration) -> Scope {
        let limiter = self.clone();
        let every = every.max(Duration::from_secs(1));
        Scope::spawn(move |token| async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        limiter.reset();
                        debug!("Rate limit windows cleared");
                    }
                }
            }
        })
    }
}
