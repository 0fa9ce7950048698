//! Scoped background tasks and the watch-backed views they publish into.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A background task bound to the lifetime of its owner. Dropping the scope
/// cancels the token and aborts the task; nothing it does afterwards is observable.
pub struct Scope {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scope {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(f(token.clone()));
        Self { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.token.cancel();
        self.handle.abort();
    }
}

/// The latest value published by a scoped task.
pub struct LiveQuery<T> {
    rx: watch::Receiver<T>,
    _scope: Option<Scope>,
}

impl<T: Clone> LiveQuery<T> {
    /// A value that never changes and has no task behind it.
    pub fn fixed(value: T) -> Self {
        let (_tx, rx) = watch::channel(value);
        Self { rx, _scope: None }
    }

    pub fn new(rx: watch::Receiver<T>, scope: Scope) -> Self {
        Self {
            rx,
            _scope: Some(scope),
        }
    }

    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next published value. `None` once the task has stopped.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the value satisfies `ready`, or the task stops.
    pub async fn wait_for(&mut self, ready: impl FnMut(&T) -> bool) -> T {
        let value = match self.rx.wait_for(ready).await {
            Ok(value) => Some(value.clone()),
            Err(_) => None,
        };
        value.unwrap_or_else(|| self.current())
    }
}
