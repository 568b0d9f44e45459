// src/deferred.rs

//! Deferred result handle with a progress side channel.
//!
//! A [`Deferred`] wraps one eventual outcome (`Ok(T)` or a [`Rejection`])
//! plus a multicast stream of progress payloads `P`. The producing side holds
//! a [`Settler`]:
//!
//! - `notify(p)` may be called any number of times; every listener that is
//!   registered at that moment receives `p`, in call order.
//! - `resolve(v)` / `reject(r)` settle the handle. Only the first call has an
//!   effect; later calls (and later notifications) are dropped.
//! - Listeners registered after some notifications only see future ones.
//!
//! If every clone of the settler is dropped before settling, the handle
//! rejects instead of leaving the consumer waiting forever.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Why a deferred operation failed. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Rejection {
    reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Self {
                reason: "operation failed without a reason".to_string(),
            };
        }
        Self { reason }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<String> for Rejection {
    fn from(reason: String) -> Self {
        Rejection::new(reason)
    }
}

impl From<&str> for Rejection {
    fn from(reason: &str) -> Self {
        Rejection::new(reason)
    }
}

impl From<anyhow::Error> for Rejection {
    fn from(err: anyhow::Error) -> Self {
        Rejection::new(format!("{err:#}"))
    }
}

impl From<crate::errors::StackdError> for Rejection {
    fn from(err: crate::errors::StackdError) -> Self {
        Rejection::new(err.to_string())
    }
}

pub type Outcome<T> = Result<T, Rejection>;

enum Listener<P> {
    Channel(mpsc::UnboundedSender<P>),
    Callback(Box<dyn FnMut(P) + Send>),
}

impl<P> Listener<P> {
    /// Returns false once the listener can no longer receive anything.
    fn deliver(&mut self, payload: P) -> bool {
        match self {
            Listener::Channel(tx) => tx.send(payload).is_ok(),
            Listener::Callback(f) => {
                f(payload);
                true
            }
        }
    }
}

struct Inner<T, P> {
    listeners: Vec<Listener<P>>,
    outcome_tx: Option<oneshot::Sender<Outcome<T>>>,
}

struct Shared<T, P> {
    inner: Mutex<Inner<T, P>>,
}

impl<T, P> Shared<T, P> {
    fn lock(&self) -> MutexGuard<'_, Inner<T, P>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        let mut inner = self.lock();
        match inner.outcome_tx.take() {
            Some(tx) => {
                // Closing the listener channels marks the end of progress.
                inner.listeners.clear();
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    fn add_listener(&self, listener: Listener<P>) {
        let mut inner = self.lock();
        if inner.outcome_tx.is_some() {
            inner.listeners.push(listener);
        }
    }
}

/// Rejects the deferred when the last settler clone goes away unsettled.
struct SettlerGuard<T, P> {
    shared: Arc<Shared<T, P>>,
}

impl<T, P> Drop for SettlerGuard<T, P> {
    fn drop(&mut self) {
        self.shared.settle(Err(Rejection::new(
            "producer dropped without resolving or rejecting",
        )));
    }
}

/// Producer side of a [`Deferred`].
pub struct Settler<T, P> {
    guard: Arc<SettlerGuard<T, P>>,
}

impl<T, P> Clone for Settler<T, P> {
    fn clone(&self) -> Self {
        Self {
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<T, P> fmt::Debug for Settler<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T, P: Clone> Settler<T, P> {
    /// Deliver a progress payload to every current listener.
    ///
    /// Returns false if the deferred is already settled (payload dropped).
    /// Callback listeners run while the handle is locked and must not call
    /// back into the same settler.
    pub fn notify(&self, payload: P) -> bool {
        let mut inner = self.guard.shared.lock();
        if inner.outcome_tx.is_none() {
            return false;
        }
        inner
            .listeners
            .retain_mut(|listener| listener.deliver(payload.clone()));
        true
    }
}

impl<T, P> Settler<T, P> {
    /// Settle successfully. Returns false if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.guard.shared.settle(Ok(value))
    }

    /// Settle with a failure. Returns false if already settled.
    pub fn reject(&self, reason: impl Into<Rejection>) -> bool {
        self.guard.shared.settle(Err(reason.into()))
    }

    /// Settle from a `Result`, as a convenience for `?`-heavy producers.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        self.guard.shared.settle(outcome)
    }

    pub fn is_settled(&self) -> bool {
        self.guard.shared.lock().outcome_tx.is_none()
    }
}

/// Receiving end of a progress subscription.
///
/// Yields `None` once the deferred has settled and everything sent before
/// settlement has been drained.
#[derive(Debug)]
pub struct ProgressStream<P> {
    rx: mpsc::UnboundedReceiver<P>,
}

impl<P> ProgressStream<P> {
    pub async fn recv(&mut self) -> Option<P> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<P> {
        self.rx.try_recv().ok()
    }
}

/// Consumer side: one eventual outcome plus progress notifications.
pub struct Deferred<T, P> {
    shared: Arc<Shared<T, P>>,
    outcome_rx: oneshot::Receiver<Outcome<T>>,
}

impl<T, P> fmt::Debug for Deferred<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = self.shared.lock().outcome_tx.is_none();
        f.debug_struct("Deferred")
            .field("settled", &settled)
            .finish_non_exhaustive()
    }
}

impl<T, P> Deferred<T, P>
where
    T: Send + 'static,
    P: Clone + Send + 'static,
{
    /// Create an unsettled handle and its producer.
    pub fn pair() -> (Self, Settler<T, P>) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                listeners: Vec::new(),
                outcome_tx: Some(outcome_tx),
            }),
        });
        let settler = Settler {
            guard: Arc::new(SettlerGuard {
                shared: Arc::clone(&shared),
            }),
        };
        (Self { shared, outcome_rx }, settler)
    }

    /// Run `executor` immediately with the producer side.
    ///
    /// Notifications issued synchronously inside `executor` happen before
    /// anyone can subscribe and are therefore not observed.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Settler<T, P>),
    {
        let (deferred, settler) = Self::pair();
        executor(settler);
        deferred
    }

    /// Run an async executor on the current tokio runtime.
    pub fn spawn<F, Fut>(executor: F) -> Self
    where
        F: FnOnce(Settler<T, P>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (deferred, settler) = Self::pair();
        tokio::spawn(executor(settler));
        deferred
    }

    pub fn resolved(value: T) -> Self {
        Self::new(|s| {
            s.resolve(value);
        })
    }

    pub fn rejected(reason: impl Into<Rejection>) -> Self {
        let reason = reason.into();
        Self::new(|s| {
            s.reject(reason);
        })
    }

    /// Subscribe to future progress notifications.
    pub fn progress(&self) -> ProgressStream<P> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.add_listener(Listener::Channel(tx));
        ProgressStream { rx }
    }

    /// Register a callback for future progress notifications.
    pub fn on_progress<F>(&self, f: F) -> &Self
    where
        F: FnMut(P) + Send + 'static,
    {
        self.shared.add_listener(Listener::Callback(Box::new(f)));
        self
    }

    /// Wait for settlement.
    pub async fn wait(self) -> Outcome<T> {
        match self.outcome_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Rejection::new("deferred dropped without settling")),
        }
    }

    /// Chain a terminal continuation, keeping the progress stream.
    ///
    /// Progress from `self` is re-emitted on the returned handle; once `self`
    /// settles, `f` maps its outcome to the new one.
    pub fn then<U, F>(self, f: F) -> Deferred<U, P>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<T>) -> Outcome<U> + Send + 'static,
    {
        let mut progress = self.progress();
        Deferred::spawn(move |settler| async move {
            let outcome_fut = self.wait();
            tokio::pin!(outcome_fut);

            let outcome = loop {
                tokio::select! {
                    biased;
                    Some(p) = progress.recv() => {
                        settler.notify(p);
                    }
                    outcome = &mut outcome_fut => break outcome,
                }
            };
            while let Some(p) = progress.try_recv() {
                settler.notify(p);
            }
            settler.settle(f(outcome));
        })
    }
}

impl<T, P> IntoFuture for Deferred<T, P>
where
    T: Send + 'static,
    P: Clone + Send + 'static,
{
    type Output = Outcome<T>;
    type IntoFuture = Pin<Box<dyn Future<Output = Outcome<T>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
