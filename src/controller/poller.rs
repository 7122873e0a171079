//! Resource poller
//!
//! Waits until an object satisfies a predicate, by re-reading it on a fixed
//! interval until it matches, the deadline passes or the caller cancels.
//! Objects that do not exist yet and transient API failures are treated as
//! "not ready"; any other read error and any predicate error end the wait.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::store::{ObjectKey, ObjectStore};
use crate::error::{Error, Result};

/// Interval and deadline of a wait
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollOptions {
    /// Check once right away instead of after the first interval
    pub immediate: bool,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            immediate: true,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(600),
        }
    }
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            immediate: true,
            interval,
            timeout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::ConfigError("poll interval must be positive".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::ConfigError("poll timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Sending half of a cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of a cancellation signal, cheap to clone
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl From<watch::Receiver<bool>> for CancelToken {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }
}

/// A linked handle and token
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    /// A token nobody can cancel
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; never resolves if the handle is dropped first
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// How a wait ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded,
    TimedOut,
    Cancelled,
    Failed,
}

impl PollOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Succeeded => "succeeded",
            PollOutcome::TimedOut => "timed_out",
            PollOutcome::Cancelled => "cancelled",
            PollOutcome::Failed => "failed",
        }
    }

    fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => PollOutcome::Succeeded,
            Err(Error::Timeout(..)) => PollOutcome::TimedOut,
            Err(Error::Cancelled(_)) => PollOutcome::Cancelled,
            Err(_) => PollOutcome::Failed,
        }
    }
}

/// Wait until the object at `key` exists and satisfies `predicate`
///
/// Returns the object as last read. Fails with [`Error::Timeout`] once
/// `opts.timeout` elapses and with [`Error::Cancelled`] when `cancel` fires.
pub async fn wait_for<K, S, P>(
    store: &S,
    key: &ObjectKey,
    opts: &PollOptions,
    cancel: &CancelToken,
    mut predicate: P,
) -> Result<K>
where
    K: Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
    P: FnMut(&K) -> Result<bool>,
{
    let what = format!("{} {}", store.kind(), key);
    let found = poll_until(
        &what,
        opts,
        cancel,
        move || store.get(key),
        |obj| match obj {
            Some(obj) => predicate(obj),
            None => Ok(false),
        },
    )
    .await?;

    found.ok_or_else(|| Error::NotFound {
        kind: store.kind().to_string(),
        namespace: key.namespace.clone(),
        name: key.name.clone(),
    })
}

/// Wait until the object at `key` no longer exists
pub async fn wait_for_deletion<K, S>(
    store: &S,
    key: &ObjectKey,
    opts: &PollOptions,
    cancel: &CancelToken,
) -> Result<()>
where
    K: Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    let what = format!("deletion of {} {}", store.kind(), key);
    poll_until(
        &what,
        opts,
        cancel,
        move || store.get(key),
        |obj| Ok(obj.is_none()),
    )
    .await?;
    Ok(())
}

/// Core polling loop
///
/// `fetch` reads the current state (`None` or a not-found error both mean
/// absent), `ready` decides whether that state ends the wait. Returns the state
/// that satisfied `ready`.
pub async fn poll_until<T, F, Fut, R>(
    what: &str,
    opts: &PollOptions,
    cancel: &CancelToken,
    mut fetch: F,
    mut ready: R,
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
    R: FnMut(Option<&T>) -> Result<bool>,
{
    opts.validate()?;

    let start = Instant::now();
    let deadline = start + opts.timeout;
    let mut cancel = cancel.clone();
    let mut next_attempt = if opts.immediate {
        start
    } else {
        start + opts.interval
    };
    let mut attempts: u32 = 0;

    let result = loop {
        if next_attempt >= deadline {
            // No further attempt fits before the deadline.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(Error::Cancelled(what.to_string())),
                _ = sleep_until(deadline) => break Err(Error::Timeout(opts.timeout, what.to_string())),
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Err(Error::Cancelled(what.to_string())),
            _ = sleep_until(next_attempt) => {}
        }

        attempts += 1;
        let observed = match timeout_at(deadline, fetch()).await {
            Err(_) => break Err(Error::Timeout(opts.timeout, what.to_string())),
            Ok(Ok(state)) => Some(state),
            Ok(Err(e)) if e.is_not_found() => Some(None),
            Ok(Err(e)) if e.is_retriable() => {
                debug!("Transient error polling {} (attempt {}): {}", what, attempts, e);
                None
            }
            Ok(Err(e)) => break Err(e),
        };

        if let Some(state) = observed {
            match ready(state.as_ref()) {
                Ok(true) => break Ok(state),
                Ok(false) => {}
                Err(e) => break Err(e),
            }
        }

        next_attempt = Instant::now() + opts.interval;
    };

    let outcome = PollOutcome::of(&result);
    match &result {
        Ok(_) => info!("{} ready after {} attempt(s)", what, attempts),
        Err(e) => warn!("Waiting for {} ended after {} attempt(s): {}", what, attempts, e),
    }

    #[cfg(feature = "metrics")]
    super::metrics::inc_poll_outcome(outcome.as_str());
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;

    result
}
