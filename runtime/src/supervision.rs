//! Supervision strategies for actor initialization failures.
//!

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
    time::Duration,
};

use backoff::backoff::Backoff as InnerBackoff;

/// Trait to define a retry strategy for failed actor initialization. Implement it to
/// provide custom retry timing.
pub trait RetryStrategy: Debug + Send + Sync {
    /// Maximum number of tries before permanently failing an actor.
    fn max_retries(&self) -> usize;
    /// Wait duration before the next retry, or `None` for an immediate retry.
    fn next_backoff(&mut self) -> Option<Duration>;
}

/// What to do when an actor fails at startup: stop it, or retry initialization with a
/// [`RetryStrategy`].
#[derive(Debug)]
pub enum SupervisionStrategy {
    /// Stop the actor if an error occurs at startup.
    Stop,
    /// Retry starting the actor if an error occurs at startup.
    Retry(Box<dyn RetryStrategy>),
}

/// Retries immediately, without a waiting period.
#[derive(Debug, Default)]
pub struct NoIntervalStrategy {
    max_retries: usize,
}

impl NoIntervalStrategy {
    pub fn new(max_retries: usize) -> Self {
        NoIntervalStrategy { max_retries }
    }
}

impl RetryStrategy for NoIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }
}

/// Retries with a fixed wait period between attempts.
#[derive(Debug, Default)]
pub struct FixedIntervalStrategy {
    /// Maximum number of retries before permanently failing an actor.
    max_retries: usize,
    /// Wait duration before retrying.
    duration: Duration,
}

impl FixedIntervalStrategy {
    pub fn new(max_retries: usize, duration: Duration) -> Self {
        FixedIntervalStrategy {
            max_retries,
            duration,
        }
    }
}

impl RetryStrategy for FixedIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.duration)
    }
}

/// Retries with an exponential backoff wait period between attempts.
#[derive(Debug, Default)]
pub struct ExponentialBackoffStrategy {
    /// Maximum number of retries before permanently failing an actor.
    max_retries: usize,
    /// Inner exponential backoff state.
    inner: Arc<Mutex<backoff::ExponentialBackoff>>,
}

impl ExponentialBackoffStrategy {
    pub fn new(max_retries: usize) -> Self {
        ExponentialBackoffStrategy {
            max_retries,
            inner: Arc::new(Mutex::new(backoff::ExponentialBackoff::default())),
        }
    }
}

impl RetryStrategy for ExponentialBackoffStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.inner.lock().ok().and_then(|mut eb| eb.next_backoff())
    }
}
