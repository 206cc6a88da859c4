//! Retry policy and backoff between download attempts
//!
//! [`RetryPolicy`] is the bounded attempt counter a task consults after a failed
//! attempt. [`Backoff`] computes the exponentially growing delay before the next
//! attempt, with optional jitter to prevent thundering herd.

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (bad request, disk full during merge, invalid state) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Transport failures are retryable; builder/redirect errors are not
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Error::Fetch(e) => e.is_retryable(),
            // Part-file writes share this path, so only connection-shaped kinds retry
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // Merge failure is fatal for the task
            Error::Merge { .. } => false,
            Error::Config { .. }
            | Error::InvalidArgument(_)
            | Error::NotFound(_)
            | Error::Duplicate(_)
            | Error::InvalidState { .. }
            | Error::RetriesExhausted { .. }
            | Error::ShuttingDown => false,
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Bounded attempt counter owned by a single download task
///
/// `should_retry()` holds while fewer than `max_retries` retries have been
/// recorded. The task's run loop checks it after a failed attempt and records the
/// retry only when it is granted, so a budget of N allows N + 1 attempts in total.
/// Only the run loop mutates it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_count: u32,
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_count: 0,
        }
    }

    /// Whether another attempt is permitted
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Record one granted retry
    pub fn record_attempt(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Retries recorded so far
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Retry budget
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_retries)
    }
}

/// Exponential backoff schedule for one task's retries
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Start a schedule at the configured initial delay
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule
    ///
    /// The un-jittered delay never exceeds `max_delay`. With jitter enabled the
    /// returned delay lies between the base delay and twice the base delay.
    /// Growth that overflows `Duration` saturates at `max_delay`.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next.min(self.max_delay);
        self.next = Duration::try_from_secs_f64(base.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter { add_jitter(base) } else { base }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}
