//! Retry/backoff bookkeeping as an explicit state machine.
//!
//! ```text
//! Idle -> Attempting(1) -> BackoffWait(1, d) -> Attempting(2) -> ... -> Succeeded | Failed
//! ```
//!
//! The machine never sleeps or performs I/O. The caller reports each
//! attempt's outcome together with the current instant and gets back a
//! decision, which keeps deadline accounting testable without a clock.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::config::defaults::MAX_RETRY_DELAY;
use crate::core::error::CompletionError;
use crate::core::request::CompletionRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Wall-clock budget for the whole sequence, measured from the first
    /// dispatch.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn for_request(request: &CompletionRequest) -> Self {
        Self {
            max_retries: request.max_retries(),
            base_delay: request.retry_delay(),
            max_delay: MAX_RETRY_DELAY,
            timeout: request.timeout(),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting { attempt: u32 },
    BackoffWait { attempt: u32, delay: Duration },
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    attempts: u32,
    server_retries: u32,
    started: Option<Instant>,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
            attempts: 0,
            server_retries: 0,
            started: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Enter `Attempting`. The first call starts the deadline clock.
    /// Returns the 1-based attempt number.
    pub fn begin(&mut self, now: Instant) -> u32 {
        debug_assert!(
            matches!(self.state, RetryState::Idle | RetryState::BackoffWait { .. }),
            "begin called from {:?}",
            self.state
        );
        self.started.get_or_insert(now);
        self.attempts += 1;
        self.state = RetryState::Attempting {
            attempt: self.attempts,
        };
        self.attempts
    }

    pub fn on_success(&mut self) {
        if self.attempts > 1 {
            debug!(attempts = self.attempts, "Request succeeded after retry");
        }
        self.state = RetryState::Succeeded;
    }

    /// Mark the sequence failed without consulting the policy, e.g. after a
    /// mid-stream failure or cancellation.
    pub fn abandon(&mut self) {
        self.state = RetryState::Failed;
    }

    pub fn on_failure(&mut self, err: &CompletionError, now: Instant) -> RetryDecision {
        let retries_used = self.attempts.saturating_sub(1);

        if !err.is_retryable() {
            return self.give_up(err, "error is not retryable");
        }
        if retries_used >= self.policy.max_retries {
            return self.give_up(err, "retry budget exhausted");
        }
        if matches!(err, CompletionError::Server { .. }) {
            if self.server_retries >= 1 {
                return self.give_up(err, "server error already retried");
            }
            self.server_retries += 1;
        }

        let delay = err
            .retry_after()
            .unwrap_or_else(|| self.policy.backoff(retries_used + 1));
        if now + delay >= self.deadline(now) {
            return self.give_up(err, "retry would exceed the request timeout");
        }

        warn!(
            attempt = self.attempts,
            max_retries = self.policy.max_retries,
            kind = %err.kind(),
            error = %err,
            backoff_ms = delay.as_millis() as u64,
            "Request failed, retrying"
        );
        self.state = RetryState::BackoffWait {
            attempt: self.attempts,
            delay,
        };
        RetryDecision::Retry { delay }
    }

    /// Time left before the deadline; the full timeout if nothing has been
    /// dispatched yet.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline(now).saturating_duration_since(now)
    }

    fn deadline(&self, now: Instant) -> Instant {
        self.started.unwrap_or(now) + self.policy.timeout
    }

    fn give_up(&mut self, err: &CompletionError, reason: &'static str) -> RetryDecision {
        debug!(
            attempts = self.attempts,
            kind = %err.kind(),
            reason,
            "Giving up on request"
        );
        self.state = RetryState::Failed;
        RetryDecision::GiveUp
    }
}
