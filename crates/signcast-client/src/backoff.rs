//! Reconnection policy.
//!
//! Abnormal close -> wait `min(max_delay, base_delay * 2^n)` and dial again,
//! up to `max_attempts` consecutive failures; then `offline` until a manual
//! retry. A clean close (1000/1001) never reconnects.

use std::time::Duration;

use signcast_core::protocol::is_clean_close;

pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What to do after a channel closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Clean close; stay disconnected.
    Stop,
    /// Dial again after `delay`. `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted; wait for a manual retry.
    Offline,
}

/// Counts consecutive failed attempts for one client.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectController {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Retries scheduled since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Channel opened and identified.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Channel closed with `code` (`None`: no close frame, or never opened).
    pub fn on_close(&mut self, code: Option<u16>) -> Decision {
        if is_clean_close(code) {
            return Decision::Stop;
        }
        if self.attempts >= self.policy.max_attempts {
            return Decision::Offline;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        Decision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// User asked to try again from `offline`; the budget starts over.
    pub fn manual_retry(&mut self) {
        self.attempts = 0;
    }
}
