use std::time::Duration;

/// Exponential backoff for push-channel reconnects.
///
/// Request/response calls are never retried inline; only the push stream
/// reconnects on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms: base_delay_ms.max(1),
            max_delay_ms: max_delay_ms.max(base_delay_ms.max(1)),
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Delay before reconnect attempt `attempt` (zero-based).
    ///
    /// A server retry-after hint wins when it is longer than the backoff.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let backoff = self
            .base_delay_ms
            .saturating_mul(1_u64 << attempt.min(20))
            .min(self.max_delay_ms);
        Duration::from_millis(backoff.max(retry_after_hint_ms.unwrap_or(0)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1_000, 30_000)
    }
}
