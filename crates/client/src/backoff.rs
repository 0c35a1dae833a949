//! Reconnection backoff.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Delay before reconnection `attempt` (0-based): `min(base × 2^attempt, cap)`.
pub(crate) fn reconnect_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Reconnection bookkeeping, owned by the scheduler behind the client's
/// connection lock. At most one timer is armed at a time.
#[derive(Default)]
pub(crate) struct ReconnectContext {
    pub attempt: u32,
    timer: Option<JoinHandle<()>>,
    exhausted_emitted: bool,
}

impl ReconnectContext {
    pub fn timer_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn arm(&mut self, timer: JoinHandle<()>) {
        self.timer = Some(timer);
    }

    /// Forget the timer handle; called by the timer task itself once it
    /// fires, before retrying.
    pub fn disarm(&mut self) {
        self.timer = None;
    }

    /// Abort a pending timer, if any.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Back to a clean slate: no timer, zero attempts. Runs on every
    /// successful authentication and on explicit `connect()`.
    pub fn reset(&mut self) {
        self.cancel();
        self.attempt = 0;
        self.exhausted_emitted = false;
    }

    /// Record exhaustion; true only the first time so the terminal event
    /// fires exactly once.
    pub fn mark_exhausted(&mut self) -> bool {
        if self.exhausted_emitted {
            false
        } else {
            self.exhausted_emitted = true;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(1_000);
    const CAP: Duration = Duration::from_millis(30_000);

    #[test]
    fn doubles_per_attempt_until_the_cap() {
        let delays: Vec<u64> = (0..5)
            .map(|attempt| reconnect_delay(attempt, BASE, CAP).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
    }

    #[test]
    fn caps_from_attempt_five_onward() {
        for attempt in 5..12 {
            assert_eq!(reconnect_delay(attempt, BASE, CAP), CAP);
        }
    }

    #[test]
    fn survives_absurd_attempt_counts() {
        assert_eq!(reconnect_delay(u32::MAX, BASE, CAP), CAP);
    }

    #[test]
    fn exhaustion_is_reported_once() {
        let mut ctx = ReconnectContext::default();
        assert!(ctx.mark_exhausted());
        assert!(!ctx.mark_exhausted());
        ctx.reset();
        assert!(ctx.mark_exhausted());
    }
}
