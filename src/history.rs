//! Delay before trusting server history after a burst of replayed sends.
//!
//! The backend's stored-message response reflects what the server has
//! persisted, which can lag messages that were just handed to the
//! transport. Waiting for a quiet period after a replay makes it likely the
//! history already contains them. This is a heuristic, not an
//! acknowledgement-based guarantee.

use std::time::Duration;

use tracing::debug;

/// Default quiet period after replayed sends.
pub const DEFAULT_HISTORY_QUIESCENCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub(crate) struct HistoryDebouncer {
    quiescence: Duration,
}

impl HistoryDebouncer {
    pub(crate) fn new(quiescence: Duration) -> Self {
        Self { quiescence }
    }

    /// How long to wait after `sent` messages were replayed.
    pub(crate) fn delay_for(&self, sent: usize) -> Option<Duration> {
        (sent > 0 && !self.quiescence.is_zero()).then_some(self.quiescence)
    }

    /// Wait out the quiet period if anything was sent.
    pub(crate) async fn settle(&self, sent: usize) {
        if let Some(delay) = self.delay_for(sent) {
            debug!(sent, ?delay, "waiting before requesting history");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_sent_means_no_delay() {
        let debouncer = HistoryDebouncer::new(DEFAULT_HISTORY_QUIESCENCE);
        assert_eq!(debouncer.delay_for(0), None);
        assert_eq!(debouncer.delay_for(3), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_quiescence_disables_the_delay() {
        let debouncer = HistoryDebouncer::new(Duration::ZERO);
        assert_eq!(debouncer.delay_for(10), None);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_sleeps_for_the_quiet_period() {
        let debouncer = HistoryDebouncer::new(Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        debouncer.settle(1).await;
        assert!(started.elapsed() >= Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        debouncer.settle(0).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
