//! Single-use synchronization between the worker and transport callbacks.
//!
//! The worker arms the gate before issuing a join or leave request and then
//! awaits the returned [`GateWaiter`]. The transport's terminal callback
//! resolves it from whatever thread it runs on. Each armed gate resolves at
//! most once and is discarded afterwards; at most one is live at a time.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::state::lock;

/// Terminal outcome reported by a transport callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// `room_connected(success)`.
    Joined { success: bool },
    /// `room_disconnected()`.
    Left,
}

/// What the worker observed while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateOutcome {
    Resolved(Resolution),
    /// The configured transition timeout elapsed first.
    TimedOut,
    /// The gate was disarmed without a resolution.
    Abandoned,
}

/// Holder of the one outstanding transition signal, if any.
#[derive(Debug, Default)]
pub(crate) struct ConnectionGate {
    pending: Mutex<Option<oneshot::Sender<Resolution>>>,
}

impl ConnectionGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arm a fresh gate for a new transition.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::GateBusy`] if a previous gate is still armed.
    pub(crate) fn arm(&self) -> Result<GateWaiter> {
        let mut pending = lock(&self.pending);
        if pending.is_some() {
            return Err(SessionError::GateBusy);
        }
        let (tx, rx) = oneshot::channel();
        *pending = Some(tx);
        Ok(GateWaiter { rx })
    }

    /// Resolve the outstanding gate. Returns `false` (and logs) when no
    /// transition is in flight.
    pub(crate) fn resolve(&self, resolution: Resolution) -> bool {
        let Some(tx) = lock(&self.pending).take() else {
            warn!(
                ?resolution,
                "transport callback with no outstanding transition, ignoring"
            );
            return false;
        };
        if tx.send(resolution).is_err() {
            debug!(?resolution, "transition waiter already gone");
        }
        true
    }

    /// Drop the outstanding gate without resolving it, so a late callback is
    /// treated as unsolicited.
    pub(crate) fn disarm(&self) {
        if lock(&self.pending).take().is_some() {
            debug!("transition gate disarmed");
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        lock(&self.pending).is_some()
    }
}

/// Receiving half of an armed gate.
#[derive(Debug)]
pub(crate) struct GateWaiter {
    rx: oneshot::Receiver<Resolution>,
}

impl GateWaiter {
    /// Wait for the resolution, optionally bounded by `timeout`.
    pub(crate) async fn wait(self, timeout: Option<Duration>) -> GateOutcome {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(received) => received,
                Err(_) => return GateOutcome::TimedOut,
            },
            None => self.rx.await,
        };
        match received {
            Ok(resolution) => GateOutcome::Resolved(resolution),
            Err(_) => GateOutcome::Abandoned,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn resolves_once_from_another_thread() {
        let gate = Arc::new(ConnectionGate::new());
        let waiter = gate.arm().unwrap();

        let remote = Arc::clone(&gate);
        std::thread::spawn(move || {
            assert!(remote.resolve(Resolution::Joined { success: true }));
            assert!(!remote.resolve(Resolution::Joined { success: true }));
        });

        assert_eq!(
            waiter.wait(None).await,
            GateOutcome::Resolved(Resolution::Joined { success: true })
        );
        assert!(!gate.is_armed());
    }

    #[tokio::test]
    async fn resolution_before_wait_is_kept() {
        let gate = ConnectionGate::new();
        let waiter = gate.arm().unwrap();
        assert!(gate.resolve(Resolution::Left));
        assert_eq!(
            waiter.wait(None).await,
            GateOutcome::Resolved(Resolution::Left)
        );
    }

    #[test]
    fn second_gate_is_refused_while_armed() {
        let gate = ConnectionGate::new();
        let _waiter = gate.arm().unwrap();
        assert!(matches!(gate.arm(), Err(SessionError::GateBusy)));
    }

    #[test]
    fn unsolicited_callback_is_ignored() {
        let gate = ConnectionGate::new();
        assert!(!gate.resolve(Resolution::Left));
        assert!(gate.arm().is_ok());
    }

    #[tokio::test]
    async fn disarm_abandons_the_waiter() {
        let gate = ConnectionGate::new();
        let waiter = gate.arm().unwrap();
        gate.disarm();
        assert_eq!(waiter.wait(None).await, GateOutcome::Abandoned);
        assert!(!gate.resolve(Resolution::Left));
    }

    #[tokio::test]
    async fn timeout_reports_timed_out() {
        let gate = ConnectionGate::new();
        let waiter = gate.arm().unwrap();
        let outcome = waiter.wait(Some(Duration::from_millis(10))).await;
        assert_eq!(outcome, GateOutcome::TimedOut);
        // The slot stays armed until the worker disarms it.
        assert!(gate.is_armed());
        gate.disarm();
        assert!(gate.arm().is_ok());
    }
}
