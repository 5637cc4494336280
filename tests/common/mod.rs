#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for room session integration tests.
//!
//! Provides a scripted [`MockTransport`] plus a [`MockRemote`] handle that
//! plays the backend's side: it observes every request and, in manual
//! mode, decides when and how each one resolves.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use roomsync_client::{
    MessageRecord, RoomId, RoomTransport, SessionError, SessionEvent, TransportCallbacks,
};
use tokio::sync::mpsc;

/// Local peer id reported by the mock.
pub const LOCAL_PEER: &str = "me";

/// How long helpers wait before declaring a test hung.
const WAIT: Duration = Duration::from_secs(5);

// ── Calls ───────────────────────────────────────────────────────────

/// A request the session issued to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Join(RoomId),
    Leave,
    Send(String),
    FetchHistory,
    Dispose,
}

impl Call {
    pub fn join(room: &str) -> Self {
        Self::Join(RoomId::from(room))
    }

    pub fn send(payload: &str) -> Self {
        Self::Send(payload.to_owned())
    }
}

// ── Script ──────────────────────────────────────────────────────────

/// Backend behavior, adjustable from the test while the session runs.
#[derive(Default)]
struct Script {
    /// Outcomes for upcoming joins; joins succeed once this runs out.
    join_results: VecDeque<bool>,
    /// Records returned for every history request.
    history: Vec<MessageRecord>,
    /// Report every accepted send as failed via the callback.
    reject_sends: bool,
    /// Refuse sends outright (the request is never issued).
    refuse_sends: bool,
}

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted transport for integration testing.
///
/// In auto mode every request resolves right away on a spawned task, as a
/// real backend would from its own thread. In manual mode requests are only
/// recorded and the test resolves them through [`MockRemote::callbacks`].
pub struct MockTransport {
    auto: bool,
    callbacks: Arc<StdMutex<Option<TransportCallbacks>>>,
    calls: Arc<StdMutex<Vec<Call>>>,
    call_tx: mpsc::UnboundedSender<Call>,
    script: Arc<StdMutex<Script>>,
}

/// The backend's side of a [`MockTransport`].
pub struct MockRemote {
    callbacks: Arc<StdMutex<Option<TransportCallbacks>>>,
    calls: Arc<StdMutex<Vec<Call>>>,
    call_rx: mpsc::UnboundedReceiver<Call>,
    script: Arc<StdMutex<Script>>,
}

impl MockTransport {
    /// Transport that resolves every request immediately.
    pub fn auto() -> (Self, MockRemote) {
        Self::build(true)
    }

    /// Transport whose joins and leaves wait for the test.
    pub fn manual() -> (Self, MockRemote) {
        Self::build(false)
    }

    fn build(auto: bool) -> (Self, MockRemote) {
        let callbacks = Arc::new(StdMutex::new(None));
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let script = Arc::new(StdMutex::new(Script::default()));
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let transport = Self {
            auto,
            callbacks: Arc::clone(&callbacks),
            calls: Arc::clone(&calls),
            call_tx,
            script: Arc::clone(&script),
        };
        let remote = MockRemote {
            callbacks,
            calls,
            call_rx,
            script,
        };
        (transport, remote)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call.clone());
        let _ = self.call_tx.send(call);
    }

    /// Run `f` with the callbacks on a separate task.
    fn respond(&self, f: impl FnOnce(TransportCallbacks) + Send + 'static) {
        let cbs = self
            .callbacks
            .lock()
            .unwrap()
            .clone()
            .expect("transport not attached");
        tokio::spawn(async move { f(cbs) });
    }
}

#[async_trait]
impl RoomTransport for MockTransport {
    fn attach(&mut self, callbacks: TransportCallbacks) {
        *self.callbacks.lock().unwrap() = Some(callbacks);
    }

    fn local_peer_id(&self) -> String {
        LOCAL_PEER.into()
    }

    async fn join_room(&mut self, room: &RoomId) -> Result<(), SessionError> {
        self.record(Call::Join(room.clone()));
        if self.auto {
            let ok = self.script.lock().unwrap().join_results.pop_front().unwrap_or(true);
            self.respond(move |cbs| cbs.room_connected(ok));
        }
        Ok(())
    }

    async fn leave_room(&mut self) -> Result<(), SessionError> {
        self.record(Call::Leave);
        if self.auto {
            self.respond(|cbs| cbs.room_disconnected());
        }
        Ok(())
    }

    async fn send_message(&mut self, payload: &str) -> Result<(), SessionError> {
        let (refuse, reject) = {
            let script = self.script.lock().unwrap();
            (script.refuse_sends, script.reject_sends)
        };
        if refuse {
            return Err(SessionError::TransportRequest("offline".into()));
        }
        self.record(Call::Send(payload.to_owned()));
        if reject {
            self.respond(|cbs| cbs.send_failed(Some("rejected".into())));
        }
        Ok(())
    }

    async fn fetch_history(&mut self) -> Result<(), SessionError> {
        self.record(Call::FetchHistory);
        if self.auto {
            let history = self.script.lock().unwrap().history.clone();
            self.respond(move |cbs| cbs.history_received(history));
        }
        Ok(())
    }

    async fn dispose(&mut self) -> Result<(), SessionError> {
        self.record(Call::Dispose);
        Ok(())
    }
}

impl MockRemote {
    /// Wait for the next request the session issues.
    pub async fn next_call(&mut self) -> Call {
        tokio::time::timeout(WAIT, self.call_rx.recv())
            .await
            .expect("timed out waiting for a transport call")
            .expect("transport dropped")
    }

    /// Callback handle, for resolving requests by hand.
    pub fn callbacks(&self) -> TransportCallbacks {
        self.callbacks
            .lock()
            .unwrap()
            .clone()
            .expect("transport not attached")
    }

    /// Every request issued so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Queue outcomes for upcoming auto-resolved joins.
    pub fn script_joins(&self, results: impl IntoIterator<Item = bool>) {
        self.script.lock().unwrap().join_results.extend(results);
    }

    pub fn set_history(&self, history: Vec<MessageRecord>) {
        self.script.lock().unwrap().history = history;
    }

    pub fn reject_sends(&self, reject: bool) {
        self.script.lock().unwrap().reject_sends = reject;
    }

    pub fn refuse_sends(&self, refuse: bool) {
        self.script.lock().unwrap().refuse_sends = refuse;
    }
}

// ── Event helpers ───────────────────────────────────────────────────

/// Receive events until one matches `pred`, returning it.
pub async fn wait_for_event(
    rx: &mut mpsc::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Every event already delivered, without waiting.
pub fn drain_events(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Receive events up to and including [`SessionEvent::Closed`].
///
/// The channel itself stays open while a [`MockRemote`] holds callbacks.
pub async fn collect_until_closed(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    collect_until(rx, |e| matches!(e, SessionEvent::Closed)).await
}

/// Receive events up to and including the first one matching `pred`.
pub async fn collect_until(
    rx: &mut mpsc::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    tokio::time::timeout(WAIT, async {
        let mut events = Vec::new();
        loop {
            let event = rx.recv().await.expect("event channel closed");
            let done = pred(&event);
            events.push(event);
            if done {
                return events;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
