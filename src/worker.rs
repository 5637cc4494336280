//! The single serial worker every room operation runs on.
//!
//! One spawned task reads [`Command`]s from an unbounded channel and awaits
//! each to completion before reading the next, so no two room-affecting
//! operations ever overlap. Blocking on a transition inside a command is
//! safe because nothing else runs on this worker.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::event::EventSink;
use crate::machine::{RoomStateMachine, SendOutcome};
use crate::message::RoomId;
use crate::transport::RoomTransport;

/// Work submitted by the session handle.
#[derive(Debug)]
pub(crate) enum Command {
    /// Carry out a room selection (with staleness checks).
    SwitchRoom(RoomId),
    /// Explicit connect.
    Connect(RoomId),
    /// Explicit disconnect.
    Disconnect,
    /// Send to the room that was selected at submission time.
    Send { room: RoomId, payload: String },
    /// Request server history for the active room.
    FetchHistory,
    /// Snapshot of a room's offline queue.
    Pending {
        room: RoomId,
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Completes once everything submitted before it has run.
    Barrier(oneshot::Sender<()>),
    /// Tear down and stop.
    Shutdown,
}

/// Worker loop. Exits on [`Command::Shutdown`] or when every handle is gone,
/// tearing the session down either way.
pub(crate) async fn run<T: RoomTransport>(
    mut machine: RoomStateMachine<T>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: EventSink,
) {
    debug!("session worker started");

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::SwitchRoom(room) => machine.switch_to(&room).await,
            Command::Connect(room) => machine.connect_and_replay(&room).await,
            Command::Disconnect => machine.disconnect().await,
            Command::Send { room, payload } => {
                if let SendOutcome::Failed = machine.send(&room, payload).await {
                    debug!(room = %room, "send dropped after transport refusal");
                }
            }
            Command::FetchHistory => machine.request_history().await,
            Command::Pending { room, reply } => {
                let _ = reply.send(machine.pending(&room));
            }
            Command::Barrier(reply) => {
                let _ = reply.send(());
            }
            Command::Shutdown => {
                debug!("shutdown command received");
                break;
            }
        }
    }

    // Later submissions fail with `SessionClosed` on the handle side.
    cmd_rx.close();
    while let Ok(cmd) = cmd_rx.try_recv() {
        warn!(?cmd, "command submitted after shutdown, not executed");
    }
    machine.teardown().await;
    events.emit_closed().await;
    debug!("session worker exited");
}
