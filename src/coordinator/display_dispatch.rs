//! Dispatch loop for the Display peer: answers identity and snapshot pulls.

use super::peer::{PeerConnection, PeerSender};
use crate::protocol::{Command, Message, WireError, UNKNOWN_REQUEST};
use crate::state::SharedPlantState;
use tracing::{debug, info, warn};

/// answer one request from the Display peer
pub async fn handle(msg: &Message, state: &SharedPlantState, reply: &PeerSender) -> Result<(), WireError> {
    match msg {
        Message::Command(Command::PlantName) => reply.send_text(&state.name()).await,
        Message::Command(Command::PlantDate) => reply.send_text(&state.planted_date()).await,
        Message::Command(Command::PlantUpdate) => {
            let snapshot = state.snapshot();
            debug!(?snapshot, "sending plant snapshot");
            reply.send_snapshot(&snapshot).await
        }
        other => {
            warn!(peer = "display", request = %other.as_text(), "unknown request");
            reply.send_text(UNKNOWN_REQUEST).await
        }
    }
}

/// runs until the peer disconnects or a write fails, then closes the link
pub async fn run(conn: PeerConnection, state: SharedPlantState) {
    let PeerConnection { mut reader, sender, .. } = conn;
    info!("[DISPLAY] dispatch loop started");

    loop {
        let msg = match reader.read_message().await {
            Ok(msg) => msg,
            Err(WireError::Closed) => {
                info!("[DISPLAY] peer disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "[DISPLAY] receive failed");
                break;
            }
        };
        debug!(request = %msg.as_text(), "[DISPLAY] request");

        if let Err(e) = handle(&msg, &state, &sender).await {
            warn!(error = %e, "[DISPLAY] reply failed");
            break;
        }
    }

    sender.close().await;
}
