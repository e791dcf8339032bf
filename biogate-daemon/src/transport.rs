//! Bridges a client connection to a session runner.
//!
//! The adapter is generic over a frame stream and a text sink so it can be
//! driven by an axum WebSocket in production and by plain channels in tests.

use std::fmt::Display;

use biogate_core::{ClientCommand, EnrollmentSession, SubjectKey};
use futures_util::{Sink, SinkExt, Stream, StreamExt};

use crate::runner::{self, SessionContext};

/// One inbound frame, reduced to what the adapter cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// Binary payload of the given length. Not part of the protocol.
    Binary(usize),
    /// Ping/pong and other control traffic.
    Control,
    /// Close frame or read error.
    Closed,
}

/// Decode a text frame into a command.
pub fn decode_command(text: &str) -> Result<ClientCommand, serde_json::Error> {
    serde_json::from_str(text)
}

/// Serve one connection until it closes.
///
/// Commands are forwarded to a freshly spawned runner in arrival order, and
/// every message the runner emits is written to `outbound` as one JSON text
/// frame, in order. While the runner's command queue is full no further
/// frames are read.
///
/// When the connection ends the runner is cancelled and awaited, so the
/// device lease is free by the time this returns.
pub async fn run_connection<I, O>(
    context: SessionContext,
    subject_key: SubjectKey,
    mut inbound: I,
    mut outbound: O,
) -> Option<EnrollmentSession>
where
    I: Stream<Item = InboundFrame> + Unpin,
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    let (handle, mut events) = runner::spawn(context, subject_key);
    let session = handle.id().clone();
    tracing::info!(session = %session, "Client connected");

    // A decoded command waiting for room in the runner's queue. Reading
    // stops until it is delivered, so back-pressure reaches the client.
    let mut pending: Option<ClientCommand> = None;

    loop {
        tokio::select! {
            permit = handle.reserve(), if pending.is_some() => {
                if let Some(command) = pending.take() {
                    match permit {
                        Some(permit) => permit.send(command),
                        None => tracing::warn!(
                            session = %session,
                            command = ?command,
                            "Session no longer accepts commands, dropping command"
                        ),
                    }
                }
            },
            frame = inbound.next(), if pending.is_none() => match frame {
                Some(InboundFrame::Text(text)) => match decode_command(&text) {
                    Ok(command) => {
                        tracing::debug!(session = %session, command = ?command, "Client command");
                        pending = Some(command);
                    }
                    Err(err) => {
                        tracing::warn!(
                            session = %session,
                            error = %err,
                            "Ignoring malformed client message"
                        );
                    }
                },
                Some(InboundFrame::Binary(len)) => {
                    tracing::warn!(session = %session, len, "Ignoring binary frame");
                }
                Some(InboundFrame::Control) => {}
                Some(InboundFrame::Closed) | None => break,
            },
            event = events.recv() => {
                let Some(message) = event else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::error!(
                            session = %session,
                            error = %err,
                            "Failed to encode message"
                        );
                        continue;
                    }
                };
                if let Err(err) = outbound.send(text).await {
                    tracing::warn!(session = %session, error = %err, "Failed to write to client");
                    break;
                }
            },
        }
    }

    tracing::info!(session = %session, "Client disconnected");

    // Drop the receiver first so a runner blocked on a full outbound queue
    // can make progress towards its cancel path.
    drop(events);
    handle.join().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_actions() {
        assert_eq!(
            decode_command(r#"{"action":"start_capture"}"#).unwrap(),
            ClientCommand::StartCapture
        );
        assert_eq!(
            decode_command(r#"{"action": "get_status", "extra": 1}"#).unwrap(),
            ClientCommand::GetStatus
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(decode_command("").is_err());
        assert!(decode_command("not json").is_err());
        assert!(decode_command(r#"{"action":"reboot"}"#).is_err());
        assert!(decode_command(r#"{"action":42}"#).is_err());
    }
}
