//! Control channel (component F): a local Unix-domain stream socket
//! accepting fixed-width 260-byte command frames, per spec.md section 4.F
//! and section 6.
//!
//! Directly grounded on `original_source`'s `c_engine_bridge.py`
//! (`socket.AF_UNIX, socket.SOCK_STREAM`, `struct.pack('I256s', ...)`),
//! generalized into the teacher's async idiom: the server loop shape
//! (accept, spawn-per-connection, `tracing::warn!` on malformed input,
//! never closing the listener) follows `EdgeReceiver::run()`'s
//! reconnect-loop style of a resilient, never-fatal async task.

use crate::error::EngineError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Total frame size: 4-byte command tag + 256-byte NUL-padded payload.
pub const FRAME_SIZE: usize = 260;
const PAYLOAD_SIZE: usize = 256;

/// Commands recognized on the control channel, per spec.md section 4.F.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    StartStrategy(String),
    StopStrategy(String),
    UpdateConfig(String),
    Shutdown,
}

impl ControlCommand {
    /// Decode one 260-byte frame. `BadFrameSize`/`BadFramePayload` are
    /// `ProtocolError`s (spec.md section 7): callers log and discard,
    /// never treat them as fatal.
    pub fn decode(frame: &[u8]) -> Result<Self, EngineError> {
        if frame.len() != FRAME_SIZE {
            return Err(EngineError::BadFrameSize(frame.len()));
        }
        let tag = u32::from_le_bytes(frame[0..4].try_into().unwrap());
        let payload_bytes = &frame[4..4 + PAYLOAD_SIZE];
        let end = payload_bytes.iter().position(|&b| b == 0).unwrap_or(PAYLOAD_SIZE);
        let payload = std::str::from_utf8(&payload_bytes[..end])
            .map_err(|_| EngineError::BadFramePayload)?
            .to_string();

        match tag {
            0 => Ok(Self::StartStrategy(payload)),
            1 => Ok(Self::StopStrategy(payload)),
            2 => Ok(Self::UpdateConfig(payload)),
            3 => Ok(Self::Shutdown),
            other => Err(EngineError::UnknownCommand(other)),
        }
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        let (tag, payload): (u32, &str) = match self {
            Self::StartStrategy(s) => (0, s.as_str()),
            Self::StopStrategy(s) => (1, s.as_str()),
            Self::UpdateConfig(s) => (2, s.as_str()),
            Self::Shutdown => (3, ""),
        };
        let mut frame = vec![0u8; FRAME_SIZE];
        frame[0..4].copy_from_slice(&tag.to_le_bytes());
        let bytes = payload.as_bytes();
        let n = bytes.len().min(PAYLOAD_SIZE);
        frame[4..4 + n].copy_from_slice(&bytes[..n]);
        frame
    }
}

/// Counters for protocol-level conditions spec.md names but that have no
/// dedicated shared-memory field.
#[derive(Debug, Default)]
pub struct ControlChannelStats {
    pub frames_accepted: AtomicU64,
    pub frames_malformed: AtomicU64,
    pub unknown_commands: AtomicU64,
}

/// A decoded command handed to the caller's handler. The control channel
/// has no reply frame (spec.md 4.F): effects are applied at the next
/// detector scan boundary and observed through the stats block.
pub type CommandHandler = Arc<dyn Fn(ControlCommand) + Send + Sync>;

/// Accepts connections on `socket_path` and decodes one frame per
/// connection, dispatching it to `handler`. Never returns except on a bind
/// failure; malformed frames are discarded and the socket stays open, per
/// spec.md section 7 ("a malformed frame is discarded; the socket stays
/// open").
pub async fn run_control_channel(
    socket_path: &str,
    handler: CommandHandler,
    stats: Arc<ControlChannelStats>,
) -> anyhow::Result<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path, "control channel listening");

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let handler = handler.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    handle_connection(stream, handler, stats).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "control channel accept failed");
            }
        }
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    handler: CommandHandler,
    stats: Arc<ControlChannelStats>,
) {
    let mut buf = [0u8; FRAME_SIZE];
    match stream.read_exact(&mut buf).await {
        Ok(_) => match ControlCommand::decode(&buf) {
            Ok(cmd) => {
                stats.frames_accepted.fetch_add(1, Ordering::Relaxed);
                debug!(?cmd, "control command decoded");
                handler(cmd);
            }
            Err(EngineError::UnknownCommand(tag)) => {
                stats.unknown_commands.fetch_add(1, Ordering::Relaxed);
                warn!(tag, "unknown control command dropped");
            }
            Err(e) => {
                stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "malformed control frame discarded");
            }
        },
        Err(e) => {
            stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
            debug!(error = %e, "control connection closed before a full frame arrived");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_known_command() {
        let frames = [
            ControlCommand::StartStrategy("cross_exchange".to_string()),
            ControlCommand::StopStrategy("cross_exchange".to_string()),
            ControlCommand::UpdateConfig("{\"min_spread_bps\":5}".to_string()),
            ControlCommand::Shutdown,
        ];
        for cmd in frames {
            let encoded = cmd.encode();
            assert_eq!(encoded.len(), FRAME_SIZE);
            let decoded = ControlCommand::decode(&encoded).unwrap();
            assert_eq!(decoded, cmd);
        }
    }

    #[test]
    fn wrong_size_is_rejected() {
        let err = ControlCommand::decode(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, EngineError::BadFrameSize(100)));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut frame = vec![0u8; FRAME_SIZE];
        frame[0..4].copy_from_slice(&99u32.to_le_bytes());
        let err = ControlCommand::decode(&frame).unwrap_err();
        assert!(matches!(err, EngineError::UnknownCommand(99)));
    }

    #[test]
    fn non_utf8_payload_is_rejected() {
        let mut frame = vec![0u8; FRAME_SIZE];
        frame[0..4].copy_from_slice(&0u32.to_le_bytes());
        frame[4] = 0xFF;
        frame[5] = 0xFE;
        let err = ControlCommand::decode(&frame).unwrap_err();
        assert!(matches!(err, EngineError::BadFramePayload));
    }
}
