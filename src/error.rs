//! Crate-wide error type for the library's typed, fallible boundaries.
//!
//! Binaries use `anyhow::Result` throughout; internal boundaries that callers
//! need to match on (shared-memory mapping, control-frame decoding) return
//! `EngineError` instead.

/// Errors surfaced by the shared-memory contract, control channel, and
/// snapshot recorder.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// The shared-memory region could not be created or mapped at startup.
    ShmMapFailed(String),
    /// A reader opened a path that doesn't exist or isn't sized like a region.
    ShmDisconnected(String),
    /// A control frame was not exactly 260 bytes.
    BadFrameSize(usize),
    /// A control-frame payload was not valid UTF-8.
    BadFramePayload,
    /// An unrecognized command tag.
    UnknownCommand(u32),
    /// The snapshot store could not be opened.
    StorageOpenFailed(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShmMapFailed(msg) => write!(f, "shared memory map failed: {msg}"),
            Self::ShmDisconnected(msg) => write!(f, "shared memory disconnected: {msg}"),
            Self::BadFrameSize(n) => write!(f, "invalid control frame size: {n} (expected 260)"),
            Self::BadFramePayload => write!(f, "control frame payload is not valid UTF-8"),
            Self::UnknownCommand(tag) => write!(f, "unknown control command: {tag}"),
            Self::StorageOpenFailed(msg) => write!(f, "snapshot storage open failed: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
