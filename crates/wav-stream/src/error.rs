//! Error types for container parsing and stream creation.

use thiserror::Error;

/// Result alias for stream creation and engine lifecycle calls.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Failures while walking a RIFF/WAVE container header.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The leading bytes are not the `RIFF`/`WAVE` tokens.
    #[error("not a RIFF/WAVE container")]
    BadMagic,

    /// A payload chunk appeared before any usable format chunk.
    #[error("no fmt chunk before the data chunk")]
    NoFormatChunk,

    /// The chunk walk exhausted the source without finding a payload chunk.
    #[error("no data chunk in container")]
    NoDataChunk,

    /// Read or seek failure while walking chunks.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures surfaced synchronously from `create_*` and engine lifecycle.
///
/// Errors during steady-state playback are not represented here: the poller
/// has no channel back to the caller, so a failing stream simply stops
/// (see the refill protocol in `slot`).
#[derive(Debug, Error)]
pub enum StreamError {
    /// The container header could not be parsed; no slot was allocated.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Every stream slot is occupied.
    #[error("no free stream slot")]
    NoFreeSlot,

    /// The sink backend could not allocate a playback channel.
    #[error("sink allocation failed: {0}")]
    SinkCreate(anyhow::Error),

    /// Open, metadata, or seek failure on the backing source during creation.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
