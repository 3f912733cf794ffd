//! Hardware sink abstraction.
//!
//! The engine only ever touches playback hardware through these two traits:
//! `SinkBackend` hands out per-stream sinks and reports the hardware limits
//! the registry and scratch buffers are sized from, and `Sink` is one
//! playback channel. All `Sink` calls except `set_volume` are made from the
//! poller thread; `set_volume` may arrive from any thread and implementations
//! must make that one primitive independently thread-safe.

use std::sync::Arc;

/// Channel layout the sink is started with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    Mono,
    Stereo,
}

impl ChannelMode {
    pub fn count(self) -> u16 {
        match self {
            ChannelMode::Mono => 1,
            ChannelMode::Stereo => 2,
        }
    }
}

/// Payload sample width the sink is started with. `Adpcm4` payload bytes are
/// opaque to the engine; whether a sink can render them is its own affair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadWidth {
    Pcm16,
    Pcm8,
    Adpcm4,
}

impl PayloadWidth {
    /// Width in bits as it appears in the container header.
    pub fn bits(self) -> u16 {
        match self {
            PayloadWidth::Pcm16 => 16,
            PayloadWidth::Pcm8 => 8,
            PayloadWidth::Adpcm4 => 4,
        }
    }
}

/// What one `Sink::poll` call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// No refill was needed.
    Idle,
    /// One or more refills were pulled and buffered.
    Fed,
    /// The feeder reported end-of-stream; the caller should stop the sink.
    Finished,
}

/// Pull side of the refill protocol.
///
/// `refill` stages up to `want` payload bytes and returns a view of them, or
/// `None` as the authoritative end-of-stream signal. The view is only valid
/// until the next call; sinks copy out of it before asking again.
pub trait RefillSource {
    fn refill(&mut self, want: usize) -> Option<&[u8]>;
}

/// One playback channel of the hardware sink.
pub trait Sink: Send + Sync {
    /// Begin playback. Called on the poller thread; a failure leaves the sink
    /// stopped and is reported to the caller as a warning, not an error.
    fn start(&self, sample_rate: u32, channels: ChannelMode, width: PayloadWidth)
    -> anyhow::Result<()>;

    /// Halt playback. Idempotent.
    fn stop(&self);

    /// Give the sink a chance to pull refills. Runs zero or more `refill`
    /// calls synchronously against `feeder`.
    fn poll(&self, feeder: &mut dyn RefillSource) -> PollOutcome;

    /// Set the playback volume, 0..=255. Safe to call from any thread, even
    /// while a poll is in progress.
    fn set_volume(&self, volume: u8);
}

/// Factory and capability surface of a sink implementation.
pub trait SinkBackend: Send + Sync {
    fn create_sink(&self) -> anyhow::Result<Arc<dyn Sink>>;

    /// Number of concurrent streams the hardware supports; the registry is
    /// sized to exactly this.
    fn max_streams(&self) -> usize;

    /// Upper bound on a single refill request, in bytes; scratch buffers are
    /// sized to this.
    fn max_request(&self) -> usize;

    /// Required scratch buffer alignment, in bytes.
    fn buffer_align(&self) -> usize {
        1
    }
}
