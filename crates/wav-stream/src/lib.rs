//! Multi-stream WAV playback engine.
//!
//! Streams audio payload out of RIFF/WAVE containers (files or in-memory
//! buffers) into a pluggable hardware sink, with a fixed pool of concurrent
//! streams, looping, pause/resume/stop, and per-stream volume.
//!
//! ## Architecture
//! - [`wav`]: chunk-walking container parser producing a [`wav::ContainerInfo`].
//! - [`source`]: file- or buffer-backed payload cursor.
//! - [`sink`]: the narrow hardware interface ([`sink::Sink`] /
//!   [`sink::SinkBackend`]) and the pull-based refill protocol.
//! - [`playback`]: a CPAL implementation of the sink for desktop hosts.
//! - [`engine`]: the public control surface. `play`/`pause`/`stop` are
//!   deferred requests; a single background poller thread owns all hardware
//!   interaction and resolves them within one tick.

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod playback;
pub mod sink;
pub mod source;
pub mod wav;

mod poller;
mod registry;
mod slot;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{ParseError, StreamError};
pub use registry::StreamId;
pub use slot::{Filter, FilterId, SlotState};
