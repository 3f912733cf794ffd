//! Public surface of the streaming engine.
//!
//! `Engine::start` brings up the poller thread; `create_*` parse a container
//! and bind a stream slot to a fresh sink; `play`/`pause`/`stop` are deferred
//! requests the poller acts on within one tick; `set_volume` goes straight to
//! the sink's thread-safe volume primitive. Dropping the engine shuts it
//! down, destroying every live stream.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crate::config::EngineConfig;
use crate::error::{Result, StreamError};
use crate::poller;
use crate::registry::{StreamId, StreamRegistry};
use crate::sink::SinkBackend;
use crate::slot::{Filter, FilterId, Scratch, SlotPayload, SlotState};
use crate::source::BackingSource;
use crate::wav::{self, ContainerInfo};

pub struct Engine {
    registry: Arc<StreamRegistry>,
    backend: Arc<dyn SinkBackend>,
    shutdown: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
}

impl Engine {
    /// Bring up the engine: size the registry from the backend's stream
    /// limit and spawn the poller thread.
    pub fn start(backend: Arc<dyn SinkBackend>, config: EngineConfig) -> Result<Engine> {
        let registry = Arc::new(StreamRegistry::new(backend.max_streams()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let poller = std::thread::Builder::new()
            .name("wav-stream-poller".into())
            .spawn({
                let registry = registry.clone();
                let shutdown = shutdown.clone();
                let interval = config.poll_interval;
                move || poller::run(registry, shutdown, interval)
            })?;

        tracing::info!(
            streams = backend.max_streams(),
            request_bytes = backend.max_request(),
            "engine started"
        );
        Ok(Engine {
            registry,
            backend,
            shutdown,
            poller: Some(poller),
        })
    }

    /// Open a file and create a stream over its payload.
    ///
    /// A `.raw` extension is taken as a raw CDDA sidecar: headerless 16-bit
    /// stereo PCM at 44.1 kHz spanning the whole file, no container parse.
    pub fn create_from_file(&self, path: impl AsRef<Path>, looped: bool) -> Result<StreamId> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let info = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("raw")) {
            wav::cdda_info(file.metadata()?.len())
        } else {
            wav::parse(&mut file)?
        };
        self.create_stream(info, move |i| BackingSource::from_file(file, i), looped)
    }

    /// Create a stream over an already-open file handle.
    pub fn create_from_handle(&self, mut file: File, looped: bool) -> Result<StreamId> {
        let info = wav::parse(&mut file)?;
        self.create_stream(info, move |i| BackingSource::from_file(file, i), looped)
    }

    /// Create a stream over a shared in-memory container image.
    pub fn create_from_buffer(&self, buf: impl Into<Arc<[u8]>>, looped: bool) -> Result<StreamId> {
        let buf = buf.into();
        let info = wav::parse(&mut std::io::Cursor::new(&buf[..]))?;
        self.create_stream(info, move |i| Ok(BackingSource::from_buffer(buf, i)), looped)
    }

    fn create_stream(
        &self,
        info: ContainerInfo,
        make_source: impl FnOnce(&ContainerInfo) -> std::io::Result<BackingSource>,
        looped: bool,
    ) -> Result<StreamId> {
        let idx = self.registry.allocate().ok_or(StreamError::NoFreeSlot)?;

        let sink = match self.backend.create_sink() {
            Ok(sink) => sink,
            Err(e) => {
                self.registry.release_claim(idx);
                return Err(StreamError::SinkCreate(e));
            }
        };
        let source = match make_source(&info) {
            Ok(source) => source,
            Err(e) => {
                self.registry.release_claim(idx);
                return Err(StreamError::Io(e));
            }
        };
        let scratch = Scratch::new(self.backend.max_request(), self.backend.buffer_align());

        tracing::debug!(
            stream = idx,
            format = info.format.code(),
            channels = info.channels,
            rate_hz = info.sample_rate,
            bits = info.bits_per_sample,
            payload_bytes = info.data_length,
            looped,
            "stream created"
        );
        self.registry
            .install(idx, SlotPayload::new(info, source, scratch, sink, looped));
        Ok(StreamId(idx))
    }

    /// Tear down a stream unconditionally, whatever state it is in.
    pub fn destroy(&self, id: StreamId) {
        self.registry.free(id.0);
    }

    /// Request playback. No-op while already streaming; acted on within one
    /// poller tick otherwise.
    pub fn play(&self, id: StreamId) {
        self.request(id, |state| match state {
            SlotState::Free | SlotState::Streaming | SlotState::Resuming => None,
            _ => Some(SlotState::Resuming),
        });
    }

    /// Request a pause: the sink stops, the payload cursor stays put.
    pub fn pause(&self, id: StreamId) {
        self.request(id, |state| match state {
            SlotState::Free | SlotState::Ready | SlotState::Pausing => None,
            _ => Some(SlotState::Pausing),
        });
    }

    /// Request a stop: the sink stops and the cursor rewinds to the payload
    /// start.
    pub fn stop(&self, id: StreamId) {
        self.request(id, |state| match state {
            SlotState::Free | SlotState::Ready | SlotState::Stopping => None,
            _ => Some(SlotState::Stopping),
        });
    }

    /// Set a stream's volume, clamped to `0..=255`, applied immediately.
    pub fn set_volume(&self, id: StreamId, level: i32) {
        let Some(slot) = self.registry.slot(id.0) else {
            return;
        };
        if slot.state() == SlotState::Free {
            return;
        }
        let volume = level.clamp(0, 255) as u8;
        slot.set_volume(volume);
        // Clone the handle out of the short-lived sink lock so this call
        // never waits on an in-progress poll.
        let sink = slot.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.set_volume(volume);
        }
    }

    pub fn volume(&self, id: StreamId) -> Option<u8> {
        let slot = self.registry.slot(id.0)?;
        (slot.state() != SlotState::Free).then(|| slot.volume())
    }

    pub fn is_playing(&self, id: StreamId) -> bool {
        self.registry
            .slot(id.0)
            .is_some_and(|slot| slot.state() == SlotState::Streaming)
    }

    /// Append a byte-transform filter to the stream's refill path.
    pub fn add_filter(&self, id: StreamId, filter: Filter) -> Option<FilterId> {
        let slot = self.registry.slot(id.0)?;
        let mut payload = slot.payload.lock().unwrap();
        payload.as_mut().map(|p| p.add_filter(filter))
    }

    /// Remove a previously added filter. Returns whether it was present.
    pub fn remove_filter(&self, id: StreamId, filter: FilterId) -> bool {
        let Some(slot) = self.registry.slot(id.0) else {
            return false;
        };
        let mut payload = slot.payload.lock().unwrap();
        payload
            .as_mut()
            .is_some_and(|p| p.remove_filter(filter))
    }

    /// Stop the poller and destroy every live stream.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn request(&self, id: StreamId, next: impl Fn(SlotState) -> Option<SlotState>) {
        let Some(slot) = self.registry.slot(id.0) else {
            return;
        };
        // Retry if the state moved under us; preconditions keep duplicate
        // requests idempotent.
        loop {
            let observed = slot.state();
            let Some(target) = next(observed) else {
                return;
            };
            if slot.transition(observed, target) {
                return;
            }
        }
    }

    fn shutdown_inner(&mut self) {
        let Some(poller) = self.poller.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        if poller.join().is_err() {
            tracing::error!("poller thread panicked");
        }
        tracing::info!("engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
