//! Background control loop.
//!
//! The poller is the only actor that calls sink `start`/`stop`/`poll` or
//! performs refills. Each tick it walks every slot, resolves the transient
//! states the caller-facing requests left behind, and polls the sinks of
//! streaming slots. Transitions use compare-exchange against the state
//! observed at the top of the tick, so a request that lands mid-tick is left
//! for the next one instead of being overwritten.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::registry::StreamRegistry;
use crate::sink::{ChannelMode, PayloadWidth, PollOutcome};
use crate::slot::{SlotState, StreamSlot};
use crate::wav::ContainerInfo;

/// Run the poll loop until `shutdown` is raised, then drain every occupied
/// slot so the owning thread can join against a quiet registry.
pub(crate) fn run(registry: Arc<StreamRegistry>, shutdown: Arc<AtomicBool>, interval: Duration) {
    tracing::debug!(capacity = registry.capacity(), "poller running");
    while !shutdown.load(Ordering::Acquire) {
        for idx in 0..registry.capacity() {
            if let Some(slot) = registry.slot(idx) {
                tick_slot(idx, slot);
            }
        }
        std::thread::sleep(interval);
    }
    for idx in 0..registry.capacity() {
        registry.free(idx);
    }
    tracing::debug!("poller drained and stopped");
}

fn tick_slot(idx: usize, slot: &StreamSlot) {
    let observed = slot.state();
    if matches!(observed, SlotState::Free | SlotState::Ready) {
        return;
    }

    let mut guard = slot.payload.lock().unwrap();
    // A claim whose payload is not installed yet, or a slot being destroyed
    // concurrently. Skip; the owner of the payload settles the state.
    let Some(payload) = guard.as_mut() else {
        return;
    };

    match observed {
        SlotState::Resuming => {
            let started = start_params(&payload.info).and_then(|(channels, width)| {
                payload
                    .sink
                    .start(payload.info.sample_rate, channels, width)
            });
            match started {
                Ok(()) => {
                    slot.transition(SlotState::Resuming, SlotState::Streaming);
                }
                Err(e) => {
                    tracing::warn!(stream = idx, "sink start failed: {e:#}");
                    slot.transition(SlotState::Resuming, SlotState::Ready);
                }
            }
        }
        SlotState::Pausing => {
            payload.sink.stop();
            slot.transition(SlotState::Pausing, SlotState::Ready);
        }
        SlotState::Stopping => {
            payload.sink.stop();
            if let Err(e) = payload.source.rewind() {
                tracing::warn!(stream = idx, "rewind on stop failed: {e}");
            }
            slot.transition(SlotState::Stopping, SlotState::Ready);
        }
        SlotState::Streaming => {
            let sink = payload.sink.clone();
            if sink.poll(payload) == PollOutcome::Finished {
                sink.stop();
                slot.transition(SlotState::Streaming, SlotState::Ready);
            }
        }
        SlotState::Free | SlotState::Ready => {}
    }
}

/// Map the container format onto the sink start parameters, matching the
/// hardware start variants for 16-, 8- and 4-bit payloads.
fn start_params(info: &ContainerInfo) -> anyhow::Result<(ChannelMode, PayloadWidth)> {
    let channels = match info.channels {
        1 => ChannelMode::Mono,
        2 => ChannelMode::Stereo,
        n => anyhow::bail!("unsupported channel count {n}"),
    };
    let width = match info.bits_per_sample {
        16 => PayloadWidth::Pcm16,
        8 => PayloadWidth::Pcm8,
        4 => PayloadWidth::Adpcm4,
        n => anyhow::bail!("unsupported sample width {n}"),
    };
    Ok((channels, width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkBackend;
    use crate::sink::mock::MockBackend;
    use crate::slot::{Scratch, SlotPayload};
    use crate::source::BackingSource;
    use crate::wav::WaveFormat;

    fn registry_with_stream(
        backend: &MockBackend,
        payload_bytes: Vec<u8>,
        looped: bool,
    ) -> (StreamRegistry, usize) {
        let registry = StreamRegistry::new(backend.max_streams());
        let info = ContainerInfo {
            format: WaveFormat::Pcm,
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            data_offset: 0,
            data_length: payload_bytes.len() as u64,
        };
        let source = BackingSource::from_buffer(payload_bytes.into(), &info);
        let sink = backend.create_sink().unwrap();
        let idx = registry.allocate().unwrap();
        registry.install(
            idx,
            SlotPayload::new(info, source, Scratch::new(backend.max_request(), 1), sink, looped),
        );
        (registry, idx)
    }

    fn tick(registry: &StreamRegistry) {
        for idx in 0..registry.capacity() {
            tick_slot(idx, registry.slot(idx).unwrap());
        }
    }

    #[test]
    fn resuming_starts_the_sink_with_container_params() {
        let backend = MockBackend::new(1, 16);
        let (registry, idx) = registry_with_stream(&backend, vec![0u8; 8], false);
        let slot = registry.slot(idx).unwrap();

        slot.set_state(SlotState::Resuming);
        tick(&registry);
        assert_eq!(slot.state(), SlotState::Streaming);
        assert_eq!(
            backend.sink(0).starts.lock().unwrap().as_slice(),
            &[(44_100, ChannelMode::Stereo, PayloadWidth::Pcm16)]
        );
    }

    #[test]
    fn failed_start_returns_to_ready() {
        let backend = MockBackend::new(1, 16);
        let (registry, idx) = registry_with_stream(&backend, vec![0u8; 8], false);
        let slot = registry.slot(idx).unwrap();
        backend
            .sink(0)
            .fail_start
            .store(true, std::sync::atomic::Ordering::Relaxed);

        slot.set_state(SlotState::Resuming);
        tick(&registry);
        assert_eq!(slot.state(), SlotState::Ready);
    }

    #[test]
    fn pausing_stops_without_rewinding() {
        let backend = MockBackend::new(1, 8);
        let (registry, idx) = registry_with_stream(&backend, (0u8..8).collect(), false);
        let slot = registry.slot(idx).unwrap();

        slot.set_state(SlotState::Streaming);
        backend.sink(0).script([4]);
        tick(&registry);

        slot.set_state(SlotState::Pausing);
        tick(&registry);
        assert_eq!(slot.state(), SlotState::Ready);
        assert_eq!(backend.sink(0).stops.load(std::sync::atomic::Ordering::Relaxed), 1);

        // Resume picks up where the cursor was left.
        slot.set_state(SlotState::Streaming);
        backend.sink(0).script([4]);
        tick(&registry);
        assert_eq!(
            backend.sink(0).fed.lock().unwrap().as_slice(),
            &[0, 1, 2, 3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn stopping_rewinds_the_cursor() {
        let backend = MockBackend::new(1, 8);
        let (registry, idx) = registry_with_stream(&backend, (0u8..8).collect(), false);
        let slot = registry.slot(idx).unwrap();

        slot.set_state(SlotState::Streaming);
        backend.sink(0).script([4]);
        tick(&registry);

        slot.set_state(SlotState::Stopping);
        tick(&registry);
        assert_eq!(slot.state(), SlotState::Ready);

        slot.set_state(SlotState::Streaming);
        backend.sink(0).script([4]);
        tick(&registry);
        assert_eq!(
            backend.sink(0).fed.lock().unwrap().as_slice(),
            &[0, 1, 2, 3, 0, 1, 2, 3]
        );
    }

    #[test]
    fn finished_feeder_stops_and_readies_the_slot() {
        let backend = MockBackend::new(1, 8);
        let (registry, idx) = registry_with_stream(&backend, (0u8..8).collect(), false);
        let slot = registry.slot(idx).unwrap();

        slot.set_state(SlotState::Streaming);
        backend.sink(0).script([8, 8]);
        tick(&registry);
        assert_eq!(slot.state(), SlotState::Streaming);
        tick(&registry);
        assert_eq!(slot.state(), SlotState::Ready);
        assert_eq!(backend.sink(0).stops.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(backend.sink(0).fed.lock().unwrap().len(), 8);
    }

    #[test]
    fn unsupported_layouts_never_reach_the_sink() {
        let backend = MockBackend::new(1, 16);
        let registry = StreamRegistry::new(1);
        let info = ContainerInfo {
            format: WaveFormat::Pcm,
            channels: 6,
            sample_rate: 48_000,
            bits_per_sample: 24,
            data_offset: 0,
            data_length: 8,
        };
        let source = BackingSource::from_buffer(vec![0u8; 8].into(), &info);
        let sink = backend.create_sink().unwrap();
        let idx = registry.allocate().unwrap();
        registry.install(idx, SlotPayload::new(info, source, Scratch::new(16, 1), sink, false));

        let slot = registry.slot(idx).unwrap();
        slot.set_state(SlotState::Resuming);
        tick(&registry);
        assert_eq!(slot.state(), SlotState::Ready);
        assert_eq!(backend.sink(0).start_count(), 0);
    }

    #[test]
    fn shutdown_drains_every_occupied_slot() {
        let backend = MockBackend::new(2, 8);
        let (registry, idx) = registry_with_stream(&backend, vec![0u8; 8], false);
        let registry = Arc::new(registry);
        registry.slot(idx).unwrap().set_state(SlotState::Streaming);

        let shutdown = Arc::new(AtomicBool::new(true));
        run(registry.clone(), shutdown, Duration::from_millis(1));
        assert_eq!(registry.slot(idx).unwrap().state(), SlotState::Free);
        assert_eq!(backend.sink(0).stops.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
