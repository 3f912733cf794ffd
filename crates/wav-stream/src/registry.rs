//! Fixed-capacity pool of stream slots.
//!
//! Capacity mirrors the sink backend's stream limit, so the pool is an array
//! with a linear scan, never a growable collection. A slot is claimed by a
//! compare-exchange on its state atomic, which makes allocation safe against
//! concurrent callers without a pool-wide lock.

use std::sync::Arc;

use crate::sink::Sink;
use crate::slot::{DEFAULT_VOLUME, SlotPayload, SlotState, StreamSlot};

/// Opaque id of an allocated stream, valid until `destroy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamId(pub(crate) usize);

pub(crate) struct StreamRegistry {
    slots: Box<[StreamSlot]>,
}

impl StreamRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| StreamSlot::new()).collect(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, idx: usize) -> Option<&StreamSlot> {
        self.slots.get(idx)
    }

    /// Claim the first free slot. The claim flips the slot to `Ready` before
    /// its payload exists; the poller skips payload-less slots, and the
    /// caller either installs a payload or releases the claim.
    pub(crate) fn allocate(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.transition(SlotState::Free, SlotState::Ready))
    }

    /// Install the working set of a freshly claimed slot and reset its volume
    /// to the default.
    pub(crate) fn install(&self, idx: usize, payload: SlotPayload) {
        let slot = &self.slots[idx];
        let sink: Arc<dyn Sink> = payload.sink.clone();
        sink.set_volume(DEFAULT_VOLUME);
        slot.set_volume(DEFAULT_VOLUME);
        *slot.sink.lock().unwrap() = Some(sink);
        *slot.payload.lock().unwrap() = Some(payload);
    }

    /// Undo a claim whose creation failed partway; any resources the caller
    /// acquired are already released by then.
    pub(crate) fn release_claim(&self, idx: usize) {
        let _ = self.slots[idx].transition(SlotState::Ready, SlotState::Free);
    }

    /// Free a slot unconditionally. Idempotent; invalid ids are no-ops. The
    /// sink is stopped and all resources dropped under the payload lock, and
    /// `Free` is published last so a concurrent `allocate` can only claim a
    /// fully released slot.
    pub(crate) fn free(&self, idx: usize) {
        let Some(slot) = self.slots.get(idx) else {
            return;
        };
        let mut payload = slot.payload.lock().unwrap();
        if let Some(taken) = payload.take() {
            taken.sink.stop();
            // Dropping the payload closes the file handle and releases the
            // scratch buffer and the sink handle.
            *slot.sink.lock().unwrap() = None;
            slot.set_volume(DEFAULT_VOLUME);
            slot.set_state(SlotState::Free);
        } else {
            // A claim that never got its payload installed; a slot that is
            // already free stays untouched.
            let _ = slot.transition(SlotState::Ready, SlotState::Free);
        }
        drop(payload);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::sink::SinkBackend;
    use crate::sink::mock::MockBackend;
    use crate::slot::Scratch;
    use crate::source::BackingSource;
    use crate::wav::{ContainerInfo, WaveFormat};

    fn test_payload(backend: &MockBackend) -> SlotPayload {
        let info = ContainerInfo {
            format: WaveFormat::Pcm,
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            data_offset: 0,
            data_length: 8,
        };
        let source = BackingSource::from_buffer(vec![0u8; 8].into(), &info);
        let sink = backend.create_sink().unwrap();
        SlotPayload::new(info, source, Scratch::new(16, 1), sink, false)
    }

    #[test]
    fn pool_exhaustion_and_reuse() {
        let backend = MockBackend::new(2, 16);
        let registry = StreamRegistry::new(2);

        let a = registry.allocate().unwrap();
        let b = registry.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.allocate(), None);

        registry.free(a);
        assert_eq!(registry.allocate(), Some(a));
        let _ = backend;
    }

    #[test]
    fn free_stops_the_sink_and_is_idempotent() {
        let backend = MockBackend::new(1, 16);
        let registry = StreamRegistry::new(1);
        let idx = registry.allocate().unwrap();
        registry.install(idx, test_payload(&backend));

        let sink = backend.sink(0);
        registry.free(idx);
        assert_eq!(sink.stops.load(Ordering::Relaxed), 1);
        assert_eq!(registry.slot(idx).unwrap().state(), SlotState::Free);

        // Freeing again, or freeing nonsense ids, does nothing.
        registry.free(idx);
        registry.free(999);
        assert_eq!(sink.stops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn install_applies_the_default_volume() {
        let backend = MockBackend::new(1, 16);
        let registry = StreamRegistry::new(1);
        let idx = registry.allocate().unwrap();
        registry.install(idx, test_payload(&backend));

        assert_eq!(registry.slot(idx).unwrap().volume(), DEFAULT_VOLUME);
        assert_eq!(backend.sink(0).volumes.lock().unwrap().as_slice(), &[240]);
    }

    #[test]
    fn released_claim_is_reallocatable() {
        let registry = StreamRegistry::new(1);
        let idx = registry.allocate().unwrap();
        assert_eq!(registry.allocate(), None);
        registry.release_claim(idx);
        assert_eq!(registry.allocate(), Some(idx));
    }
}
