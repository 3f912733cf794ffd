//! Per-stream playback unit: state machine storage, scratch staging buffer,
//! filter chain, and the refill protocol implementation.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::sink::{RefillSource, Sink};
use crate::source::BackingSource;
use crate::wav::ContainerInfo;

/// Volume every slot starts with after allocation and reset.
pub(crate) const DEFAULT_VOLUME: u8 = 240;

/// Playback state of one slot. `Free` means unallocated; the three transient
/// states are requests the poller resolves on its next tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Free = 0,
    Ready = 1,
    Resuming = 2,
    Streaming = 3,
    Pausing = 4,
    Stopping = 5,
}

impl SlotState {
    pub(crate) fn from_u8(raw: u8) -> SlotState {
        match raw {
            1 => SlotState::Ready,
            2 => SlotState::Resuming,
            3 => SlotState::Streaming,
            4 => SlotState::Pausing,
            5 => SlotState::Stopping,
            _ => SlotState::Free,
        }
    }
}

/// Handle for a filter added to a stream, used to remove it again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterId(pub(crate) u64);

/// In-place byte transform applied to each refilled block before the sink
/// consumes it.
pub type Filter = Box<dyn FnMut(&ContainerInfo, &mut [u8]) + Send>;

/// Staging buffer for refill payload, honoring the sink's alignment
/// requirement. The backing allocation is never grown, so the aligned window
/// is stable for the buffer's lifetime.
pub(crate) struct Scratch {
    raw: Vec<u8>,
    offset: usize,
    len: usize,
}

impl Scratch {
    pub(crate) fn new(len: usize, align: usize) -> Self {
        let align = align.max(1);
        let raw = vec![0u8; len + align - 1];
        let offset = raw.as_ptr().align_offset(align);
        Self { raw, offset, len }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.len
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.raw[self.offset..self.offset + self.len]
    }

    #[cfg(test)]
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.raw[self.offset..].as_ptr()
    }
}

/// Everything an occupied slot owns. Guarded by the slot's payload mutex and
/// touched only by the poller during steady state; `destroy` takes the whole
/// payload out under the same lock.
pub(crate) struct SlotPayload {
    pub(crate) info: ContainerInfo,
    pub(crate) source: BackingSource,
    pub(crate) scratch: Scratch,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) loop_enabled: bool,
    pub(crate) filters: Vec<(FilterId, Filter)>,
    pub(crate) next_filter_id: u64,
}

impl SlotPayload {
    pub(crate) fn new(
        info: ContainerInfo,
        source: BackingSource,
        scratch: Scratch,
        sink: Arc<dyn Sink>,
        loop_enabled: bool,
    ) -> Self {
        Self {
            info,
            source,
            scratch,
            sink,
            loop_enabled,
            filters: Vec::new(),
            next_filter_id: 0,
        }
    }

    pub(crate) fn add_filter(&mut self, filter: Filter) -> FilterId {
        let id = FilterId(self.next_filter_id);
        self.next_filter_id += 1;
        self.filters.push((id, filter));
        id
    }

    pub(crate) fn remove_filter(&mut self, id: FilterId) -> bool {
        let before = self.filters.len();
        self.filters.retain(|(fid, _)| *fid != id);
        self.filters.len() != before
    }

    /// One pull of the refill protocol.
    ///
    /// Stages up to `want` bytes in scratch and returns them, or `None` when
    /// the payload is exhausted without looping (or a read failed). The
    /// cursor is rewound to the payload start before either loop branch, so a
    /// finished stream is replayable.
    pub(crate) fn refill(&mut self, want: usize) -> Option<&[u8]> {
        let want = want.min(self.scratch.capacity());
        if want == 0 {
            return None;
        }

        let take = if self.source.remaining() >= want as u64 {
            want
        } else {
            if let Err(e) = self.source.rewind() {
                tracing::warn!("rewind failed, ending stream: {e}");
                return None;
            }
            if !self.loop_enabled {
                return None;
            }
            // Loop restart. When the payload is shorter than the request the
            // block comes back short; the boundary may drop up to one
            // request's worth of tail samples by design of the protocol.
            want.min(self.source.remaining() as usize)
        };
        if take == 0 {
            return None;
        }

        let block = &mut self.scratch.as_mut_slice()[..take];
        if let Err(e) = self.source.read_exact(block) {
            tracing::warn!("payload read failed, ending stream: {e}");
            let _ = self.source.rewind();
            return None;
        }
        for (_, filter) in &mut self.filters {
            filter(&self.info, block);
        }
        Some(&self.scratch.as_mut_slice()[..take])
    }
}

impl RefillSource for SlotPayload {
    fn refill(&mut self, want: usize) -> Option<&[u8]> {
        SlotPayload::refill(self, want)
    }
}

/// One entry of the registry. The state atomic is the only field shared
/// across threads in steady state; the sink mutex exists so the volume path
/// can clone the handle without contending with an in-progress poll, which
/// holds the payload mutex.
pub(crate) struct StreamSlot {
    state: AtomicU8,
    volume: AtomicU8,
    pub(crate) sink: Mutex<Option<Arc<dyn Sink>>>,
    pub(crate) payload: Mutex<Option<SlotPayload>>,
}

impl StreamSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(SlotState::Free as u8),
            volume: AtomicU8::new(DEFAULT_VOLUME),
            sink: Mutex::new(None),
            payload: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Transition `from -> to` if nothing changed the state in between.
    pub(crate) fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    pub(crate) fn set_volume(&self, volume: u8) {
        self.volume.store(volume, Ordering::Relaxed);
    }
}
