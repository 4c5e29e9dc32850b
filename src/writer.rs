// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flow writer: the single-producer side of a flow.
//!
//! A [`FlowWriter`] never blocks for a reader and tolerates any number of
//! them, including zero. Discrete grains are published through the Seqlock
//! in [`crate::arena::slot::GrainSlot`]; continuous sample batches are
//! published through the monotonically increasing head index alone.

use crate::arena::{layout::FlowVariant, FlowArena};
use crate::error::{Error, Result};
use crate::time::{self, EditRate};

/// Caller-filled bookkeeping for one in-progress discrete grain write,
/// returned from [`FlowWriter::open_grain`] alongside the payload buffer.
pub struct GrainWriteInfo {
    index: u64,
    total_slices: u32,
    valid_slices: u32,
}

impl GrainWriteInfo {
    /// Records how many of this grain's slices have been written so far.
    /// Clamped to `total_slices`.
    pub fn set_valid_slices(&mut self, count: u32) {
        self.valid_slices = count.min(self.total_slices);
    }

    #[must_use]
    pub fn valid_slices(&self) -> u32 {
        self.valid_slices
    }

    #[must_use]
    pub fn total_slices(&self) -> u32 {
        self.total_slices
    }

    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }
}

/// A continuous sample batch reserved for writing, as up to two contiguous
/// byte fragments (the batch wraps at most once around the ring).
pub struct SampleWriteSlice<'a> {
    start_index: u64,
    count: u64,
    first: &'a mut [u8],
    second: Option<&'a mut [u8]>,
}

impl<'a> SampleWriteSlice<'a> {
    /// The two fragments backing this batch, in index order. The second is
    /// present only when the batch crossed the ring boundary.
    pub fn fragments_mut(&mut self) -> (&mut [u8], Option<&mut [u8]>) {
        (self.first, self.second.as_deref_mut())
    }

    #[must_use]
    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// The single-writer side of a flow.
pub struct FlowWriter {
    arena: FlowArena,
}

impl FlowWriter {
    pub(crate) fn new(arena: FlowArena) -> Self {
        Self { arena }
    }

    #[must_use]
    pub fn edit_rate(&self) -> EditRate {
        EditRate::new(self.arena.layout().edit_rate_num, self.arena.layout().edit_rate_den)
    }

    #[must_use]
    pub fn variant(&self) -> FlowVariant {
        self.arena.layout().variant
    }

    #[must_use]
    pub fn history_depth(&self) -> u64 {
        self.arena.layout().history_depth
    }

    /// Begins a discrete grain write at `index`, expecting `total_slices`
    /// slices of payload work to follow.
    ///
    /// # Errors
    ///
    /// [`Error::Stale`] if `index` does not advance past the index already
    /// committed to this grain's cell (protects against rewriting
    /// just-published history out of order).
    pub fn open_grain(&self, index: u64, total_slices: u32) -> Result<(GrainWriteInfo, &mut [u8])> {
        let slot = self.arena.slot(index);
        if let Some(snapshot) = slot.try_read() {
            if snapshot.index != time::UNDEFINED_INDEX && index <= snapshot.index {
                return Err(Error::Stale);
            }
        }

        slot.begin_write();

        // SAFETY: this writer holds the flow's exclusive lock, so it is the
        // only party mutating this cell; the slot's odd generation tells
        // readers not to trust the payload meanwhile.
        let buffer = unsafe { self.arena.cell_mut(index) };

        let info = GrainWriteInfo {
            index,
            total_slices,
            valid_slices: 0,
        };
        Ok((info, buffer))
    }

    /// Finalizes a discrete grain write, publishing the slot and advancing
    /// the shared head index with a release fence.
    ///
    /// Takes `&self`, not `&mut self`: a flow has exactly one writer for its
    /// whole lifetime (enforced by the header's `flock`), so there is never
    /// a second caller this could race against, and every field it touches
    /// is already behind an atomic (the seqlock generation, the head index).
    /// This is what lets a [`FlowWriter`] live behind a plain `Arc` — see
    /// [`crate::instance::Instance::create_flow_writer`].
    pub fn commit_grain(&self, info: &GrainWriteInfo) -> Result<()> {
        let (offset, len) = self.arena.layout().cell_span(info.index);
        let slot = self.arena.slot(info.index);
        slot.write_fields(crate::arena::slot::GrainSnapshot {
            index: info.index,
            commit_timestamp: time::now_tai(),
            total_slices: info.total_slices,
            valid_slices: info.valid_slices,
            payload_offset: offset,
            payload_len: len,
        });
        slot.commit();

        self.arena.ring_control().advance_head(info.index);
        Ok(())
    }

    /// Reserves `count` samples starting at `start_index` for writing. May
    /// span two fragments if the batch crosses the ring boundary.
    pub fn open_samples(&self, start_index: u64, count: u64) -> Result<SampleWriteSlice<'_>> {
        if matches!(self.variant(), FlowVariant::Discrete) {
            return Err(Error::BadArg("open_samples requires a continuous flow"));
        }

        let (first, second) = self.arena.continuous_fragments(start_index, count);
        // SAFETY: this writer holds the flow's exclusive lock.
        let first_bytes = unsafe { self.arena.fragment_bytes_mut(first) };
        let second_bytes = second.map(|f| unsafe { self.arena.fragment_bytes_mut(f) });

        Ok(SampleWriteSlice {
            start_index,
            count,
            first: first_bytes,
            second: second_bytes,
        })
    }

    /// Publishes a previously opened sample batch by advancing the shared
    /// head index to `start_index + count - 1` with a release fence.
    ///
    /// The caller must have finished writing (and dropped) the
    /// [`SampleWriteSlice`] from the matching [`Self::open_samples`] call
    /// before calling this: nothing stops them being live at the same time,
    /// but a reader that observes the new head index before the writes to
    /// that fragment land would read torn sample data.
    pub fn commit_samples(&self, start_index: u64, count: u64) -> Result<()> {
        let new_head = start_index + count - 1;
        self.arena.ring_control().advance_head(new_head);
        Ok(())
    }
}
