// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Index-ring structures: the seqlock-protected grain slot and the shared
//! ring control block.
//!
//! # Seqlock protocol
//!
//! `generation` starts even (stable). A writer:
//!
//! 1. Stores `generation | 1` with `Relaxed` (now odd: readers must not
//!    trust the payload fields).
//! 2. Writes `index`, `commit_timestamp`, `total_slices`, `valid_slices`,
//!    `payload_offset`, `payload_len`.
//! 3. Stores `generation + 2` with `Release` (back to even: safe to read).
//!
//! A reader loads `generation` with `Acquire`, reads the fields, then loads
//! `generation` again with `Acquire`. If either load was odd or the two
//! loads differ, the read was torn and must be retried (the caller reports
//! [`crate::Error::UnderWrite`] after [`crate::config::UNDER_WRITE_SPIN_BUDGET`]
//! such retries).

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Fixed size of one index-ring slot record, cache-line aligned.
#[repr(C, align(64))]
pub struct GrainSlot {
    generation: AtomicU64,
    index: AtomicU64,
    commit_timestamp: AtomicI64,
    total_slices: AtomicU32,
    valid_slices: AtomicU32,
    payload_offset: AtomicU64,
    payload_len: AtomicU64,
    _pad: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<GrainSlot>() == 64);

/// A torn-free snapshot of a [`GrainSlot`]'s contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrainSnapshot {
    pub index: u64,
    pub commit_timestamp: i64,
    pub total_slices: u32,
    pub valid_slices: u32,
    pub payload_offset: u64,
    pub payload_len: u64,
}

impl GrainSlot {
    /// Begins a write: flips `generation` to odd. Must be followed by
    /// [`Self::commit`] once the fields below have been written.
    #[inline]
    pub fn begin_write(&self) {
        let current = self.generation.load(Ordering::Relaxed);
        self.generation.store(current | 1, Ordering::Relaxed);
    }

    /// Writes the slot's fields. Only valid between [`Self::begin_write`]
    /// and [`Self::commit`].
    #[inline]
    pub fn write_fields(&self, snapshot: GrainSnapshot) {
        self.index.store(snapshot.index, Ordering::Relaxed);
        self.commit_timestamp
            .store(snapshot.commit_timestamp, Ordering::Relaxed);
        self.total_slices
            .store(snapshot.total_slices, Ordering::Relaxed);
        self.valid_slices
            .store(snapshot.valid_slices, Ordering::Relaxed);
        self.payload_offset
            .store(snapshot.payload_offset, Ordering::Relaxed);
        self.payload_len
            .store(snapshot.payload_len, Ordering::Relaxed);
    }

    /// Commits the write: advances `generation` to the next even value,
    /// publishing every field written since [`Self::begin_write`].
    #[inline]
    pub fn commit(&self) {
        let current = self.generation.load(Ordering::Relaxed);
        let next_even = (current | 1) + 1;
        self.generation.store(next_even, Ordering::Release);
    }

    /// `true` if a write is currently in progress (`generation` is odd).
    #[inline]
    pub fn is_writing(&self) -> bool {
        self.generation.load(Ordering::Acquire) & 1 == 1
    }

    /// Attempts a torn-read-free snapshot. Returns `None` if the slot has
    /// never been committed (generation still at its zeroed initial value),
    /// a write was in progress, or a write landed mid-read; the caller
    /// retries or reports not-ready.
    pub fn try_read(&self) -> Option<GrainSnapshot> {
        let before = self.generation.load(Ordering::Acquire);
        if before == 0 || before & 1 == 1 {
            return None;
        }

        let snapshot = GrainSnapshot {
            index: self.index.load(Ordering::Relaxed),
            commit_timestamp: self.commit_timestamp.load(Ordering::Relaxed),
            total_slices: self.total_slices.load(Ordering::Relaxed),
            valid_slices: self.valid_slices.load(Ordering::Relaxed),
            payload_offset: self.payload_offset.load(Ordering::Relaxed),
            payload_len: self.payload_len.load(Ordering::Relaxed),
        };

        let after = self.generation.load(Ordering::Acquire);
        if after != before {
            return None;
        }

        Some(snapshot)
    }

    /// The index last published into this slot, without torn-read
    /// protection. Used for cheap pre-checks before a full [`Self::try_read`].
    #[inline]
    pub fn peek_index(&self) -> u64 {
        self.index.load(Ordering::Relaxed)
    }
}

/// Control block preceding the `history_depth` [`GrainSlot`] records in the
/// index ring. Tracks the highest index either variant has committed so
/// readers can cheaply test readiness before touching any slot.
///
/// The backing file is zero-filled on creation (see
/// [`crate::arena::segment::MappedFile::create`]), so a raw `head_index` of
/// `0` is indistinguishable from "index 0 has been committed" unless
/// something else records whether a commit has ever happened. `committed`
/// is that flag: [`Self::head_index`] returns
/// [`crate::time::UNDEFINED_INDEX`] until the writer's first
/// [`Self::publish_head`] call sets it.
#[repr(C, align(64))]
pub struct RingControl {
    head_index: AtomicU64,
    committed: std::sync::atomic::AtomicBool,
    _pad: [u8; 55],
}

const _: () = assert!(std::mem::size_of::<RingControl>() == 64);

impl RingControl {
    /// `true` once the writer has published at least one index.
    #[inline]
    pub fn has_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    /// Highest index committed to the ring so far, or
    /// [`crate::time::UNDEFINED_INDEX`] if nothing has been written yet.
    #[inline]
    pub fn head_index(&self) -> u64 {
        if self.has_committed() {
            self.head_index.load(Ordering::Acquire)
        } else {
            crate::time::UNDEFINED_INDEX
        }
    }

    /// Unconditionally publishes a new head index. Must be called after the
    /// corresponding slot's [`GrainSlot::commit`] so readers never observe
    /// an advanced head pointing at a slot still mid-write.
    #[inline]
    pub fn publish_head(&self, index: u64) {
        self.head_index.store(index, Ordering::Release);
        self.committed.store(true, Ordering::Release);
    }

    /// Publishes `index` as the new head only if it is newer than the
    /// current one, or nothing has been published yet. Discrete commits can
    /// race their own stale-index rejection in `FlowWriter::open_grain`, so
    /// this is the call site that keeps the head monotonic despite that.
    #[inline]
    pub fn advance_head(&self, index: u64) {
        if !self.has_committed() || index >= self.head_index() {
            self.publish_head(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    fn zeroed_slot() -> GrainSlot {
        unsafe { MaybeUninit::zeroed().assume_init() }
    }

    fn zeroed_control() -> RingControl {
        unsafe { MaybeUninit::zeroed().assume_init() }
    }

    #[test]
    fn slot_is_cache_line_sized_and_aligned() {
        assert_eq!(std::mem::size_of::<GrainSlot>(), 64);
        assert_eq!(std::mem::align_of::<GrainSlot>(), 64);
    }

    #[test]
    fn control_is_cache_line_sized_and_aligned() {
        assert_eq!(std::mem::size_of::<RingControl>(), 64);
        assert_eq!(std::mem::align_of::<RingControl>(), 64);
    }

    #[test]
    fn write_then_read_round_trips() {
        let slot = zeroed_slot();
        let snapshot = GrainSnapshot {
            index: 42,
            commit_timestamp: 1_000,
            total_slices: 4,
            valid_slices: 4,
            payload_offset: 8192,
            payload_len: 1024,
        };

        slot.begin_write();
        assert!(slot.is_writing());
        slot.write_fields(snapshot);
        slot.commit();

        assert!(!slot.is_writing());
        assert_eq!(slot.try_read(), Some(snapshot));
    }

    #[test]
    fn read_during_write_returns_none() {
        let slot = zeroed_slot();
        slot.begin_write();
        assert_eq!(slot.try_read(), None);
    }

    #[test]
    fn successive_commits_keep_generation_even() {
        let slot = zeroed_slot();
        for i in 0..5u64 {
            slot.begin_write();
            slot.write_fields(GrainSnapshot {
                index: i,
                commit_timestamp: i as i64,
                total_slices: 1,
                valid_slices: 1,
                payload_offset: 0,
                payload_len: 0,
            });
            slot.commit();
            assert!(!slot.is_writing());
        }
        assert_eq!(slot.try_read().unwrap().index, 4);
    }

    #[test]
    fn ring_control_publishes_head() {
        let control = zeroed_control();
        assert!(!control.has_committed());
        assert_eq!(control.head_index(), crate::time::UNDEFINED_INDEX);
        control.publish_head(7);
        assert!(control.has_committed());
        assert_eq!(control.head_index(), 7);
    }

    #[test]
    fn ring_control_advance_head_accepts_index_zero_as_first_commit() {
        let control = zeroed_control();
        control.advance_head(0);
        assert!(control.has_committed());
        assert_eq!(control.head_index(), 0);
    }

    #[test]
    fn ring_control_advance_head_rejects_stale_index() {
        let control = zeroed_control();
        control.advance_head(5);
        control.advance_head(3);
        assert_eq!(control.head_index(), 5);
    }
}
