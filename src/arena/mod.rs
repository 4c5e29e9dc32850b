// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared-memory arena: maps a flow's backing file and exposes typed views
//! over its header, index ring and payload arena.

pub mod layout;
pub mod segment;
pub mod slot;

use crate::config::HEADER_SIZE;
use crate::error::{Error, Result};
use layout::{FlowLayout, NewFlowLayout};
use segment::MappedFile;
use slot::{GrainSlot, RingControl};
use std::path::Path;

/// A mapped flow file plus the layout describing how to interpret it.
///
/// Both writers and readers hold one of these; the only difference is
/// whether the underlying [`MappedFile`] was created (and locked) or merely
/// opened.
pub struct FlowArena {
    mapped: MappedFile,
    layout: FlowLayout,
}

impl FlowArena {
    /// Lays out and maps a brand-new flow file, writing its header.
    ///
    /// # Errors
    ///
    /// [`Error::FlowBusy`] if another writer already holds the file lock,
    /// otherwise [`Error::Io`].
    pub fn create(path: &Path, params: &NewFlowLayout, writer_epoch: u64, created_at: i64) -> Result<Self> {
        let layout = FlowLayout::plan(params, writer_epoch, created_at);
        let mapped = MappedFile::create(path, layout.file_size() as usize)?;

        // SAFETY: the mapping is exactly `layout.file_size()` bytes and we
        // hold the writer's exclusive lock, so no other writer is touching
        // the header concurrently.
        unsafe {
            let header_ptr = mapped.as_ptr();
            std::ptr::copy_nonoverlapping(
                layout.to_header_bytes().as_ptr(),
                header_ptr,
                HEADER_SIZE,
            );
            if !params.schema_blob.is_empty() {
                let schema_ptr = header_ptr.add(layout.schema_blob_offset as usize);
                std::ptr::copy_nonoverlapping(
                    params.schema_blob.as_ptr(),
                    schema_ptr,
                    params.schema_blob.len(),
                );
            }
        }

        Ok(Self { mapped, layout })
    }

    /// Opens an existing flow file, validating its header before mapping the
    /// rest of it at the size the header claims.
    ///
    /// # Errors
    ///
    /// [`Error::Incompatible`] if the header's magic/version/CRC do not
    /// check out, otherwise [`Error::Io`].
    pub fn open(path: &Path) -> Result<Self> {
        let layout = Self::read_layout(path)?;
        let mapped = MappedFile::open(path, layout.file_size() as usize)?;
        Ok(Self { mapped, layout })
    }

    /// Like [`Self::open`], but reattaches as the flow's writer by taking
    /// its exclusive lock.
    ///
    /// # Errors
    ///
    /// [`Error::FlowBusy`] if another writer already holds the flow.
    pub fn open_for_writer(path: &Path) -> Result<Self> {
        let layout = Self::read_layout(path)?;
        let mapped = MappedFile::open_for_writer(path, layout.file_size() as usize)?;
        Ok(Self { mapped, layout })
    }

    fn read_layout(path: &Path) -> Result<FlowLayout> {
        let probe = MappedFile::open(path, HEADER_SIZE)?;
        // SAFETY: `probe` maps at least `HEADER_SIZE` bytes.
        let header_bytes: [u8; HEADER_SIZE] = unsafe { std::ptr::read(probe.as_ptr().cast()) };
        FlowLayout::from_header_bytes(&header_bytes)
    }

    #[must_use]
    pub fn layout(&self) -> &FlowLayout {
        &self.layout
    }

    #[must_use]
    pub fn is_writer(&self) -> bool {
        self.mapped.is_locked()
    }

    /// Read access to the schema blob stored alongside the header.
    #[must_use]
    pub fn schema_blob(&self) -> &[u8] {
        // SAFETY: the range [schema_blob_offset, +schema_blob_len) was
        // validated to lie within the mapping when the layout was parsed or
        // planned (both derive it from the same arithmetic as `file_size`).
        unsafe {
            std::slice::from_raw_parts(
                self.mapped.as_ptr().add(self.layout.schema_blob_offset as usize),
                self.layout.schema_blob_len as usize,
            )
        }
    }

    #[must_use]
    pub fn ring_control(&self) -> &RingControl {
        // SAFETY: `index_ring_offset` is slot-aligned and the mapping spans
        // at least one `RingControl` plus `history_depth` slots past it.
        unsafe {
            &*self
                .mapped
                .as_ptr()
                .add(self.layout.index_ring_offset as usize)
                .cast::<RingControl>()
        }
    }

    /// The `GrainSlot` for a given grain/sample-batch index, selected by
    /// `index % history_depth`.
    #[must_use]
    pub fn slot(&self, index: u64) -> &GrainSlot {
        let slot_index = index % self.layout.history_depth;
        let offset = self.layout.index_ring_offset as usize
            + crate::config::SLOT_SIZE * (1 + slot_index as usize);
        // SAFETY: `slot_index < history_depth`, and the mapping reserves
        // `SLOT_SIZE * (1 + history_depth)` bytes starting at
        // `index_ring_offset` for exactly this control block + slot array.
        unsafe { &*self.mapped.as_ptr().add(offset).cast::<GrainSlot>() }
    }

    /// Mutable byte slice over the payload cell backing `index`.
    ///
    /// # Safety
    ///
    /// The caller must hold the only outstanding write access to this cell
    /// (true for a flow's single writer by construction: readers never call
    /// this method).
    #[must_use]
    pub unsafe fn cell_mut(&self, index: u64) -> &mut [u8] {
        let (offset, len) = self.layout.cell_span(index);
        std::slice::from_raw_parts_mut(self.mapped.as_ptr().add(offset as usize), len as usize)
    }

    /// Shared byte slice over the payload cell backing `index`.
    #[must_use]
    pub fn cell(&self, index: u64) -> &[u8] {
        let (offset, len) = self.layout.cell_span(index);
        // SAFETY: `offset + len` lies within the mapping by construction of
        // `FlowLayout::plan`/`file_size`.
        unsafe { std::slice::from_raw_parts(self.mapped.as_ptr().add(offset as usize), len as usize) }
    }

}

/// One contiguous byte span of a continuous sample batch.
#[derive(Debug, Clone, Copy)]
pub struct ContinuousFragment {
    pub byte_offset: u64,
    pub sample_count: u64,
}

impl FlowArena {
    /// Splits a continuous sample range `[start_index, start_index + count)`
    /// into the one or two contiguous byte fragments it occupies in the
    /// payload arena, wrapping at `history_depth` samples.
    #[must_use]
    pub fn continuous_fragments(
        &self,
        start_index: u64,
        count: u64,
    ) -> (ContinuousFragment, Option<ContinuousFragment>) {
        let depth = self.layout.history_depth;
        let stride = self.layout.cell_size;
        let start_slot = start_index % depth;
        let remaining_in_ring = depth - start_slot;

        let first = ContinuousFragment {
            byte_offset: self.layout.payload_arena_offset + start_slot * stride,
            sample_count: count.min(remaining_in_ring),
        };

        if count <= remaining_in_ring {
            (first, None)
        } else {
            let second = ContinuousFragment {
                byte_offset: self.layout.payload_arena_offset,
                sample_count: count - remaining_in_ring,
            };
            (first, Some(second))
        }
    }

    /// Shared byte slice for a continuous fragment.
    #[must_use]
    pub fn fragment_bytes(&self, fragment: ContinuousFragment) -> &[u8] {
        let len = (fragment.sample_count * self.layout.cell_size) as usize;
        // SAFETY: fragments are always derived from `continuous_fragments`,
        // which keeps every offset/length pair within the payload arena.
        unsafe {
            std::slice::from_raw_parts(self.mapped.as_ptr().add(fragment.byte_offset as usize), len)
        }
    }

    /// Mutable byte slice for a continuous fragment.
    ///
    /// # Safety
    ///
    /// The caller must be the flow's single writer.
    #[must_use]
    pub unsafe fn fragment_bytes_mut(&self, fragment: ContinuousFragment) -> &mut [u8] {
        let len = (fragment.sample_count * self.layout.cell_size) as usize;
        std::slice::from_raw_parts_mut(self.mapped.as_ptr().add(fragment.byte_offset as usize), len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn params() -> NewFlowLayout {
        NewFlowLayout {
            flow_id: Uuid::new_v4(),
            variant: layout::FlowVariant::Discrete,
            edit_rate_num: 25,
            edit_rate_den: 1,
            history_depth: 8,
            cell_size: 256,
            schema_blob: vec![9, 9, 9],
        }
    }

    #[test]
    fn create_then_open_sees_the_same_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let p = params();
        let flow_id = p.flow_id;
        let arena = FlowArena::create(&path, &p, 1, 1_000).unwrap();
        assert!(arena.is_writer());
        assert_eq!(arena.schema_blob(), &[9, 9, 9]);
        drop(arena);

        let opened = FlowArena::open(&path).unwrap();
        assert!(!opened.is_writer());
        assert_eq!(opened.layout().flow_id, flow_id);
        assert_eq!(opened.layout().history_depth, 8);
    }

    #[test]
    fn slot_and_cell_accessors_stay_in_bounds_across_the_ring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let arena = FlowArena::create(&path, &params(), 1, 1_000).unwrap();

        for index in 0..20u64 {
            let slot = arena.slot(index);
            assert!(!slot.is_writing());
            let cell = arena.cell(index);
            assert_eq!(cell.len(), 256);
        }
    }

    #[test]
    fn continuous_fragments_split_at_the_ring_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let arena = FlowArena::create(&path, &params(), 1, 1_000).unwrap();

        let (only, second) = arena.continuous_fragments(0, 4);
        assert_eq!(only.sample_count, 4);
        assert!(second.is_none());

        let (first, second) = arena.continuous_fragments(6, 4);
        assert_eq!(first.sample_count, 2);
        let second = second.unwrap();
        assert_eq!(second.sample_count, 2);
        assert_eq!(second.byte_offset, arena.layout().payload_arena_offset);
    }

    #[test]
    fn open_for_writer_reattaches_and_blocks_a_second_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let arena = FlowArena::create(&path, &params(), 1, 1_000).unwrap();
        drop(arena);

        let reattached = FlowArena::open_for_writer(&path).unwrap();
        assert!(reattached.is_writer());

        let second = FlowArena::open_for_writer(&path);
        assert!(matches!(second, Err(Error::FlowBusy)));
    }
}
