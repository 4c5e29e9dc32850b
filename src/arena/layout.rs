// SPDX-License-Identifier: Apache-2.0 OR MIT

//! On-disk/shared-memory layout of a flow's backing file.
//!
//! ```text
//! Offset 0                 FlowHeader (HEADER_SIZE bytes, fixed)
//! + header.schema_blob_offset   schema blob (schema_blob_len bytes)
//! + header.index_ring_offset    RingControl (SLOT_SIZE bytes) followed by
//!                                history_depth GrainSlot records
//! + header.payload_arena_offset payload arena (history_depth * cell_size bytes)
//! ```
//!
//! Every region after the header is aligned to [`crate::config::SLOT_SIZE`]
//! so that `GrainSlot`/`RingControl` atomics never straddle a cache line.

use crate::config::{HEADER_SIZE, MAGIC, SLOT_SIZE, VERSION};
use crate::error::{Error, Result};
use uuid::Uuid;

/// Whether a flow publishes discrete, independently-addressable grains or a
/// continuous sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowVariant {
    Discrete = 0,
    Continuous = 1,
}

impl FlowVariant {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Discrete),
            1 => Ok(Self::Continuous),
            _ => Err(Error::Incompatible),
        }
    }
}

/// Rounds `n` up to the next multiple of [`SLOT_SIZE`].
const fn align_up(n: usize) -> usize {
    (n + (SLOT_SIZE - 1)) & !(SLOT_SIZE - 1)
}

/// Fixed-layout flow header. `repr(C)` field order is the on-disk layout;
/// every field is either a byte array or has matching natural alignment so
/// the compiler inserts no hidden padding before `_reserved_tail`.
#[repr(C)]
struct RawHeader {
    magic: u64,
    version: u16,
    variant: u8,
    _reserved: [u8; 5],
    flow_id: [u8; 16],
    edit_rate_num: u32,
    edit_rate_den: u32,
    history_depth: u64,
    cell_size: u64,
    index_ring_offset: u64,
    payload_arena_offset: u64,
    writer_epoch: u64,
    created_at: i64,
    schema_blob_offset: u64,
    schema_blob_len: u64,
    crc: u32,
    _reserved_tail: [u8; HEADER_SIZE - 108],
}

const _: () = assert!(std::mem::size_of::<RawHeader>() == HEADER_SIZE);

/// Parameters needed to lay out and initialize a brand-new flow file.
pub struct NewFlowLayout {
    pub flow_id: Uuid,
    pub variant: FlowVariant,
    pub edit_rate_num: u32,
    pub edit_rate_den: u32,
    pub history_depth: u64,
    pub cell_size: u64,
    pub schema_blob: Vec<u8>,
}

/// A validated view of a flow header plus the derived region offsets it
/// describes. Always a plain-old-data copy; never aliases the mapping.
#[derive(Debug, Clone, Copy)]
pub struct FlowLayout {
    pub flow_id: Uuid,
    pub variant: FlowVariant,
    pub edit_rate_num: u32,
    pub edit_rate_den: u32,
    pub history_depth: u64,
    pub cell_size: u64,
    pub index_ring_offset: u64,
    pub payload_arena_offset: u64,
    pub writer_epoch: u64,
    pub created_at: i64,
    pub schema_blob_offset: u64,
    pub schema_blob_len: u64,
}

impl FlowLayout {
    /// Total file size implied by this layout.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.payload_arena_offset + self.history_depth * self.cell_size
    }

    /// Byte offset and length of one payload cell in the arena.
    #[must_use]
    pub fn cell_span(&self, index: u64) -> (u64, u64) {
        let slot = index % self.history_depth;
        (self.payload_arena_offset + slot * self.cell_size, self.cell_size)
    }

    /// Plans the layout for a new flow. Does not touch any file; the caller
    /// uses this to size the backing file before mapping it.
    #[must_use]
    pub fn plan(params: &NewFlowLayout, writer_epoch: u64, created_at: i64) -> Self {
        let schema_offset = HEADER_SIZE as u64;
        let schema_len = params.schema_blob.len() as u64;
        let index_ring_offset = align_up((schema_offset + schema_len) as usize) as u64;
        let ring_bytes = SLOT_SIZE as u64 * (1 + params.history_depth);
        let payload_arena_offset = align_up((index_ring_offset + ring_bytes) as usize) as u64;

        Self {
            flow_id: params.flow_id,
            variant: params.variant,
            edit_rate_num: params.edit_rate_num,
            edit_rate_den: params.edit_rate_den,
            history_depth: params.history_depth,
            cell_size: params.cell_size,
            index_ring_offset,
            payload_arena_offset,
            writer_epoch,
            created_at,
            schema_blob_offset: schema_offset,
            schema_blob_len: schema_len,
        }
    }

    /// Serializes this layout into `HEADER_SIZE` bytes, CRC included.
    #[must_use]
    pub fn to_header_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut raw = RawHeader {
            magic: MAGIC,
            version: VERSION,
            variant: self.variant as u8,
            _reserved: [0; 5],
            flow_id: *self.flow_id.as_bytes(),
            edit_rate_num: self.edit_rate_num,
            edit_rate_den: self.edit_rate_den,
            history_depth: self.history_depth,
            cell_size: self.cell_size,
            index_ring_offset: self.index_ring_offset,
            payload_arena_offset: self.payload_arena_offset,
            writer_epoch: self.writer_epoch,
            created_at: self.created_at,
            schema_blob_offset: self.schema_blob_offset,
            schema_blob_len: self.schema_blob_len,
            crc: 0,
            _reserved_tail: [0; HEADER_SIZE - 108],
        };

        let bytes_without_crc = unsafe {
            std::slice::from_raw_parts(
                (&raw as *const RawHeader).cast::<u8>(),
                std::mem::offset_of!(RawHeader, crc),
            )
        };
        raw.crc = crc32fast::hash(bytes_without_crc);

        unsafe { std::mem::transmute::<RawHeader, [u8; HEADER_SIZE]>(raw) }
    }

    /// Parses and validates a header from raw bytes, checking magic, version
    /// and CRC before trusting any field.
    pub fn from_header_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let raw: RawHeader = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast()) };

        if raw.magic != MAGIC || raw.version != VERSION {
            return Err(Error::Incompatible);
        }

        let crc_offset = std::mem::offset_of!(RawHeader, crc);
        let computed = crc32fast::hash(&bytes[..crc_offset]);
        if computed != raw.crc {
            return Err(Error::Incompatible);
        }

        let variant = FlowVariant::from_u8(raw.variant)?;
        let flow_id = Uuid::from_bytes(raw.flow_id);

        Ok(Self {
            flow_id,
            variant,
            edit_rate_num: raw.edit_rate_num,
            edit_rate_den: raw.edit_rate_den,
            history_depth: raw.history_depth,
            cell_size: raw.cell_size,
            index_ring_offset: raw.index_ring_offset,
            payload_arena_offset: raw.payload_arena_offset,
            writer_epoch: raw.writer_epoch,
            created_at: raw.created_at,
            schema_blob_offset: raw.schema_blob_offset,
            schema_blob_len: raw.schema_blob_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NewFlowLayout {
        NewFlowLayout {
            flow_id: Uuid::new_v4(),
            variant: FlowVariant::Discrete,
            edit_rate_num: 30_000,
            edit_rate_den: 1_001,
            history_depth: 64,
            cell_size: 4096,
            schema_blob: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let layout = FlowLayout::plan(&params(), 1, 1_000);
        let bytes = layout.to_header_bytes();
        let parsed = FlowLayout::from_header_bytes(&bytes).unwrap();

        assert_eq!(parsed.flow_id, layout.flow_id);
        assert_eq!(parsed.variant, layout.variant);
        assert_eq!(parsed.history_depth, layout.history_depth);
        assert_eq!(parsed.index_ring_offset, layout.index_ring_offset);
        assert_eq!(parsed.payload_arena_offset, layout.payload_arena_offset);
    }

    #[test]
    fn corrupted_header_is_rejected() {
        let layout = FlowLayout::plan(&params(), 1, 1_000);
        let mut bytes = layout.to_header_bytes();
        bytes[20] ^= 0xFF;
        assert!(matches!(
            FlowLayout::from_header_bytes(&bytes),
            Err(Error::Incompatible)
        ));
    }

    #[test]
    fn regions_are_slot_aligned_and_non_overlapping() {
        let layout = FlowLayout::plan(&params(), 1, 1_000);
        assert_eq!(layout.index_ring_offset as usize % SLOT_SIZE, 0);
        assert_eq!(layout.payload_arena_offset as usize % SLOT_SIZE, 0);
        assert!(layout.index_ring_offset >= layout.schema_blob_offset + layout.schema_blob_len);
        assert!(
            layout.payload_arena_offset
                >= layout.index_ring_offset + SLOT_SIZE as u64 * (1 + layout.history_depth)
        );
    }

    #[test]
    fn file_size_covers_the_whole_payload_arena() {
        let layout = FlowLayout::plan(&params(), 1, 1_000);
        let (last_offset, last_len) = layout.cell_span(layout.history_depth - 1);
        assert!(layout.file_size() >= last_offset + last_len);
    }
}
