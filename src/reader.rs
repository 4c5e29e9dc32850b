// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flow reader: the multi-consumer side of a flow.
//!
//! Point-in-time reads are lock-free and spin-bounded; blocking waits use an
//! adaptive poll driven by the edit rate instead of any OS futex on the
//! mapped region (the file may outlive every process touching it).

use crate::arena::layout::FlowVariant;
use crate::arena::FlowArena;
use crate::config::UNDER_WRITE_SPIN_BUDGET;
use crate::error::{Error, Result};
use crate::time::{self, EditRate, GrainIndex, Timepoint};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free snapshot of a flow's shared runtime state.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeInfo {
    /// [`crate::time::UNDEFINED_INDEX`] if the writer has not committed
    /// anything yet.
    pub head_index: u64,
    pub edit_rate: EditRate,
    pub variant: FlowVariant,
    pub history_depth: u64,
}

/// Discrete grain metadata returned alongside its payload.
#[derive(Debug, Clone, Copy)]
pub struct GrainInfo {
    pub index: u64,
    pub commit_timestamp: Timepoint,
    pub total_slices: u32,
    pub valid_slices: u32,
    /// Filled with the number of samples actually available when a
    /// continuous read comes back short (see [`FlowReader::get_samples`]).
    pub available_count: u64,
}

/// Process-local diagnostics. Never written to shared memory; has no
/// bearing on protocol correctness.
#[derive(Debug, Default)]
pub struct ReaderMetrics {
    pub grains_read: AtomicU64,
    pub stale_skips: AtomicU64,
    pub under_write_retries: AtomicU64,
    pub timeouts: AtomicU64,
}

/// A consistent snapshot of [`ReaderMetrics`]' counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderMetricsSnapshot {
    pub grains_read: u64,
    pub stale_skips: u64,
    pub under_write_retries: u64,
    pub timeouts: u64,
}

impl ReaderMetrics {
    #[must_use]
    pub fn snapshot(&self) -> ReaderMetricsSnapshot {
        ReaderMetricsSnapshot {
            grains_read: self.grains_read.load(Ordering::Relaxed),
            stale_skips: self.stale_skips.load(Ordering::Relaxed),
            under_write_retries: self.under_write_retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// The multi-reader side of a flow.
pub struct FlowReader {
    arena: FlowArena,
    pub metrics: ReaderMetrics,
}

impl FlowReader {
    pub(crate) fn new(arena: FlowArena) -> Self {
        Self {
            arena,
            metrics: ReaderMetrics::default(),
        }
    }

    #[must_use]
    pub fn get_runtime_info(&self) -> RuntimeInfo {
        let layout = self.arena.layout();
        RuntimeInfo {
            head_index: self.arena.ring_control().head_index(),
            edit_rate: EditRate::new(layout.edit_rate_num, layout.edit_rate_den),
            variant: layout.variant,
            history_depth: layout.history_depth,
        }
    }

    #[must_use]
    pub fn schema_blob(&self) -> &[u8] {
        self.arena.schema_blob()
    }

    /// Fetches a single discrete grain without blocking.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] if the slot has not committed `index` yet,
    /// [`Error::Stale`] if the ring has wrapped past it, [`Error::UnderWrite`]
    /// if the slot stayed mid-write past [`UNDER_WRITE_SPIN_BUDGET`] retries.
    pub fn get_grain(&self, index: GrainIndex) -> Result<(GrainInfo, &[u8])> {
        let slot = self.arena.slot(index);
        let control = self.arena.ring_control();

        if !control.has_committed() {
            return Err(Error::NotReady { available_count: 0 });
        }

        let head = control.head_index();
        if head >= self.arena.layout().history_depth && index + self.arena.layout().history_depth <= head {
            self.metrics.stale_skips.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Stale);
        }

        let mut retries = 0;
        loop {
            if slot.is_writing() {
                retries += 1;
                if retries > UNDER_WRITE_SPIN_BUDGET {
                    self.metrics.under_write_retries.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::UnderWrite);
                }
                std::hint::spin_loop();
                continue;
            }

            return match slot.try_read() {
                Some(snapshot) if snapshot.index == index => {
                    self.metrics.grains_read.fetch_add(1, Ordering::Relaxed);
                    let info = GrainInfo {
                        index: snapshot.index,
                        commit_timestamp: snapshot.commit_timestamp,
                        total_slices: snapshot.total_slices,
                        valid_slices: snapshot.valid_slices,
                        available_count: 0,
                    };
                    let payload = self.arena.cell(index);
                    Ok((info, payload))
                }
                Some(_) | None => Err(Error::NotReady { available_count: 0 }),
            };
        }
    }

    /// Fetches up to `count` continuous samples starting at `start_index`
    /// without blocking. Returns a short read (with `info.available_count`
    /// filled) as [`Error::NotReady`] rather than partial data.
    pub fn get_samples(&self, start_index: GrainIndex, count: u64) -> Result<(GrainInfo, Vec<u8>)> {
        let control = self.arena.ring_control();
        if !control.has_committed() {
            return Err(Error::NotReady { available_count: 0 });
        }

        let head = control.head_index();
        let available = if start_index > head {
            0
        } else {
            head - start_index + 1
        };

        if start_index + count.saturating_sub(1) > head {
            return Err(Error::NotReady {
                available_count: available.min(count),
            });
        }

        let (first, second) = self.arena.continuous_fragments(start_index, count);
        let mut buf = Vec::with_capacity((count * self.arena.layout().cell_size) as usize);
        buf.extend_from_slice(self.arena.fragment_bytes(first));
        if let Some(second) = second {
            buf.extend_from_slice(self.arena.fragment_bytes(second));
        }

        self.metrics.grains_read.fetch_add(1, Ordering::Relaxed);
        let info = GrainInfo {
            index: start_index,
            commit_timestamp: time::now_tai(),
            total_slices: 0,
            valid_slices: 0,
            available_count: count,
        };
        Ok((info, buf))
    }

    /// Blocks until `head_index >= index` and the slot's `valid_slices` is
    /// at least `min_valid_slices`, or `deadline` passes.
    ///
    /// Implemented as a bounded adaptive poll: spin briefly, then sleep for
    /// `nsUntilIndex(index, rate)`, then retry. Never waits past `deadline`,
    /// and never touches an OS futex on the mapped region.
    pub fn wait_for_grain(
        &self,
        index: GrainIndex,
        min_valid_slices: u32,
        deadline: Timepoint,
    ) -> Result<()> {
        let rate = self.get_runtime_info().edit_rate;

        loop {
            for _ in 0..UNDER_WRITE_SPIN_BUDGET {
                match self.get_grain(index) {
                    Ok((info, _)) if info.valid_slices >= min_valid_slices => return Ok(()),
                    Ok(_) | Err(Error::NotReady { .. }) => std::hint::spin_loop(),
                    Err(other) => return Err(other),
                }
            }

            if time::now_tai() >= deadline {
                self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Timeout);
            }

            let wait_ns = time::ns_until_index(index, rate);
            let remaining_ns = (deadline - time::now_tai()).max(0) as u64;
            time::sleep_for_ns(wait_ns.min(remaining_ns.max(1)));
        }
    }

    /// Blocks until `head_index >= index`, or `deadline` passes.
    pub fn wait_for_samples(&self, index: GrainIndex, deadline: Timepoint) -> Result<()> {
        let rate = self.get_runtime_info().edit_rate;

        loop {
            if self.arena.ring_control().has_committed() && self.get_runtime_info().head_index >= index {
                return Ok(());
            }

            if time::now_tai() >= deadline {
                self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Timeout);
            }

            let wait_ns = time::ns_until_index(index, rate);
            let remaining_ns = (deadline - time::now_tai()).max(0) as u64;
            time::sleep_for_ns(wait_ns.min(remaining_ns.max(1)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::layout::NewFlowLayout;
    use crate::writer::FlowWriter;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn discrete_pair() -> (tempfile::TempDir, FlowWriter, FlowReader) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let params = NewFlowLayout {
            flow_id: Uuid::new_v4(),
            variant: FlowVariant::Discrete,
            edit_rate_num: 25,
            edit_rate_den: 1,
            history_depth: 4,
            cell_size: 16,
            schema_blob: vec![],
        };
        let writer_arena = FlowArena::create(&path, &params, 1, 1_000).unwrap();
        let writer = FlowWriter::new(writer_arena);
        let reader_arena = FlowArena::open(&path).unwrap();
        let reader = FlowReader::new(reader_arena);
        (dir, writer, reader)
    }

    #[test]
    fn get_grain_before_commit_is_not_ready() {
        let (_dir, _writer, reader) = discrete_pair();
        assert!(matches!(
            reader.get_grain(0),
            Err(Error::NotReady { .. })
        ));
    }

    #[test]
    fn get_grain_after_commit_returns_the_exact_payload() {
        let (_dir, writer, reader) = discrete_pair();
        let (mut info, buf) = writer.open_grain(100, 8).unwrap();
        buf.fill(0xAB);
        info.set_valid_slices(8);
        writer.commit_grain(&info).unwrap();

        let (info, payload) = reader.get_grain(100).unwrap();
        assert_eq!(info.valid_slices, 8);
        assert_eq!(payload, &[0xABu8; 16][..]);
    }

    #[test]
    fn wrap_around_makes_overwritten_indices_stale() {
        let (_dir, writer, reader) = discrete_pair();
        for i in 0..8u64 {
            let (info, buf) = writer.open_grain(i, 1).unwrap();
            buf.fill(i as u8);
            writer.commit_grain(&info).unwrap();
        }

        assert!(matches!(reader.get_grain(3), Err(Error::Stale)));
        let (_info, payload) = reader.get_grain(7).unwrap();
        assert_eq!(payload, &[7u8; 16][..]);
    }

    #[test]
    fn get_samples_reports_short_reads_without_partial_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let params = NewFlowLayout {
            flow_id: Uuid::new_v4(),
            variant: FlowVariant::Continuous,
            edit_rate_num: 48_000,
            edit_rate_den: 1,
            history_depth: 4096,
            cell_size: 8,
            schema_blob: vec![],
        };
        let writer_arena = FlowArena::create(&path, &params, 1, 1_000).unwrap();
        let writer = FlowWriter::new(writer_arena);
        let reader_arena = FlowArena::open(&path).unwrap();
        let reader = FlowReader::new(reader_arena);

        {
            let mut slice = writer.open_samples(0, 1024).unwrap();
            let (first, _second) = slice.fragments_mut();
            first.fill(1);
        }
        writer.commit_samples(0, 1024).unwrap();

        match reader.get_samples(500, 1024) {
            Err(Error::NotReady { available_count }) => assert_eq!(available_count, 524),
            other => panic!("expected NotReady, got {other:?}"),
        }

        let (info, buf) = reader.get_samples(500, 500).unwrap();
        assert_eq!(info.available_count, 500);
        assert_eq!(buf.len(), 500 * 8);
    }

    #[test]
    fn get_samples_before_any_commit_is_not_ready() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let params = NewFlowLayout {
            flow_id: Uuid::new_v4(),
            variant: FlowVariant::Continuous,
            edit_rate_num: 48_000,
            edit_rate_den: 1,
            history_depth: 4096,
            cell_size: 8,
            schema_blob: vec![],
        };
        let writer_arena = FlowArena::create(&path, &params, 1, 1_000).unwrap();
        let _writer = FlowWriter::new(writer_arena);
        let reader_arena = FlowArena::open(&path).unwrap();
        let reader = FlowReader::new(reader_arena);

        match reader.get_samples(0, 10) {
            Err(Error::NotReady { available_count }) => assert_eq!(available_count, 0),
            other => panic!("expected NotReady, got {other:?}"),
        }
    }

    #[test]
    fn wait_for_samples_times_out_when_never_committed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let params = NewFlowLayout {
            flow_id: Uuid::new_v4(),
            variant: FlowVariant::Continuous,
            edit_rate_num: 48_000,
            edit_rate_den: 1,
            history_depth: 4096,
            cell_size: 8,
            schema_blob: vec![],
        };
        let writer_arena = FlowArena::create(&path, &params, 1, 1_000).unwrap();
        let _writer = FlowWriter::new(writer_arena);
        let reader_arena = FlowArena::open(&path).unwrap();
        let reader = FlowReader::new(reader_arena);

        let deadline = time::now_tai() + 1_000_000; // 1 ms
        assert!(matches!(
            reader.wait_for_samples(0, deadline),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn wait_for_grain_times_out_when_never_committed() {
        let (_dir, _writer, reader) = discrete_pair();
        let deadline = time::now_tai() + 1_000_000; // 1 ms
        assert!(matches!(
            reader.wait_for_grain(0, 1, deadline),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn wait_for_samples_returns_once_head_advances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let params = NewFlowLayout {
            flow_id: Uuid::new_v4(),
            variant: FlowVariant::Continuous,
            edit_rate_num: 48_000,
            edit_rate_den: 1,
            history_depth: 4096,
            cell_size: 8,
            schema_blob: vec![],
        };
        let writer_arena = FlowArena::create(&path, &params, 1, 1_000).unwrap();
        let writer = FlowWriter::new(writer_arena);
        let reader_arena = FlowArena::open(&path).unwrap();
        let reader = FlowReader::new(reader_arena);

        writer.open_samples(0, 100).unwrap();
        writer.commit_samples(0, 100).unwrap();

        let deadline = time::now_tai() + 50_000_000;
        assert!(reader.wait_for_samples(50, deadline).is_ok());
    }
}
