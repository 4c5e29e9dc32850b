// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Synchronization group: waits for a shared timepoint across many readers.
//!
//! Holds only [`Weak`] references to readers so the group never extends a
//! reader's lifetime. A dereference failure surfaces as
//! [`Error::ReaderGone`] and purges the entry rather than panicking.

use crate::arena::layout::FlowVariant;
use crate::error::{Error, Result};
use crate::reader::FlowReader;
use crate::time::{self, EditRate, Timepoint};
use std::sync::{Arc, Weak};

/// Per-reader enrollment policy.
#[derive(Debug, Clone, Copy)]
pub enum EntryVariant {
    Discrete { min_valid_slices: u32 },
    Continuous,
}

struct Entry {
    id: u64,
    reader: Weak<FlowReader>,
    variant: EntryVariant,
    grain_rate: EditRate,
    max_observed_source_delay: i64,
}

/// A mutable, logically-unordered collection of weak reader handles that a
/// caller waits on together.
#[derive(Default)]
pub struct SynchronizationGroup {
    entries: Vec<Entry>,
    next_id: u64,
}

/// Stable identity for an enrolled reader, returned by [`SynchronizationGroup::add_reader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderHandle(u64);

impl SynchronizationGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enrolls `reader` with the given policy. Idempotent by the reader's
    /// underlying identity: re-adding the same `Arc` updates its variant
    /// instead of creating a duplicate entry.
    pub fn add_reader(&mut self, reader: &Arc<FlowReader>, variant: EntryVariant) -> ReaderHandle {
        let rate = reader.get_runtime_info().edit_rate;
        let ptr = Arc::as_ptr(reader);

        for entry in &mut self.entries {
            if entry
                .reader
                .upgrade()
                .is_some_and(|existing| Arc::as_ptr(&existing) == ptr)
            {
                entry.variant = variant;
                return ReaderHandle(entry.id);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            reader: Arc::downgrade(reader),
            variant,
            grain_rate: rate,
            max_observed_source_delay: i64::MIN,
        });
        ReaderHandle(id)
    }

    /// Removes an entry by handle. A no-op if the handle is not enrolled.
    pub fn remove_reader(&mut self, handle: ReaderHandle) {
        self.entries.retain(|e| e.id != handle.0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waits for every enrolled reader to have data at `origin_time` or
    /// later, or returns the first non-`OK` result encountered.
    ///
    /// Readers that block (their expected index is not yet present) are
    /// tried in the current list order; a reader that turns out to be the
    /// slowest-so-far is spliced to the front so the next call blocks on it
    /// first, amortizing the group's total wait across its remaining
    /// members.
    pub fn wait_for_data_at(&mut self, origin_time: Timepoint, deadline: Timepoint) -> Result<()> {
        let mut i = 0;
        while i < self.entries.len() {
            let Some(reader) = self.entries[i].reader.upgrade() else {
                self.entries.remove(i);
                return Err(Error::ReaderGone);
            };

            let expected_index = time::timestamp_to_index(self.entries[i].grain_rate, origin_time);
            let head = reader.get_runtime_info().head_index;

            if head == time::UNDEFINED_INDEX || expected_index > head {
                let result = match self.entries[i].variant {
                    EntryVariant::Discrete { min_valid_slices } => {
                        reader.wait_for_grain(expected_index, min_valid_slices, deadline)
                    }
                    EntryVariant::Continuous => reader.wait_for_samples(expected_index, deadline),
                };
                result?;

                let source_delay =
                    time::now_tai() - time::index_to_timestamp(expected_index, self.entries[i].grain_rate);
                if source_delay > self.entries[i].max_observed_source_delay {
                    self.entries[i].max_observed_source_delay = source_delay;
                    if i > 0 && source_delay > self.entries[0].max_observed_source_delay {
                        let entry = self.entries.remove(i);
                        self.entries.insert(0, entry);
                        continue;
                    }
                }
            }

            i += 1;
        }

        Ok(())
    }

    /// Variant for a reader, for tests and diagnostics.
    #[cfg(test)]
    fn variant_at(&self, index: usize) -> EntryVariant {
        self.entries[index].variant
    }
}
