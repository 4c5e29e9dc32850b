// SPDX-License-Identifier: Apache-2.0 OR MIT

//! MXL core configuration — single source of truth for tunable constants.
//!
//! **Never hardcode these elsewhere.** Everything here is a compile-time
//! constant; MXL's core has no dynamic/runtime configuration layer because
//! every tunable it needs (history depth, cell size) is fixed at flow
//! creation and stored in the flow header itself (see [`crate::arena::layout`]).

/// Fixed size of the flow header region, in bytes.
pub const HEADER_SIZE: usize = 256;

/// Magic value identifying a valid MXL flow file ("MXLFLOW1" as 8 bytes).
pub const MAGIC: u64 = 0x4D58_4C46_4C4F_5731;

/// Current on-disk/shared-memory layout version.
pub const VERSION: u16 = 1;

/// Default number of cells in the payload arena (history depth). Must stay a
/// power of two; callers may override at flow-creation time as long as the
/// override is also a power of two.
pub const DEFAULT_HISTORY_DEPTH: u64 = 64;

/// Default payload cell size in bytes when the caller does not size the
/// arena from an explicit `maxCommitBatchSizeHint`.
pub const DEFAULT_CELL_SIZE: u64 = 4096;

/// Fixed size of one index-ring slot record, in bytes (cache-line aligned).
pub const SLOT_SIZE: usize = 64;

/// TAI − UTC offset in whole seconds, frozen at the last announced leap
/// second (2017-01-01). Hosts in this deployment are assumed already
/// NTP/PTP-disciplined to UTC, so TAI is simply UTC plus this constant
/// rather than requiring a kernel TAI clock source.
pub const TAI_MINUS_UTC_SECONDS: i64 = 37;

/// Number of busy-spin iterations `waitForGrain`/`getGrain` attempt before
/// falling back to a sleep-based poll, and the bound on retries while a slot
/// sits under an odd (write-in-progress) generation before reporting
/// [`crate::Error::UnderWrite`].
pub const UNDER_WRITE_SPIN_BUDGET: u32 = 1000;

/// Minimum sleep granularity used by the adaptive poll in
/// [`crate::reader::FlowReader::wait_for_grain`] when the rate-derived
/// `nsUntilIndex` would otherwise be zero or negative.
pub const MIN_POLL_SLEEP_NS: u64 = 50_000;
