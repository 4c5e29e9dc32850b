// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # MXL - Media eXchange Layer
//!
//! A shared-memory fabric for exchanging timed media grains (video frames,
//! audio sample batches, ancillary data) between processes on one host,
//! without copying payloads across a socket.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mxl::{CreateFlowParams, FlowVariant, Instance};
//! use uuid::Uuid;
//!
//! fn main() -> mxl::Result<()> {
//!     let instance = Instance::create("/tmp/mxl-domain")?;
//!     let flow_id = Uuid::new_v4();
//!
//!     let created = instance.create_flow_writer(
//!         flow_id,
//!         &CreateFlowParams {
//!             variant: FlowVariant::Discrete,
//!             edit_rate_num: 25,
//!             edit_rate_den: 1,
//!             history_depth: 64,
//!             cell_size: 4096,
//!             schema_blob: br#"{"type":"video"}"#.to_vec(),
//!         },
//!     )?;
//!
//!     let (mut info, buf) = created.writer.open_grain(0, 1)?;
//!     buf.fill(0);
//!     info.set_valid_slices(1);
//!     created.writer.commit_grain(&info)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------------+
//! |                      Instance Registry                          |
//! |   process-local catalog of open flows, keyed by UUID            |
//! +-----------------------------------------------------------------+
//! |        FlowWriter (single)        |     FlowReader (many)       |
//! |   open_grain/commit_grain         |  get_grain/wait_for_grain    |
//! |   open_samples/commit_samples     |  get_samples/wait_for_samples|
//! +-----------------------------------------------------------------+
//! |                      SynchronizationGroup                       |
//! |   waits many readers up to a common origin timepoint            |
//! +-----------------------------------------------------------------+
//! |                           Arena                                  |
//! |   FlowLayout (header) | GrainSlot/RingControl (seqlock ring)     |
//! +-----------------------------------------------------------------+
//! |                     File-backed shared memory                   |
//! |   mmap(MAP_SHARED) over a regular file under the domain path     |
//! +-----------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Instance`] | Entry point: opens a domain directory, creates/opens flows |
//! | [`FlowWriter`] | The single-producer side of a flow |
//! | [`FlowReader`] | One of a flow's many lock-free readers |
//! | [`SynchronizationGroup`] | Waits a set of readers up to a shared timepoint |
//! | [`Error`] | Status returned by every fallible operation; the core never logs |
//!
//! ## Design notes
//!
//! This core never logs: every operation reports its outcome through
//! [`Result`]/[`Error`] instead of a logging side channel, so embedding
//! applications stay free to route diagnostics through whatever they already
//! use. See [`error`] for the taxonomy.

/// Shared-memory arena: flow header layout, the seqlock index ring, and the
/// mapped-file primitive both sides build on.
pub mod arena;
/// Compile-time tunable constants (header size, slot size, spin budgets).
pub mod config;
/// Error taxonomy returned by every fallible MXL operation.
pub mod error;
/// Process-local catalog of open flows.
pub mod instance;
/// The multi-consumer side of a flow.
pub mod reader;
/// Opaque schema blob fingerprinting.
pub mod schema;
/// Waits many readers up to a shared timepoint.
pub mod sync_group;
/// Timing and grain-index arithmetic.
pub mod time;
/// The single-producer side of a flow.
pub mod writer;

pub use arena::layout::FlowVariant;
pub use error::{Error, Result};
pub use instance::{CreateFlowParams, CreatedWriter, Instance};
pub use reader::{FlowReader, GrainInfo, ReaderMetrics, ReaderMetricsSnapshot, RuntimeInfo};
pub use schema::Fingerprint;
pub use sync_group::{EntryVariant, ReaderHandle, SynchronizationGroup};
pub use time::{EditRate, GrainIndex, Timepoint, UNDEFINED_INDEX};
pub use writer::{FlowWriter, GrainWriteInfo, SampleWriteSlice};
