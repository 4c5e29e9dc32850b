// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instance registry: a process-wide catalog of open flows keyed by
//! identifier.
//!
//! The catalog is a [`DashMap`], matching the lock-free "single source of
//! truth" catalog style `hdds::config` uses for its per-domain QoS store —
//! no global `RwLock` serializes unrelated flows against each other.

use crate::arena::layout::{FlowVariant, NewFlowLayout};
use crate::arena::FlowArena;
use crate::error::{Error, Result};
use crate::reader::FlowReader;
use crate::schema::{self, Fingerprint};
use crate::writer::FlowWriter;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// One process-local catalog entry: the flow's schema fingerprint plus
/// whatever side this process holds open.
struct RegistryEntry {
    schema_fingerprint: Fingerprint,
    writer: Option<Arc<FlowWriter>>,
    readers: Vec<Arc<FlowReader>>,
}

/// Parameters for creating a new flow.
pub struct CreateFlowParams {
    pub variant: FlowVariant,
    pub edit_rate_num: u32,
    pub edit_rate_den: u32,
    pub history_depth: u64,
    pub cell_size: u64,
    pub schema_blob: Vec<u8>,
}

/// Result of [`Instance::create_flow_writer`]: the writer plus whether this
/// call actually created the backing file (`false` means an existing flow
/// with a matching schema was reused).
pub struct CreatedWriter {
    pub writer: Arc<FlowWriter>,
    pub was_created: bool,
}

/// A process's handle onto one domain directory and its open flows.
pub struct Instance {
    domain_path: PathBuf,
    registry: DashMap<Uuid, RegistryEntry>,
}

impl Instance {
    /// Opens (creating if necessary) the domain directory at `domain_path`.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the directory cannot be created or accessed.
    pub fn create(domain_path: impl Into<PathBuf>) -> Result<Self> {
        let domain_path = domain_path.into();
        std::fs::create_dir_all(&domain_path)?;
        Ok(Self {
            domain_path,
            registry: DashMap::new(),
        })
    }

    fn flow_path(&self, flow_id: Uuid) -> PathBuf {
        self.domain_path.join(flow_id.to_string()).join("flow.mxl")
    }

    /// Creates (or, if it already exists with a matching schema, reuses) a
    /// flow and binds this process as its writer.
    ///
    /// # Errors
    ///
    /// [`Error::SchemaMismatch`] if the flow exists with a different schema
    /// fingerprint, [`Error::FlowBusy`] if another writer already holds it.
    pub fn create_flow_writer(
        &self,
        flow_id: Uuid,
        params: &CreateFlowParams,
    ) -> Result<CreatedWriter> {
        let fingerprint = schema::fingerprint(&params.schema_blob);
        let path = self.flow_path(flow_id);

        if let Some(existing) = self.registry.get(&flow_id) {
            if !schema::matches(&params.schema_blob, existing.schema_fingerprint) {
                return Err(Error::SchemaMismatch);
            }
            if let Some(writer) = &existing.writer {
                return Ok(CreatedWriter {
                    writer: writer.clone(),
                    was_created: false,
                });
            }
        }

        let (arena, was_created) = if path.exists() {
            let arena = FlowArena::open_for_writer(&path)?;
            if schema::fingerprint(arena.schema_blob()) != fingerprint {
                return Err(Error::SchemaMismatch);
            }
            (arena, false)
        } else {
            std::fs::create_dir_all(path.parent().expect("flow path always has a parent"))?;
            let layout_params = NewFlowLayout {
                flow_id,
                variant: params.variant,
                edit_rate_num: params.edit_rate_num,
                edit_rate_den: params.edit_rate_den,
                history_depth: params.history_depth,
                cell_size: params.cell_size,
                schema_blob: params.schema_blob.clone(),
            };
            let writer_epoch = now_unix_seconds();
            let created_at = crate::time::now_tai();
            let arena = FlowArena::create(&path, &layout_params, writer_epoch, created_at)?;
            (arena, true)
        };

        let writer = Arc::new(FlowWriter::new(arena));

        self.registry
            .entry(flow_id)
            .and_modify(|e| e.writer = Some(writer.clone()))
            .or_insert_with(|| RegistryEntry {
                schema_fingerprint: fingerprint,
                writer: Some(writer.clone()),
                readers: Vec::new(),
            });

        Ok(CreatedWriter { writer, was_created })
    }

    /// Opens a reader for an existing flow.
    ///
    /// # Errors
    ///
    /// [`Error::NoSuchFlow`] if no flow with this identifier exists.
    pub fn create_flow_reader(&self, flow_id: Uuid) -> Result<Arc<FlowReader>> {
        let path = self.flow_path(flow_id);
        if !path.exists() {
            return Err(Error::NoSuchFlow);
        }

        let arena = FlowArena::open(&path)?;
        let fingerprint = schema::fingerprint(arena.schema_blob());
        let reader = Arc::new(FlowReader::new(arena));

        self.registry
            .entry(flow_id)
            .and_modify(|e| e.readers.push(reader.clone()))
            .or_insert_with(|| RegistryEntry {
                schema_fingerprint: fingerprint,
                writer: None,
                readers: vec![reader.clone()],
            });

        Ok(reader)
    }

    /// Removes `flow_id` from this process's catalog and deletes its
    /// backing file. The caller must have released any writer/reader handles
    /// first; this only drops the registry's own references.
    ///
    /// # Errors
    ///
    /// [`Error::NoSuchFlow`] if the flow is not in this process's catalog.
    pub fn destroy_flow(&self, flow_id: Uuid) -> Result<()> {
        self.registry
            .remove(&flow_id)
            .ok_or(Error::NoSuchFlow)?;

        let flow_dir = self.domain_path.join(flow_id.to_string());
        if flow_dir.exists() {
            std::fs::remove_dir_all(flow_dir)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn domain_path(&self) -> &Path {
        &self.domain_path
    }

    #[must_use]
    pub fn is_open(&self, flow_id: Uuid) -> bool {
        self.registry.contains_key(&flow_id)
    }
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
