// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Filesystem Probe Port
//!
//! Adapter interface to the filesystem being watched: path/id resolution,
//! `lstat`, striping queries and archive status queries. Capability flags let
//! the enrichment stage skip queries a backend cannot answer instead of
//! failing every operation on it.
//!
//! A probe is shared by all workers and must be `Sync`; implementations are
//! expected to be stateless wrappers around syscalls or client libraries.

use crate::error::PipelineError;
use crate::value_objects::attr_set::{AttrSet, FsKind, StripeInfo};
use crate::value_objects::entry_id::EntryId;
use crate::value_objects::hsm_status::HsmStatus;
use thiserror::Error;

/// Failure classification for probe calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FsProbeError {
    /// The object vanished (`ENOENT`/`ESTALE` family). Interpreted per
    /// stage: scans skip the entry, changelog processing may turn it into a
    /// removal.
    #[error("filesystem object is gone")]
    Missing,
    /// The backend cannot answer this query for this object type.
    #[error("operation not supported by the filesystem")]
    Unsupported,
    /// Any other I/O failure.
    #[error("filesystem error: {0}")]
    Io(String),
}

impl From<FsProbeError> for PipelineError {
    fn from(err: FsProbeError) -> Self {
        PipelineError::FsProbeError(err.to_string())
    }
}

/// Result of a metadata query, ready to merge into an attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct FsStat {
    pub kind: FsKind,
    pub owner: String,
    pub group: String,
    pub size: u64,
    /// Epoch seconds.
    pub last_access: i64,
    /// Epoch seconds.
    pub last_mod: i64,
    /// Inode change time, epoch seconds. Used as creation time bound.
    pub change_time: i64,
    pub nlink: u64,
}

impl FsStat {
    /// Converts to the attribute representation used across the pipeline.
    pub fn to_attrs(&self) -> AttrSet {
        AttrSet {
            kind: Some(self.kind),
            owner: Some(self.owner.clone()),
            group: Some(self.group.clone()),
            size: Some(self.size),
            last_access: Some(self.last_access),
            last_mod: Some(self.last_mod),
            ..Default::default()
        }
    }
}

/// Filesystem adapter consumed by the identity and enrichment stages.
pub trait FsProbe: Send + Sync {
    /// Resolves a full path to the entry id.
    fn path_to_id(&self, path: &str) -> Result<EntryId, FsProbeError>;

    /// Resolves an id back to a full path (FID-capable filesystems only).
    fn id_to_path(&self, id: &EntryId) -> Result<String, FsProbeError>;

    /// Path that opens the object by id without a namespace walk, like the
    /// `.lustre/fid/<FID>` convention. `None` when the filesystem has no
    /// such facility; callers then fall back to the recorded path.
    fn build_id_path(&self, id: &EntryId) -> Option<String>;

    /// `lstat` on the given access path.
    fn stat(&self, path: &str) -> Result<FsStat, FsProbeError>;

    /// Striping query, files only.
    fn get_stripe(&self, path: &str) -> Result<(StripeInfo, Vec<u32>), FsProbeError>;

    /// Archive status query, files only.
    fn get_hsm_status(&self, path: &str) -> Result<HsmStatus, FsProbeError>;

    /// Whether striping queries can succeed at all on this filesystem.
    fn supports_stripes(&self) -> bool {
        true
    }

    /// Whether archive status queries can succeed at all on this filesystem.
    fn supports_hsm(&self) -> bool {
        true
    }
}
