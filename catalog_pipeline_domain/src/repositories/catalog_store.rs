// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Catalog Store Port
//!
//! CRUD and query interface to the catalog database. The schema and the
//! driver are out of scope; the pipeline only exchanges attribute sets and
//! ids through this trait.
//!
//! ## Connection model
//!
//! A store handle is private to one worker thread for the whole life of that
//! worker, which is why the trait requires `Send` but not `Sync` and takes
//! `&mut self` everywhere. Handles are produced by a
//! [`CatalogStoreFactory`], one `open()` per worker at pipeline start.
//!
//! ## Result model
//!
//! Queries distinguish "the entry is not there" and "your view is stale"
//! from transport failures: the first two are ordinary outcomes the stage
//! handlers branch on, the last retires the operation so the event source
//! re-delivers.

use crate::error::PipelineError;
use crate::value_objects::attr_set::{AttrMask, AttrSet};
use crate::value_objects::entry_id::EntryId;
use thiserror::Error;

/// Outcome classification for store calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The id is not present in the catalog.
    #[error("entry does not exist in the catalog")]
    NotExists,
    /// Stored information is known to be stale (e.g. striping changed).
    #[error("catalog information is out of date")]
    OutOfDate,
    /// Backend failure, with the driver's code or message.
    #[error("store backend error: {0}")]
    Other(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::StoreError(err.to_string())
    }
}

/// Convenience alias for store call results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durability state of recent mutations on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// All mutations issued through this handle are durable.
    Committed,
    /// Some mutations are still buffered by the driver.
    Pending,
}

/// Filter for the end-of-scan garbage collection sweep.
///
/// Selects entries whose metadata was last refreshed strictly before the
/// watermark, optionally restricted to a subtree for partial scans.
#[derive(Debug, Clone, PartialEq)]
pub struct GcFilter {
    /// Entries with `md_update < md_updated_before` are selected.
    pub md_updated_before: i64,
    /// When set, only entries whose full path lies under this prefix.
    pub path_prefix: Option<String>,
}

impl GcFilter {
    pub fn older_than(watermark: i64) -> Self {
        Self {
            md_updated_before: watermark,
            path_prefix: None,
        }
    }

    pub fn under(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    /// Whether a stored entry is selected by this filter.
    pub fn selects(&self, attrs: &AttrSet) -> bool {
        let stale = attrs.md_update.is_some_and(|t| t < self.md_updated_before);
        if !stale {
            return false;
        }
        match &self.path_prefix {
            None => true,
            Some(prefix) => attrs
                .fullpath
                .as_deref()
                .is_some_and(|p| p == prefix || p.starts_with(&format!("{}/", prefix.trim_end_matches('/')))),
        }
    }
}

/// Catalog database handle, one per worker.
pub trait CatalogStore: Send {
    /// Reads the attributes named by `need` for one entry.
    fn get(&mut self, id: &EntryId, need: AttrMask) -> StoreResult<AttrSet>;

    /// Existence check without attribute transfer.
    fn exists(&mut self, id: &EntryId) -> StoreResult<bool>;

    /// Verifies that stored striping information is present and current.
    fn check_stripe(&mut self, id: &EntryId) -> StoreResult<()>;

    fn insert(&mut self, id: &EntryId, attrs: &AttrSet) -> StoreResult<()>;

    fn update(&mut self, id: &EntryId, attrs: &AttrSet) -> StoreResult<()>;

    fn remove(&mut self, id: &EntryId) -> StoreResult<()>;

    /// Logical delete: the entry moves to the deferred-removal set and is
    /// physically purged after `purge_at`.
    fn soft_remove(&mut self, id: &EntryId, fullpath: Option<&str>, purge_at: i64) -> StoreResult<()>;

    /// Bulk delete of the entries selected by `filter`. Returns the count.
    fn mass_remove(&mut self, filter: &GcFilter) -> StoreResult<u64>;

    /// Bulk logical delete of the entries selected by `filter`.
    fn mass_soft_remove(&mut self, filter: &GcFilter, purge_at: i64) -> StoreResult<u64>;

    /// Reads a named persistent variable (scan stamps, cursor positions).
    fn get_var(&mut self, name: &str) -> StoreResult<Option<String>>;

    /// Writes a named persistent variable.
    fn set_var(&mut self, name: &str, value: &str) -> StoreResult<()>;

    /// Forces synchronous commit of every following mutation while enabled.
    fn force_commit(&mut self, enable: bool);

    /// Durability state of mutations already issued on this handle.
    fn commit_status(&self) -> CommitStatus;

    /// Derives computable attributes (`name`, `depth`) the backend would
    /// otherwise materialise itself.
    fn generate_fields(&self, attrs: &mut AttrSet, want: AttrMask) {
        attrs.generate_fields(want);
    }

    /// Attribute merge with the store's precedence convention.
    fn merge_attrs(&self, dst: &mut AttrSet, src: &AttrSet, overwrite: bool) {
        dst.merge(src, overwrite);
    }
}

/// Produces one store handle per worker.
pub trait CatalogStoreFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn CatalogStore>, PipelineError>;

    /// True for backends that serialise writers (whole-file locking). The
    /// pipeline then caps the apply stage at a single thread.
    fn single_writer(&self) -> bool {
        false
    }
}
