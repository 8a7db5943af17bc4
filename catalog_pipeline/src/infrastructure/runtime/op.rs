// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Operations
//!
//! An [`Op`] represents one event travelling through the entry processor:
//! one changelog record, one scan result, or one synthetic command such as
//! the end-of-scan sweep. Producers build an `Op`, fill in whatever identity
//! and attributes they already have, and push it; stage handlers then own it
//! exclusively while it runs and advance it with acknowledgements.
//!
//! ## Handle model
//!
//! Inside the pipeline every operation lives behind an [`OpHandle`], which
//! keeps the address stable while the op is linked into stage queues and
//! ordering FIFOs. The handle splits the state by who touches it:
//!
//! - `stage` and `running` are atomics read by the scheduler without locks
//!   and written only under the stage mutex that owns the op;
//! - identity and registration flags sit behind their own small mutex,
//!   taken after the stage mutex (never the other way around);
//! - the payload (attribute sets, needs, record, callback) is behind the
//!   data mutex, touched only by the worker currently running the op. The
//!   `running` flag guarantees there is at most one.

use catalog_pipeline_domain::{AttrMask, AttrSet, CatalogStore, ChangelogRecord, EntryId, PipelineError};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Catalog mutation an operation will perform at the apply stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbOpType {
    #[default]
    None,
    Insert,
    Update,
    Remove,
    SoftRemove,
}

/// Payload of the end-of-scan garbage collection sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct GcSweep {
    /// Entries whose metadata stamp is strictly older are swept.
    pub watermark: i64,
    /// Restricts the sweep to a subtree (partial scans).
    pub path_prefix: Option<String>,
}

/// Source-specific payload of an operation.
#[derive(Debug, Clone, Default)]
pub enum OpExtra {
    #[default]
    None,
    Changelog(ChangelogRecord),
    GcSweep(GcSweep),
}

impl OpExtra {
    pub fn is_changelog(&self) -> bool {
        matches!(self, Self::Changelog(_))
    }

    pub fn record(&self) -> Option<&ChangelogRecord> {
        match self {
            Self::Changelog(rec) => Some(rec),
            _ => None,
        }
    }
}

/// Completion hook invoked once the operation's catalog change is durable,
/// typically advancing the changelog cursor or unblocking the scanner.
pub type OpCallback = Box<dyn FnOnce(&mut dyn CatalogStore) -> Result<(), PipelineError> + Send>;

/// One unit of work travelling through the pipeline.
///
/// `db_attrs` holds what the catalog already knows, `fs_attrs` the fresh
/// values obtained during this pass; the two masks name what still has to be
/// fetched from each side.
#[derive(Default)]
pub struct Op {
    pub id: Option<EntryId>,
    pub db_attrs: AttrSet,
    pub fs_attrs: AttrSet,
    pub db_attr_need: AttrMask,
    pub fs_attr_need: AttrMask,
    pub db_exists: bool,
    pub db_op_type: DbOpType,
    pub extra: OpExtra,
    pub(crate) callback: Option<OpCallback>,
}

impl Op {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operation for one filesystem scan result. The scanner supplies the
    /// full path and the attributes it already read.
    pub fn for_scan(fullpath: impl Into<String>, attrs: AttrSet) -> Self {
        let mut op = Self::new();
        op.fs_attrs = attrs;
        op.fs_attrs.fullpath = Some(fullpath.into());
        op
    }

    /// Operation for one decoded changelog record. The record's target id
    /// becomes the op identity.
    pub fn for_changelog(record: ChangelogRecord) -> Self {
        let mut op = Self::new();
        op.id = record.target_id;
        op.extra = OpExtra::Changelog(record);
        op
    }

    /// End-of-scan sweep command.
    pub fn for_gc_sweep(watermark: i64, path_prefix: Option<String>) -> Self {
        let mut op = Self::new();
        op.extra = OpExtra::GcSweep(GcSweep { watermark, path_prefix });
        op
    }

    /// Attaches the durability callback.
    pub fn with_callback(
        mut self,
        callback: impl FnOnce(&mut dyn CatalogStore) -> Result<(), PipelineError> + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Fresh value if present, else the catalog value.
    pub fn fullpath(&self) -> Option<&str> {
        self.fs_attrs.fullpath.as_deref().or(self.db_attrs.fullpath.as_deref())
    }

    /// Fresh value if present, else the catalog value.
    pub fn kind(&self) -> Option<catalog_pipeline_domain::FsKind> {
        self.fs_attrs.kind.or(self.db_attrs.kind)
    }

    /// Combined view of both attribute sets, fresh values taking precedence.
    pub fn merged_attrs(&self) -> AttrSet {
        let mut merged = self.db_attrs.clone();
        merged.merge(&self.fs_attrs, true);
        merged
    }

    pub fn need_getattr(&self) -> bool {
        self.fs_attr_need.intersects(AttrMask::POSIX)
    }

    pub fn need_getpath(&self) -> bool {
        self.fs_attr_need.intersects(AttrMask::PATH)
    }

    pub fn need_getstripe(&self) -> bool {
        self.fs_attr_need.intersects(AttrMask::STRIPE)
    }

    pub fn need_getstatus(&self) -> bool {
        self.fs_attr_need.intersects(AttrMask::STATUS)
    }

    /// Short description for stage dumps: changelog index, path, or id.
    pub fn describe(&self) -> String {
        if let OpExtra::Changelog(rec) = &self.extra {
            return rec.descriptor();
        }
        if let OpExtra::GcSweep(gc) = &self.extra {
            return format!("gc sweep (watermark={})", gc.watermark);
        }
        if let Some(path) = self.fullpath() {
            return path.to_string();
        }
        match self.id {
            Some(id) => id.to_string(),
            None => "(anonymous op)".to_string(),
        }
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("id", &self.id)
            .field("db_exists", &self.db_exists)
            .field("db_op_type", &self.db_op_type)
            .field("extra", &self.extra)
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

/// `(parent id, name)` pair used by the name-level ordering index.
pub(crate) type NameKey = (EntryId, String);

/// Identity and registration state of a queued operation.
#[derive(Debug, Default)]
pub(crate) struct OpIdent {
    pub id: Option<EntryId>,
    pub id_registered: bool,
    pub name_key: Option<NameKey>,
    pub name_registered: bool,
    pub started_at: Option<Instant>,
}

/// Stable runtime handle of a queued operation.
pub struct OpHandle {
    serial: u64,
    stage: AtomicUsize,
    running: AtomicBool,
    pub(crate) ident: Mutex<OpIdent>,
    data: Mutex<Op>,
}

impl OpHandle {
    pub(crate) fn new(serial: u64, start_stage: usize, op: Op) -> Arc<Self> {
        let name_key = match &op.extra {
            OpExtra::Changelog(rec) => match (&rec.parent_id, &rec.name) {
                (Some(parent), Some(name)) => Some((*parent, name.clone())),
                _ => None,
            },
            _ => match (&op.fs_attrs.parent_id, &op.fs_attrs.name) {
                (Some(parent), Some(name)) => Some((*parent, name.clone())),
                _ => None,
            },
        };
        Arc::new(Self {
            serial,
            stage: AtomicUsize::new(start_stage),
            running: AtomicBool::new(false),
            ident: Mutex::new(OpIdent {
                id: op.id,
                name_key,
                ..Default::default()
            }),
            data: Mutex::new(op),
        })
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Current stage index. Written only under the owning stage mutex; the
    /// scheduler reads it lock-free and revalidates under locks.
    pub fn stage(&self) -> usize {
        self.stage.load(Ordering::SeqCst)
    }

    pub(crate) fn set_stage(&self, stage: usize) {
        self.stage.store(stage, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Entry id, when known.
    pub fn id(&self) -> Option<EntryId> {
        self.ident.lock().id
    }

    /// Sets the entry id. Idempotent; ordering registration happens when the
    /// op reaches a stage that requires it.
    pub fn set_id(&self, id: EntryId) {
        self.ident.lock().id = Some(id);
        self.data.lock().id = Some(id);
    }

    /// Exclusive access to the payload. Handlers hold this for the duration
    /// of their work; nothing else takes it while the op is running.
    pub fn data(&self) -> MutexGuard<'_, Op> {
        self.data.lock()
    }

    /// Non-blocking descriptor for dumps. Reports `(busy)` rather than
    /// waiting on an op that is being processed.
    pub fn describe(&self) -> String {
        match self.data.try_lock() {
            Some(data) => data.describe(),
            None => "(busy)".to_string(),
        }
    }
}

impl fmt::Debug for OpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpHandle")
            .field("serial", &self.serial)
            .field("stage", &self.stage())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
