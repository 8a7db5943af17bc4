// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Standard Stage Handlers
//!
//! The handler suite for the archive-aware changelog-and-scan pipeline:
//!
//! | # | stage        | concurrency       | role |
//! |---|--------------|-------------------|------|
//! | 0 | GET_ID       | parallel          | resolve the id of scan entries |
//! | 1 | GET_INFO_DB  | parallel, ordered | catalog lookup, decide what to refresh |
//! | 2 | GET_INFO_FS  | parallel          | stat/path/stripe/status probes, class matching |
//! | 3 | REPORTING    | parallel, async   | alert rules |
//! | 4 | DB_APPLY     | parallel*         | apply the catalog mutation |
//! | 5 | CHGLOG_CLR   | sequential        | durability callback, stream-order ack |
//! | 6 | GC_OLDENT    | sequential        | end-of-scan sweep |
//!
//! (*) capped to one thread on single-writer store backends.
//!
//! Handlers never panic the pipeline on per-operation failures: an
//! unrecoverable op is retired, a recoverable one is re-routed (typically to
//! the record-clearing stage so the source cursor still advances), and store
//! failures at the apply stage retire without invoking the callback so the
//! source re-delivers the event.

use crate::infrastructure::runtime::core::{Ack, PipelineCore};
use crate::infrastructure::runtime::op::{DbOpType, Op, OpExtra, OpHandle};
use crate::infrastructure::runtime::pipeline::HandlerCtx;
use crate::infrastructure::runtime::stage::{StageConcurrency, StageDef, StageTable};
use catalog_pipeline_domain::services::update_policy::{need_md_update, need_path_update};
use catalog_pipeline_domain::{
    Alert, AttrMask, AttrSet, CatalogStore, ChangelogRecord, EntryId, FsKind, FsProbeError, GcFilter, HsmEventKind,
    HsmStatus, PipelineError, RecordType, StoreError,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

pub const STAGE_GET_ID: usize = 0;
pub const STAGE_GET_INFO_DB: usize = 1;
pub const STAGE_GET_INFO_FS: usize = 2;
pub const STAGE_REPORTING: usize = 3;
pub const STAGE_DB_APPLY: usize = 4;
pub const STAGE_CHGLOG_CLR: usize = 5;
pub const STAGE_GC_OLDENT: usize = 6;

/// Builds the standard stage table.
///
/// `single_writer_store` caps the apply stage at one thread; the final
/// record-clearing stage is always sequential because source
/// acknowledgements must go out in stream order.
pub fn standard_table(single_writer_store: bool) -> Result<StageTable, PipelineError> {
    let db_apply_concurrency = if single_writer_store {
        StageConcurrency::Bounded(1)
    } else {
        StageConcurrency::Unbounded
    };
    StageTable::new(vec![
        StageDef::new("GET_ID", StageConcurrency::Unbounded, Arc::new(get_id)),
        StageDef::new("GET_INFO_DB", StageConcurrency::Unbounded, Arc::new(get_info_db)).with_id_constraint(),
        StageDef::new("GET_INFO_FS", StageConcurrency::Unbounded, Arc::new(get_info_fs)),
        StageDef::new("REPORTING", StageConcurrency::Unbounded, Arc::new(reporting)).with_async_ack(),
        StageDef::new("DB_APPLY", db_apply_concurrency, Arc::new(db_apply))
            .with_batch(Arc::new(db_apply_batch), Arc::new(inserts_batchable)),
        StageDef::new("CHGLOG_CLR", StageConcurrency::Sequential, Arc::new(chglog_clr)),
        StageDef::new("GC_OLDENT", StageConcurrency::Sequential, Arc::new(gc_oldent)),
    ])
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Where an operation goes after the catalog/filesystem decision stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    GetInfoFs,
    Reporting,
    DbApply,
    ChglogClr,
    Drop,
}

fn step_ack(core: &PipelineCore, op: &Arc<OpHandle>, step: NextStep) -> Result<(), PipelineError> {
    match step {
        NextStep::GetInfoFs => core.acknowledge(op, Ack::Advance(STAGE_GET_INFO_FS)),
        NextStep::Reporting => core.acknowledge(op, Ack::Advance(STAGE_REPORTING)),
        NextStep::DbApply => core.acknowledge(op, Ack::Advance(STAGE_DB_APPLY)),
        NextStep::ChglogClr => core.acknowledge(op, Ack::Advance(STAGE_CHGLOG_CLR)),
        NextStep::Drop => core.acknowledge(op, Ack::Retire),
    }
}

// ---------------------------------------------------------------------------
// GET_ID
// ---------------------------------------------------------------------------

/// Resolves the entry id of scan-sourced operations from their full path.
/// Changelog operations carry an id in the record and enter downstream.
fn get_id(
    core: &PipelineCore,
    ctx: &HandlerCtx,
    op: &Arc<OpHandle>,
    _store: &mut dyn CatalogStore,
) -> Result<(), PipelineError> {
    let path = op.data().fs_attrs.fullpath.clone();
    let Some(path) = path else {
        error!("full path expected to be set when resolving an entry id");
        return core.acknowledge(op, Ack::Retire);
    };

    match ctx.fs.path_to_id(&path) {
        Ok(id) => {
            op.set_id(id);
            core.acknowledge(op, Ack::Advance(STAGE_GET_INFO_DB))
        }
        Err(err) => {
            debug!("cannot resolve id of {path}: {err}");
            core.acknowledge(op, Ack::Retire)
        }
    }
}

// ---------------------------------------------------------------------------
// GET_INFO_DB
// ---------------------------------------------------------------------------

/// Looks the entry up in the catalog and decides what has to be refreshed
/// from the filesystem, driven by the record type for changelog operations
/// and by resynchronisation rules for scan results.
fn get_info_db(
    core: &PipelineCore,
    ctx: &HandlerCtx,
    op: &Arc<OpHandle>,
    store: &mut dyn CatalogStore,
) -> Result<(), PipelineError> {
    let step = {
        let mut data = op.data();
        match data.id {
            Some(id) => {
                if data.extra.is_changelog() {
                    changelog_lookup(ctx, &mut data, id, store)
                } else {
                    scan_lookup(ctx, &mut data, id, store)
                }
            }
            None => {
                error!("op {} reached the catalog lookup without an id", op.serial());
                NextStep::Drop
            }
        }
    };
    step_ack(core, op, step)
}

/// Attributes the catalog lookup always asks for on the changelog path.
fn changelog_db_need(ctx: &HandlerCtx) -> AttrMask {
    let mut need = AttrMask::FULLPATH
        | AttrMask::NAME
        | AttrMask::KIND
        | AttrMask::STRIPE_INFO
        | AttrMask::MD_UPDATE
        | AttrMask::PATH_UPDATE
        | AttrMask::STATUS;
    if ctx.config.pipeline.detect_fake_mtime {
        need |= AttrMask::CREATION_TIME;
    }
    if ctx.config.pipeline.match_classes {
        need |= AttrMask::CLASSES | ctx.policy.global_attr_mask();
    }
    need | ctx.config.alert_attr_mask()
}

fn changelog_lookup(ctx: &HandlerCtx, data: &mut Op, id: EntryId, store: &mut dyn CatalogStore) -> NextStep {
    let need = changelog_db_need(ctx);
    data.db_attr_need = need;

    match store.get(&id, need) {
        Ok(attrs) => {
            data.db_exists = true;
            data.db_attrs = attrs;
        }
        Err(StoreError::NotExists) => {
            data.db_exists = false;
            data.db_attrs = AttrSet::new();
        }
        Err(err) => {
            // treat as unknown; a later pass will converge
            error!("error retrieving entry {id} from the catalog: {err}");
            data.db_exists = false;
            data.db_attrs = AttrSet::new();
        }
    }

    let rec = match data.extra.record() {
        Some(rec) => rec.clone(),
        None => return NextStep::Drop,
    };
    let step = process_record(ctx, data, id, &rec);

    debug!(
        "record {} {} on {} entry: getattr={} getpath={} getstripe={} getstatus={}",
        rec.rec_type,
        id,
        if data.db_exists { "known" } else { "unknown" },
        data.need_getattr(),
        data.need_getpath(),
        data.need_getstripe(),
        data.need_getstatus(),
    );
    step
}

/// Decides the catalog operation and the refresh set for one changelog
/// record.
fn process_record(ctx: &HandlerCtx, data: &mut Op, id: EntryId, rec: &ChangelogRecord) -> NextStep {
    let now = now_secs();
    let mut md_allow_event = true;
    let mut path_allow_event = true;

    if let Some(parent) = rec.parent_id {
        data.fs_attrs.parent_id = Some(parent);
    }

    if rec.rec_type == RecordType::Unlink {
        debug!(
            "UNLINK on {} entry {id}: last={}, archived={}",
            if data.db_exists { "known" } else { "unknown" },
            rec.flags.unlink_last,
            rec.flags.hsm_exists
        );
        if rec.flags.unlink_last {
            if !ctx.config.unlink_policy.hsm_remove || !rec.flags.hsm_exists {
                // no archive copy to keep track of: plain removal if the
                // catalog knows the entry, otherwise nothing to do
                if data.db_exists {
                    data.db_op_type = DbOpType::Remove;
                    return NextStep::DbApply;
                }
                return NextStep::ChglogClr;
            }
            data.db_op_type = DbOpType::SoftRemove;
            return NextStep::DbApply;
        }
        if data.db_exists {
            // the stored path may be the removed link
            data.fs_attr_need |= AttrMask::PATH;
        }
    }

    if !data.db_exists {
        data.db_op_type = DbOpType::Insert;
        data.fs_attrs.creation_time = Some(rec.time);
        data.fs_attr_need |= AttrMask::POSIX | AttrMask::PATH | AttrMask::STRIPE | AttrMask::STATUS;
    } else {
        data.db_op_type = DbOpType::Update;

        if data.db_attrs.stripe_info.is_none() {
            data.fs_attr_need |= AttrMask::STRIPE;
        }
        if data.db_attrs.status.is_none() {
            data.fs_attr_need |= AttrMask::STATUS;
        }

        let md = need_md_update(&data.db_attrs, &ctx.config.update_policy.md, now);
        if md.refresh {
            data.fs_attr_need |= AttrMask::POSIX;
        }
        md_allow_event = md.on_event || md.refresh;

        let path = need_path_update(&data.db_attrs, &ctx.config.update_policy.path, now);
        if path.refresh {
            data.fs_attr_need |= AttrMask::PATH;
        }
        path_allow_event = path.on_event || path.refresh;
    }

    fill_from_record(ctx, data, id, rec, md_allow_event, path_allow_event)
}

/// Infers attributes and refresh needs from the record type itself.
fn fill_from_record(
    ctx: &HandlerCtx,
    data: &mut Op,
    id: EntryId,
    rec: &ChangelogRecord,
    md_allow_event: bool,
    path_allow_event: bool,
) -> NextStep {
    match rec.rec_type {
        RecordType::Create => {
            if data.db_exists {
                // can happen after the filesystem was reformatted under a
                // live catalog: trust the record and refresh everything
                warn!("CREATE record on already tracked entry {id}");
                data.fs_attrs.creation_time = Some(rec.time);
                data.fs_attr_need |= AttrMask::POSIX | AttrMask::PATH | AttrMask::STRIPE | AttrMask::STATUS;
            } else {
                data.fs_attrs.status = Some(HsmStatus::New);
                data.fs_attr_need.remove(AttrMask::STATUS);
                // never archived or restored yet; 0 is the sentinel policy
                // predicates compare against
                data.fs_attrs.last_archive = Some(0);
                data.fs_attrs.last_restore = Some(0);
            }
        }
        RecordType::Mkdir | RecordType::Rmdir => {
            data.fs_attrs.kind = Some(FsKind::Directory);
            data.fs_attr_need.remove(AttrMask::STRIPE);
            data.fs_attr_need.remove(AttrMask::STATUS);
        }
        RecordType::Unlink => {
            data.fs_attr_need |= AttrMask::PATH;
            // the record does not say whether the entry survives: stat it
            data.fs_attr_need |= AttrMask::POSIX;
            if ctx.config.unlink_policy.hsm_remove {
                data.fs_attr_need |= AttrMask::STATUS;
            }
        }
        RecordType::Hsm => {
            let Some(event) = rec.hsm else {
                error!("HSM record #{} without event payload", rec.index);
                return NextStep::Drop;
            };
            match event.kind {
                HsmEventKind::Archive => {
                    if event.success {
                        data.fs_attrs.last_archive = Some(rec.time);
                        data.fs_attrs.status = Some(if event.dirty {
                            HsmStatus::Modified
                        } else {
                            HsmStatus::Synchro
                        });
                        data.fs_attr_need.remove(AttrMask::STATUS);
                    } else if event.dirty {
                        data.fs_attrs.status = Some(HsmStatus::Modified);
                        data.fs_attr_need.remove(AttrMask::STATUS);
                    } else {
                        // failed archive without a dirty flag: ask the
                        // filesystem for the actual state
                        data.fs_attr_need |= AttrMask::STATUS;
                    }
                }
                HsmEventKind::Restore => {
                    if event.success {
                        data.fs_attrs.last_restore = Some(rec.time);
                        data.fs_attrs.status = Some(HsmStatus::Synchro);
                        data.fs_attr_need.remove(AttrMask::STATUS);
                    } else if data.db_exists {
                        // entry stays released: drop it from the working set
                        data.db_op_type = DbOpType::Remove;
                        return NextStep::DbApply;
                    } else {
                        return NextStep::ChglogClr;
                    }
                }
                HsmEventKind::Release => {
                    if !event.success {
                        error!("unexpected failed release event on {id}");
                        data.fs_attr_need |= AttrMask::STATUS;
                    } else if data.db_exists {
                        data.db_op_type = DbOpType::Remove;
                        return NextStep::DbApply;
                    } else {
                        return NextStep::ChglogClr;
                    }
                }
                HsmEventKind::State => {
                    if event.dirty {
                        data.fs_attrs.status = Some(HsmStatus::Modified);
                    } else {
                        data.fs_attr_need |= AttrMask::STATUS;
                    }
                }
                HsmEventKind::Remove | HsmEventKind::Cancel => {
                    // undetermined state after these
                    data.fs_attr_need |= AttrMask::STATUS;
                }
            }
        }
        RecordType::Ctime | RecordType::Setattr => {
            data.fs_attr_need |= AttrMask::POSIX;
        }
        RecordType::Mtime | RecordType::Trunc => {
            data.fs_attr_need |= AttrMask::POSIX;
            let status = data.fs_attrs.status.or(data.db_attrs.status);
            if status != Some(HsmStatus::Modified) {
                data.fs_attr_need |= AttrMask::STATUS;
            }
        }
        _ => {}
    }

    if data.db_exists {
        // name recorded in the event vs name stored in the catalog
        if path_allow_event {
            if let Some(rec_name) = rec.name.as_deref() {
                let stored = data.db_attrs.name.as_deref().or_else(|| data.db_attrs.basename());
                if let Some(stored) = stored {
                    if stored != rec_name {
                        debug!("path refresh needed: name changed '{stored}' -> '{rec_name}'");
                        data.fs_attr_need |= AttrMask::PATH;
                    }
                }
            }
            if rec.rec_type == RecordType::Ext {
                debug!("path refresh needed: rename target event");
                data.fs_attr_need |= AttrMask::PATH;
            }
        }
        if md_allow_event && rec.rec_type.touches_metadata() {
            data.fs_attr_need |= AttrMask::POSIX;
        }
    }

    NextStep::GetInfoFs
}

fn scan_lookup(ctx: &HandlerCtx, data: &mut Op, id: EntryId, store: &mut dyn CatalogStore) -> NextStep {
    // the scanner must provide the path and basic attributes
    if data.fs_attrs.fullpath.is_none() {
        error!("scan entry without a full path, skipping");
        return NextStep::Drop;
    }

    data.db_exists = match store.exists(&id) {
        Ok(exists) => exists,
        Err(err) => {
            error!("existence check failed for {id}: {err}");
            false
        }
    };

    let is_dir = data.fs_attrs.kind.is_some_and(|k| k.is_directory());
    let is_file = data.fs_attrs.kind.is_some_and(|k| k.is_file());

    if data.db_exists {
        // fetch what the scanner could not know and the policies need
        let mut needed = ctx.config.alert_attr_mask();
        if ctx.config.pipeline.detect_fake_mtime {
            needed |= AttrMask::CREATION_TIME;
        }
        if ctx.config.pipeline.match_classes && !is_dir {
            needed |= AttrMask::CLASSES | ctx.policy.global_attr_mask();
        }
        let missing = needed - data.fs_attrs.mask();
        if !missing.is_empty() {
            data.db_attr_need = missing;
            match store.get(&id, missing) {
                Ok(attrs) => {
                    data.db_attrs = attrs;
                }
                Err(StoreError::NotExists) => {
                    trace!("no such attributes for this entry kind: {missing}");
                }
                Err(err) => {
                    error!("error retrieving entry {id} from the catalog: {err}");
                }
            }
        }

        data.db_op_type = DbOpType::Update;
        if is_file {
            // a scan resynchronises the catalog: status is always probed,
            // striping only when the catalog lost it
            if ctx.fs.supports_hsm() {
                data.fs_attr_need |= AttrMask::STATUS;
            }
            if ctx.fs.supports_stripes() && store.check_stripe(&id).is_err() {
                debug!("stripe information is missing for {id}");
                data.fs_attr_need |= AttrMask::STRIPE;
            }
        }
    } else {
        data.db_op_type = DbOpType::Insert;
        if data.fs_attrs.creation_time.is_none() {
            data.fs_attrs.creation_time = Some(now_secs());
        }
        // not a file for sure: no striping, no archive state
        let maybe_file = is_file || data.fs_attrs.kind.is_none();
        if maybe_file {
            if ctx.fs.supports_hsm() {
                data.fs_attr_need |= AttrMask::STATUS;
            }
            if ctx.fs.supports_stripes() {
                data.fs_attr_need |= AttrMask::STRIPE;
            }
        }
    }

    NextStep::GetInfoFs
}

// ---------------------------------------------------------------------------
// GET_INFO_FS
// ---------------------------------------------------------------------------

/// Refreshes from the filesystem whatever the lookup stage requested, then
/// runs fileclass matching.
fn get_info_fs(
    core: &PipelineCore,
    ctx: &HandlerCtx,
    op: &Arc<OpHandle>,
    _store: &mut dyn CatalogStore,
) -> Result<(), PipelineError> {
    let step = {
        let mut data = op.data();
        enrich_from_fs(ctx, &mut data)
    };
    step_ack(core, op, step)
}

fn enrich_from_fs(ctx: &HandlerCtx, data: &mut Op) -> NextStep {
    let Some(id) = data.id else {
        error!("op reached filesystem enrichment without an id");
        return NextStep::Drop;
    };

    // open by id when the filesystem can, else use the recorded path
    let path = ctx
        .fs
        .build_id_path(&id)
        .or_else(|| data.fullpath().map(str::to_owned));
    let Some(path) = path else {
        debug!("no access path for {id}, skipping record");
        return skip_record(data);
    };

    if data.need_getattr() {
        match ctx.fs.stat(&path) {
            Ok(stat) => {
                data.fs_attrs.merge(&stat.to_attrs(), true);
                data.fs_attrs.md_update = Some(now_secs());
            }
            Err(FsProbeError::Missing) => return vanished(ctx, data, id),
            Err(err) => {
                debug!("lstat failed on {path}: {err}");
                return skip_record(data);
            }
        }
    }

    if ctx.config.pipeline.detect_fake_mtime {
        check_fake_mtime(data, id);
    }

    if data.need_getpath() && data.extra.is_changelog() {
        match ctx.fs.id_to_path(&id) {
            Ok(fullpath) => {
                data.fs_attrs.fullpath = Some(fullpath);
                data.fs_attrs.path_update = Some(now_secs());
            }
            Err(FsProbeError::Missing) => return vanished(ctx, data, id),
            Err(err) => {
                debug!("path resolution failed for {id}: {err}");
            }
        }
    }

    // striping and archive state only make sense on regular files
    if data.need_getstripe() && data.kind().is_some_and(|k| !k.is_file()) {
        data.fs_attr_need.remove(AttrMask::STRIPE);
    }
    if data.need_getstripe() {
        match ctx.fs.get_stripe(&path) {
            Ok((info, items)) => {
                data.fs_attrs.stripe_info = Some(info);
                data.fs_attrs.stripe_items = Some(items);
            }
            Err(FsProbeError::Missing) => return vanished(ctx, data, id),
            Err(err) => {
                debug!("stripe query failed on {path}: {err}");
                data.fs_attr_need.remove(AttrMask::STRIPE);
            }
        }
    }

    if data.need_getstatus() && data.kind().is_some_and(|k| !k.is_file()) {
        data.fs_attr_need.remove(AttrMask::STATUS);
    }
    if data.need_getstatus() {
        match ctx.fs.get_hsm_status(&path) {
            Ok(status) => {
                data.fs_attrs.status = Some(status);
                if status == HsmStatus::New {
                    data.fs_attrs.last_archive = Some(0);
                    data.fs_attrs.last_restore = Some(0);
                }
            }
            Err(FsProbeError::Missing) => return vanished(ctx, data, id),
            Err(FsProbeError::Unsupported) => {
                debug!("archive status not supported for {path}, skipping record");
                return skip_record(data);
            }
            Err(err) => {
                debug!("status query failed on {path}: {err}");
            }
        }
    }

    if ctx.config.pipeline.match_classes {
        let mut merged = data.merged_attrs();
        ctx.policy.check_policies(&id, &mut merged, true);
        let classes = merged.project(AttrMask::CLASSES);
        data.fs_attrs.merge(&classes, true);
    }

    NextStep::Reporting
}

/// The filesystem object disappeared while we were enriching.
///
/// A tracked entry with archive copies becomes a deferred removal; a
/// changelog record is cleared so the cursor advances (the stream will carry
/// the matching UNLINK); a scan entry is simply dropped.
fn vanished(ctx: &HandlerCtx, data: &mut Op, id: EntryId) -> NextStep {
    trace!("entry {id} does not exist anymore");
    if ctx.config.unlink_policy.hsm_remove && data.db_exists {
        data.db_op_type = DbOpType::SoftRemove;
        return NextStep::DbApply;
    }
    skip_record(data)
}

/// Nothing to persist for this operation; changelog records still get their
/// cursor advanced.
fn skip_record(data: &Op) -> NextStep {
    if data.extra.is_changelog() {
        NextStep::ChglogClr
    } else {
        NextStep::Drop
    }
}

/// A modification time in the past of the creation time usually means a tool
/// forged timestamps. Log it, do not touch the attributes.
fn check_fake_mtime(data: &Op, id: EntryId) {
    let merged = data.merged_attrs();
    if let (Some(created), Some(modified)) = (merged.creation_time, merged.last_mod) {
        if modified < created {
            match merged.fullpath.as_deref() {
                Some(path) => debug!("fake mtime detected for {path}: mtime={modified}, creation={created}"),
                None => debug!("fake mtime detected for {id}: mtime={modified}, creation={created}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// REPORTING
// ---------------------------------------------------------------------------

/// Checks the configured alert rules against the merged attributes. The
/// stage is flagged async: the op is acknowledged first and the alert is
/// delivered afterwards, off the critical path.
fn reporting(
    core: &PipelineCore,
    ctx: &HandlerCtx,
    op: &Arc<OpHandle>,
    store: &mut dyn CatalogStore,
) -> Result<(), PipelineError> {
    let alert = {
        let data = op.data();
        build_alert(ctx, &data, store)
    };

    let async_ack = core
        .table()
        .get(STAGE_REPORTING)
        .map(|def| def.async_ack)
        .unwrap_or(false);

    if async_ack {
        core.acknowledge(op, Ack::Advance(STAGE_DB_APPLY))?;
        if let Some(alert) = alert {
            ctx.alerts.raise(alert);
        }
        Ok(())
    } else {
        if let Some(alert) = alert {
            ctx.alerts.raise(alert);
        }
        core.acknowledge(op, Ack::Advance(STAGE_DB_APPLY))
    }
}

fn build_alert(ctx: &HandlerCtx, data: &Op, store: &mut dyn CatalogStore) -> Option<Alert> {
    if ctx.config.alerts.is_empty() {
        return None;
    }
    let Some(id) = data.id else {
        return None;
    };

    let mut merged = data.merged_attrs();
    store.generate_fields(&mut merged, ctx.config.alert_attr_mask());
    let present = merged.mask();

    for rule in &ctx.config.alerts {
        // a rule only applies when every attribute it reads is known
        if !present.contains(rule.attr_mask()) {
            continue;
        }
        if ctx.policy.entry_matches(&id, &merged, &rule.rule).is_match() {
            let entry = merged.fullpath.clone().unwrap_or_else(|| id.to_string());
            return Some(Alert {
                title: rule.title.clone(),
                rule: rule.rule.to_string(),
                entry,
                values: merged.display_values(rule.attr_mask()),
            });
        }
    }
    None
}

// ---------------------------------------------------------------------------
// DB_APPLY
// ---------------------------------------------------------------------------

/// Applies the catalog mutation decided upstream. On success, operations
/// carrying a durability callback move on to the record-clearing stage;
/// everything else retires here. Store failures retire without the callback
/// so the source re-delivers the event.
fn db_apply(
    core: &PipelineCore,
    ctx: &HandlerCtx,
    op: &Arc<OpHandle>,
    store: &mut dyn CatalogStore,
) -> Result<(), PipelineError> {
    db_apply_one(core, ctx, op, store)
}

/// Batched form of the apply stage: one handler invocation covers a run of
/// compatible insertions, sparing per-op dispatch on heavy ingest. Each
/// operation is still acknowledged on its own.
fn db_apply_batch(
    core: &PipelineCore,
    ctx: &HandlerCtx,
    ops: &[Arc<OpHandle>],
    store: &mut dyn CatalogStore,
) -> Result<(), PipelineError> {
    if ops.len() > 1 {
        trace!("applying a batch of {} catalog operations", ops.len());
    }
    let mut first_err = None;
    for op in ops {
        if let Err(err) = db_apply_one(core, ctx, op, store) {
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Two operations share a batched apply when both are plain insertions.
/// Updates and removals keep individual handling.
fn inserts_batchable(a: &Op, b: &Op) -> bool {
    a.db_op_type == DbOpType::Insert && b.db_op_type == DbOpType::Insert
}

fn db_apply_one(
    core: &PipelineCore,
    ctx: &HandlerCtx,
    op: &Arc<OpHandle>,
    store: &mut dyn CatalogStore,
) -> Result<(), PipelineError> {
    let (result, has_callback) = {
        let data = op.data();
        (apply_mutation(ctx, &data, store), data.has_callback())
    };

    match result {
        Ok(()) => {
            if has_callback && store.commit_status() == catalog_pipeline_domain::CommitStatus::Committed {
                core.acknowledge(op, Ack::Advance(STAGE_CHGLOG_CLR))
            } else {
                core.acknowledge(op, Ack::Retire)
            }
        }
        Err(err) => {
            error!("catalog operation failed for op {}: {err}", op.serial());
            core.acknowledge(op, Ack::Retire)
        }
    }
}

fn apply_mutation(ctx: &HandlerCtx, data: &Op, store: &mut dyn CatalogStore) -> Result<(), StoreError> {
    let Some(id) = data.id else {
        error!("apply stage reached without an id");
        return Err(StoreError::Other("operation has no id".to_string()));
    };

    let mut write = match data.db_op_type {
        DbOpType::Insert => data.merged_attrs(),
        _ => data.fs_attrs.clone(),
    };
    // striping that was not freshly retrieved must not overwrite the catalog
    if !data.need_getstripe() {
        write.clear(AttrMask::STRIPE);
    }
    if data.db_op_type != DbOpType::Insert {
        write.clear(AttrMask::CREATION_TIME);
    }
    write.clear(AttrMask::GENERATED);

    match data.db_op_type {
        DbOpType::Insert => {
            trace!("insert({id})");
            store.insert(&id, &write)
        }
        DbOpType::Update => {
            trace!("update({id})");
            store.update(&id, &write)
        }
        DbOpType::Remove => {
            trace!("remove({id})");
            store.remove(&id)
        }
        DbOpType::SoftRemove => {
            trace!("soft_remove({id})");
            let purge_at = now_secs() + ctx.config.unlink_policy.deferred_remove_delay_secs as i64;
            store.soft_remove(&id, data.fullpath(), purge_at)
        }
        DbOpType::None => {
            error!("no catalog operation decided for entry {id}");
            Err(StoreError::Other("unhandled catalog operation".to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// CHGLOG_CLR
// ---------------------------------------------------------------------------

/// Invokes the durability callback and retires the operation. The stage is
/// sequential: source acknowledgements are issued in stream order.
fn chglog_clr(
    core: &PipelineCore,
    _ctx: &HandlerCtx,
    op: &Arc<OpHandle>,
    store: &mut dyn CatalogStore,
) -> Result<(), PipelineError> {
    let (callback, index) = {
        let mut data = op.data();
        let index = data.extra.record().map(|rec| rec.index);
        (data.callback.take(), index)
    };

    if let Some(index) = index {
        trace!("clearing changelog record #{index}");
    }
    if let Some(callback) = callback {
        if let Err(err) = callback(store) {
            error!("completion callback failed: {err}");
        }
    }
    core.acknowledge(op, Ack::Retire)
}

// ---------------------------------------------------------------------------
// GC_OLDENT
// ---------------------------------------------------------------------------

/// End-of-scan sweep: entries whose metadata stamp predates the scan were
/// not seen and no longer exist. Bulk-removes (or soft-removes) them, with
/// the store forced to commit around the operation.
fn gc_oldent(
    core: &PipelineCore,
    ctx: &HandlerCtx,
    op: &Arc<OpHandle>,
    store: &mut dyn CatalogStore,
) -> Result<(), PipelineError> {
    let (sweep, callback) = {
        let mut data = op.data();
        let sweep = match &data.extra {
            OpExtra::GcSweep(sweep) => Some(sweep.clone()),
            _ => None,
        };
        (sweep, data.callback.take())
    };
    let Some(sweep) = sweep else {
        error!("sweep stage reached without a sweep payload");
        return core.acknowledge(op, Ack::Retire);
    };

    let mut filter = GcFilter::older_than(sweep.watermark);
    if let Some(prefix) = sweep.path_prefix {
        filter = filter.under(prefix);
    }

    store.force_commit(true);
    let result = if ctx.config.unlink_policy.hsm_remove {
        let purge_at = now_secs() + ctx.config.unlink_policy.deferred_remove_delay_secs as i64;
        store.mass_soft_remove(&filter, purge_at)
    } else {
        store.mass_remove(&filter)
    };
    match result {
        Ok(count) => info!("scan sweep removed {count} stale entries"),
        Err(err) => error!("mass removal failed: {err}"),
    }

    // the callback unblocks the scanner in every case
    if let Some(callback) = callback {
        if let Err(err) = callback(store) {
            error!("sweep callback failed: {err}");
        }
    }
    store.force_commit(false);

    core.acknowledge(op, Ack::Retire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::PosixFsProbe;
    use crate::infrastructure::alerts::LogAlertSink;
    use crate::infrastructure::config::PipelineConfig;
    use crate::infrastructure::policy::RuleSetPolicyEngine;
    use catalog_pipeline_domain::{HsmEventKind, UpdatePolicy};

    fn ctx_with(mut edit: impl FnMut(&mut PipelineConfig)) -> HandlerCtx {
        let mut config = PipelineConfig::default();
        edit(&mut config);
        let config = Arc::new(config);
        let policy = RuleSetPolicyEngine::from_config(&config).unwrap();
        HandlerCtx {
            config,
            fs: Arc::new(PosixFsProbe::new()),
            policy: Arc::new(policy),
            alerts: Arc::new(LogAlertSink::new()),
        }
    }

    fn known_op() -> Op {
        let mut op = Op::new();
        op.db_exists = true;
        op.db_attrs.fullpath = Some("/fs/dir/old".to_string());
        op.db_attrs.name = Some("old".to_string());
        op.db_attrs.status = Some(HsmStatus::Synchro);
        op.db_attrs.stripe_info = Some(catalog_pipeline_domain::StripeInfo {
            stripe_count: 1,
            stripe_size: 1 << 20,
            pool: None,
        });
        op.db_attrs.md_update = Some(now_secs());
        op.db_attrs.path_update = Some(now_secs());
        op
    }

    fn id() -> EntryId {
        EntryId::from_fid(7, 7)
    }

    #[test]
    fn test_last_unlink_without_archive_removes_known_entry() {
        let ctx = ctx_with(|c| c.unlink_policy.hsm_remove = false);
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Unlink, 10).with_unlink_flags(true, false);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::DbApply);
        assert_eq!(op.db_op_type, DbOpType::Remove);
    }

    #[test]
    fn test_last_unlink_of_unknown_entry_only_clears() {
        let ctx = ctx_with(|c| c.unlink_policy.hsm_remove = false);
        let mut op = Op::new();
        let rec = ChangelogRecord::new(1, RecordType::Unlink, 10).with_unlink_flags(true, false);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::ChglogClr);
        assert_eq!(op.db_op_type, DbOpType::None);
    }

    #[test]
    fn test_last_unlink_of_archived_entry_defers_removal() {
        let ctx = ctx_with(|_| {});
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Unlink, 10).with_unlink_flags(true, true);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::DbApply);
        assert_eq!(op.db_op_type, DbOpType::SoftRemove);
    }

    #[test]
    fn test_non_last_unlink_refreshes_path() {
        let ctx = ctx_with(|_| {});
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Unlink, 10).with_unlink_flags(false, false);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::GetInfoFs);
        assert_eq!(op.db_op_type, DbOpType::Update);
        assert!(op.need_getpath());
    }

    #[test]
    fn test_create_on_unknown_entry_is_new_and_never_archived() {
        let ctx = ctx_with(|_| {});
        let mut op = Op::new();
        let rec = ChangelogRecord::new(1, RecordType::Create, 123);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::GetInfoFs);
        assert_eq!(op.db_op_type, DbOpType::Insert);
        assert_eq!(op.fs_attrs.status, Some(HsmStatus::New));
        assert_eq!(op.fs_attrs.creation_time, Some(123));
        // status known from the record, the probe is skipped
        assert!(!op.need_getstatus());
        assert_eq!(op.fs_attrs.last_archive, Some(0));
        assert_eq!(op.fs_attrs.last_restore, Some(0));
    }

    #[test]
    fn test_create_on_known_entry_forces_full_refresh() {
        let ctx = ctx_with(|_| {});
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Create, 456);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::GetInfoFs);
        assert!(op.need_getattr() && op.need_getpath() && op.need_getstripe() && op.need_getstatus());
        assert_eq!(op.fs_attrs.creation_time, Some(456));
    }

    #[test]
    fn test_mkdir_skips_file_only_probes() {
        let ctx = ctx_with(|_| {});
        let mut op = Op::new();
        let rec = ChangelogRecord::new(1, RecordType::Mkdir, 10);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::GetInfoFs);
        assert_eq!(op.fs_attrs.kind, Some(FsKind::Directory));
        assert!(!op.need_getstripe());
        assert!(!op.need_getstatus());
    }

    #[test]
    fn test_successful_archive_event_sets_status_without_probe() {
        let ctx = ctx_with(|_| {});
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Hsm, 99).with_hsm(HsmEventKind::Archive, true, false);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::GetInfoFs);
        assert_eq!(op.fs_attrs.status, Some(HsmStatus::Synchro));
        assert_eq!(op.fs_attrs.last_archive, Some(99));
        assert!(!op.need_getstatus());
    }

    #[test]
    fn test_failed_archive_without_dirty_flag_probes_status() {
        let ctx = ctx_with(|_| {});
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Hsm, 99).with_hsm(HsmEventKind::Archive, false, false);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::GetInfoFs);
        assert!(op.need_getstatus());
    }

    #[test]
    fn test_failed_restore_on_known_entry_removes_it() {
        let ctx = ctx_with(|_| {});
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Hsm, 99).with_hsm(HsmEventKind::Restore, false, false);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::DbApply);
        assert_eq!(op.db_op_type, DbOpType::Remove);
    }

    #[test]
    fn test_successful_release_on_unknown_entry_only_clears() {
        let ctx = ctx_with(|_| {});
        let mut op = Op::new();
        let rec = ChangelogRecord::new(1, RecordType::Hsm, 99).with_hsm(HsmEventKind::Release, true, false);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::ChglogClr);
    }

    #[test]
    fn test_name_mismatch_triggers_path_refresh() {
        let ctx = ctx_with(|_| {});
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Ctime, 10).with_name(EntryId::from_fid(7, 1), "renamed");
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::GetInfoFs);
        assert!(op.need_getpath());
    }

    #[test]
    fn test_rename_target_event_triggers_path_refresh() {
        let ctx = ctx_with(|_| {});
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Ext, 10);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert!(op.need_getpath());
        assert_eq!(step, NextStep::GetInfoFs);
    }

    #[test]
    fn test_mtime_event_probes_status_unless_already_modified() {
        let ctx = ctx_with(|_| {});
        let mut op = known_op();
        let rec = ChangelogRecord::new(1, RecordType::Trunc, 10);
        process_record(&ctx, &mut op, id(), &rec);
        assert!(op.need_getstatus());

        let mut dirty = known_op();
        dirty.db_attrs.status = Some(HsmStatus::Modified);
        process_record(&ctx, &mut dirty, id(), &rec);
        assert!(!dirty.need_getstatus());
    }

    #[test]
    fn test_fresh_metadata_under_periodic_policy_skips_getattr() {
        let ctx = ctx_with(|c| {
            c.update_policy.md = UpdatePolicy::Periodic { period_secs: 3600 };
        });
        let mut op = known_op();
        // close events refresh metadata only when allowed by the policy
        let rec = ChangelogRecord::new(1, RecordType::Close, 10);
        let step = process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(step, NextStep::GetInfoFs);
        assert!(!op.need_getattr());
    }

    #[test]
    fn test_stale_catalog_entry_refreshes_everything_missing() {
        let ctx = ctx_with(|_| {});
        let mut op = Op::new();
        op.db_exists = true; // known, but the catalog returned nothing useful
        let rec = ChangelogRecord::new(1, RecordType::Close, 10);
        process_record(&ctx, &mut op, id(), &rec);
        assert_eq!(op.db_op_type, DbOpType::Update);
        assert!(op.need_getattr());
        assert!(op.need_getstripe());
        assert!(op.need_getstatus());
    }

    #[test]
    fn test_batchable_only_for_insert_pairs() {
        let mut a = Op::new();
        a.db_op_type = DbOpType::Insert;
        let mut b = Op::new();
        b.db_op_type = DbOpType::Insert;
        assert!(inserts_batchable(&a, &b));
        b.db_op_type = DbOpType::Update;
        assert!(!inserts_batchable(&a, &b));
    }
}
