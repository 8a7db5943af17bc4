// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # End-to-End Scenarios
//!
//! Full pipeline runs over the standard handler suite with mock
//! collaborators: event sequences on one entry, unlink handling, vanishing
//! objects, the end-of-scan sweep, and alert delivery.

use crate::support::{catalog_entry, file_stat, MockProbe, RecordingAlertSink};
use catalog_pipeline::application::scan::{self, VAR_LAST_SCAN_END};
use catalog_pipeline::infrastructure::alerts::LogAlertSink;
use catalog_pipeline::infrastructure::config::PipelineConfig;
use catalog_pipeline::infrastructure::handlers::standard::STAGE_GET_INFO_DB;
use catalog_pipeline::infrastructure::policy::RuleSetPolicyEngine;
use catalog_pipeline::infrastructure::repositories::{MemoryCatalogFactory, StoreCall};
use catalog_pipeline::infrastructure::runtime::{Collaborators, EntryPipeline, Op};
use catalog_pipeline_domain::{
    AlertSink, AttrSet, CatalogStore, ChangelogRecord, EntryId, FsKind, PipelineError, RecordType,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;

/// Callback trace: record index and whether the entry existed in the main
/// catalog table at the instant its acknowledgement fired. The second field
/// proves durability-before-ack: inserts and updates are visible, removals
/// have already taken effect.
type AckLog = Arc<Mutex<Vec<(u64, bool)>>>;

fn tracked_changelog_op(rec: ChangelogRecord, log: AckLog) -> Op {
    let index = rec.index;
    let id = rec.target_id;
    Op::for_changelog(rec).with_callback(move |store: &mut dyn CatalogStore| {
        let present = match id {
            Some(id) => store.exists(&id).unwrap_or(false),
            None => false,
        };
        log.lock().push((index, present));
        Ok::<(), PipelineError>(())
    })
}

fn base_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.pipeline.nb_threads = 4;
    config.pipeline.max_pending_operations = 100;
    config.pipeline.match_classes = false;
    config
}

fn start(
    config: PipelineConfig,
    factory: Arc<MemoryCatalogFactory>,
    probe: Arc<MockProbe>,
    alerts: Arc<dyn AlertSink>,
) -> EntryPipeline {
    let config = Arc::new(config);
    let policy = Arc::new(RuleSetPolicyEngine::from_config(&config).expect("valid config"));
    EntryPipeline::start(
        config,
        Collaborators {
            store: factory,
            fs: probe,
            policy,
            alerts,
        },
    )
    .expect("pipeline starts")
}

#[test]
fn test_create_modify_unlink_applies_in_order() {
    let mut config = base_config();
    config.unlink_policy.hsm_remove = true;

    let factory = Arc::new(MemoryCatalogFactory::new().with_journal());
    let catalog = factory.shared();
    let probe = Arc::new(MockProbe::new());
    let id = EntryId::from_fid(0x200, 17);
    probe.add_file(id, "/fs/dir/f1", 4096, 1000);

    let pipeline = start(config, Arc::clone(&factory), Arc::clone(&probe), Arc::new(LogAlertSink::new()));
    let acks: AckLog = Arc::new(Mutex::new(Vec::new()));
    let parent = EntryId::from_fid(0x200, 1);

    let records = vec![
        ChangelogRecord::new(1, RecordType::Create, 1000)
            .with_target(id)
            .with_name(parent, "f1"),
        ChangelogRecord::new(2, RecordType::Setattr, 1001).with_target(id),
        ChangelogRecord::new(3, RecordType::Unlink, 1002)
            .with_target(id)
            .with_name(parent, "f1")
            .with_unlink_flags(true, true),
    ];
    for rec in records {
        pipeline.push(tracked_changelog_op(rec, Arc::clone(&acks))).unwrap();
    }
    pipeline.terminate(true).unwrap();

    // catalog mutations in event order
    assert_eq!(
        catalog.journal(),
        vec![StoreCall::Insert(id), StoreCall::Update(id), StoreCall::SoftRemove(id)]
    );
    // one acknowledgement per record, in stream order, each after its
    // catalog change took effect: present after insert and update, gone
    // after the soft removal
    assert_eq!(acks.lock().clone(), vec![(1, true), (2, true), (3, false)]);
    // the entry ended up in the deferred-removal set with a future purge date
    assert_eq!(catalog.soft_removed_ids(), vec![id]);
    let purge_at = catalog.purge_at(&id).expect("purge date recorded");
    assert!(purge_at > Utc::now().timestamp());
}

#[test]
fn test_unlink_of_unknown_entry_only_clears_the_record() {
    let mut config = base_config();
    config.unlink_policy.hsm_remove = false;

    let factory = Arc::new(MemoryCatalogFactory::new().with_journal());
    let catalog = factory.shared();
    let probe = Arc::new(MockProbe::new());
    let pipeline = start(config, Arc::clone(&factory), probe, Arc::new(LogAlertSink::new()));

    let acks: AckLog = Arc::new(Mutex::new(Vec::new()));
    let rec = ChangelogRecord::new(9, RecordType::Unlink, 500)
        .with_target(EntryId::from_fid(5, 5))
        .with_unlink_flags(true, false);
    pipeline.push(tracked_changelog_op(rec, Arc::clone(&acks))).unwrap();
    pipeline.terminate(true).unwrap();

    assert!(catalog.journal().is_empty(), "no catalog mutation expected");
    assert_eq!(acks.lock().clone(), vec![(9, false)]);
}

#[test]
fn test_same_entry_events_clear_in_stream_order() {
    let config = base_config();
    let factory = Arc::new(MemoryCatalogFactory::new().with_journal());
    let catalog = factory.shared();
    let probe = Arc::new(MockProbe::new());
    let id = EntryId::from_fid(3, 33);
    probe.add_file(id, "/fs/dir/hot", 10, 100);
    catalog.seed(id, catalog_entry("/fs/dir/hot", 100));

    let pipeline = start(config, Arc::clone(&factory), Arc::clone(&probe), Arc::new(LogAlertSink::new()));
    let acks: AckLog = Arc::new(Mutex::new(Vec::new()));
    for index in 10..13 {
        let rec = ChangelogRecord::new(index, RecordType::Setattr, 100 + index as i64).with_target(id);
        pipeline.push(tracked_changelog_op(rec, Arc::clone(&acks))).unwrap();
    }
    pipeline.terminate(true).unwrap();

    assert_eq!(
        catalog.journal(),
        vec![StoreCall::Update(id), StoreCall::Update(id), StoreCall::Update(id)]
    );
    assert_eq!(acks.lock().clone(), vec![(10, true), (11, true), (12, true)]);
}

#[test]
fn test_scan_sweep_removes_only_unseen_entries() {
    let mut config = base_config();
    config.unlink_policy.hsm_remove = false;

    let factory = Arc::new(MemoryCatalogFactory::new());
    let catalog = factory.shared();
    let probe = Arc::new(MockProbe::new());

    let now = Utc::now().timestamp();
    let seen = [
        (EntryId::from_fid(1, 1), "/fs/x"),
        (EntryId::from_fid(1, 2), "/fs/y"),
        (EntryId::from_fid(1, 3), "/fs/z"),
    ];
    let unseen = EntryId::from_fid(1, 4);
    for (id, path) in &seen {
        probe.add_file(*id, path, 100, now - 1000);
        catalog.seed(*id, catalog_entry(path, now - 1000));
    }
    catalog.seed(unseen, catalog_entry("/fs/w", now - 1000));

    let pipeline = start(config, Arc::clone(&factory), Arc::clone(&probe), Arc::new(LogAlertSink::new()));
    for (_, path) in &seen {
        pipeline.push(scan::scan_entry_op(*path, &file_stat(100, now - 1000))).unwrap();
    }
    pipeline.push(scan::gc_sweep_op(now - 5, None, now)).unwrap();
    pipeline.terminate(true).unwrap();

    let mut remaining = catalog.ids();
    remaining.sort();
    assert_eq!(remaining, vec![seen[0].0, seen[1].0, seen[2].0]);
    // sweep callback recorded the scan end
    assert_eq!(catalog.var(VAR_LAST_SCAN_END), Some(now.to_string()));
}

#[test]
fn test_vanished_entry_becomes_deferred_removal() {
    let mut config = base_config();
    config.unlink_policy.hsm_remove = true;

    let factory = Arc::new(MemoryCatalogFactory::new().with_journal());
    let catalog = factory.shared();
    let probe = Arc::new(MockProbe::new());
    let id = EntryId::from_fid(8, 80);
    catalog.seed(id, catalog_entry("/fs/ghost", 100));
    // nothing registered in the probe: every query reports the object gone

    let pipeline = start(config, Arc::clone(&factory), probe, Arc::new(LogAlertSink::new()));
    let mut op = Op::for_scan("/fs/ghost", scanner_attrs());
    op.id = Some(id);
    pipeline.push_at(op, STAGE_GET_INFO_DB).unwrap();
    pipeline.terminate(true).unwrap();

    assert_eq!(catalog.journal(), vec![StoreCall::SoftRemove(id)]);
    assert_eq!(catalog.soft_removed_ids(), vec![id]);
}

#[test]
fn test_vanished_entry_without_archive_copy_is_dropped() {
    let mut config = base_config();
    config.unlink_policy.hsm_remove = false;

    let factory = Arc::new(MemoryCatalogFactory::new().with_journal());
    let catalog = factory.shared();
    let probe = Arc::new(MockProbe::new());
    let id = EntryId::from_fid(8, 81);
    catalog.seed(id, catalog_entry("/fs/ghost2", 100));

    let pipeline = start(config, Arc::clone(&factory), probe, Arc::new(LogAlertSink::new()));
    let mut op = Op::for_scan("/fs/ghost2", scanner_attrs());
    op.id = Some(id);
    pipeline.push_at(op, STAGE_GET_INFO_DB).unwrap();
    pipeline.terminate(true).unwrap();

    // retired with no catalog change; the entry stays until the next sweep
    assert!(catalog.journal().is_empty());
    assert_eq!(catalog.ids(), vec![id]);
}

#[test]
fn test_matching_alert_is_delivered_once() {
    let mut config = base_config();
    config.alerts = PipelineConfig::from_toml(
        r#"
[[alert]]
title = "big file"
rule = { cmp = { attr = "size", op = "gt", value = 100 } }
"#,
    )
    .unwrap()
    .alerts;

    let factory = Arc::new(MemoryCatalogFactory::new());
    let probe = Arc::new(MockProbe::new());
    let big = EntryId::from_fid(2, 1);
    let small = EntryId::from_fid(2, 2);
    probe.add_file(big, "/fs/big.bin", 500, 10);
    probe.add_file(small, "/fs/small.bin", 5, 10);

    let sink = Arc::new(RecordingAlertSink::new());
    let pipeline = start(config, factory, Arc::clone(&probe), Arc::clone(&sink) as Arc<dyn AlertSink>);
    pipeline.push(scan::scan_entry_op("/fs/big.bin", &file_stat(500, 10))).unwrap();
    pipeline.push(scan::scan_entry_op("/fs/small.bin", &file_stat(5, 10))).unwrap();
    pipeline.terminate(true).unwrap();

    let alerts = sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].entry, "/fs/big.bin");
    assert_eq!(alerts[0].title.as_deref(), Some("big file"));
    assert!(alerts[0].values.contains("size"));
}

fn scanner_attrs() -> AttrSet {
    AttrSet {
        kind: Some(FsKind::File),
        size: Some(1),
        last_mod: Some(100),
        md_update: Some(Utc::now().timestamp()),
        ..Default::default()
    }
}
