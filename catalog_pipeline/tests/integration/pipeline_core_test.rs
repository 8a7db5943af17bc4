// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Core Scheduling Properties
//!
//! Drives custom stage tables through the real scheduler and worker harness
//! and checks the ordering and bounding guarantees: admission bound,
//! per-id handler order, sequential stage order, and per-stage thread caps.

use crate::support::{drain_workers, spawn_workers, test_ctx};
use catalog_pipeline::infrastructure::config::PipelineConfig;
use catalog_pipeline::infrastructure::repositories::MemoryCatalogFactory;
use catalog_pipeline::infrastructure::runtime::{
    Ack, Op, PipelineCore, StageConcurrency, StageDef, StageHandler, StageTable,
};
use catalog_pipeline_domain::EntryId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type EntryLog = Arc<Mutex<Vec<(Option<EntryId>, u64)>>>;

fn advance_handler(next: usize) -> StageHandler {
    Arc::new(move |core, _ctx, op, _store| core.acknowledge(op, Ack::Advance(next)))
}

fn retire_handler() -> StageHandler {
    Arc::new(|core, _ctx, op, _store| core.acknowledge(op, Ack::Retire))
}

fn recording_handler(log: EntryLog, ack: Ack, delay: Duration) -> StageHandler {
    Arc::new(move |core, _ctx, op, _store| {
        log.lock().push((op.id(), op.serial()));
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        core.acknowledge(op, ack)
    })
}

fn op_with_id(id: EntryId) -> Op {
    let mut op = Op::new();
    op.id = Some(id);
    op
}

#[test]
fn test_per_id_handler_order_matches_push_order() {
    let log: EntryLog = Arc::new(Mutex::new(Vec::new()));
    let table = StageTable::new(vec![
        StageDef::new("intake", StageConcurrency::Unbounded, advance_handler(1)),
        StageDef::new(
            "ordered",
            StageConcurrency::Unbounded,
            recording_handler(Arc::clone(&log), Ack::Advance(2), Duration::from_millis(1)),
        )
        .with_id_constraint(),
        StageDef::new("out", StageConcurrency::Unbounded, retire_handler()),
    ])
    .unwrap();

    let core = Arc::new(PipelineCore::new(table, 0));
    let ctx = test_ctx(PipelineConfig::default());
    let factory = MemoryCatalogFactory::new();
    let workers = spawn_workers(&core, &ctx, &factory, 8);

    // three interleaved waves over ten ids
    let ids: Vec<EntryId> = (0..10).map(|i| EntryId::from_fid(7, i)).collect();
    for _wave in 0..3 {
        for id in &ids {
            core.push(op_with_id(*id), 0).unwrap();
        }
    }

    drain_workers(&core, workers);

    let log = log.lock();
    assert_eq!(log.len(), 30);
    for id in &ids {
        let serials: Vec<u64> = log.iter().filter(|(i, _)| *i == Some(*id)).map(|(_, s)| *s).collect();
        assert_eq!(serials.len(), 3);
        assert!(
            serials.windows(2).all(|w| w[0] < w[1]),
            "ops for {id} ran out of push order: {serials:?}"
        );
    }
}

#[test]
fn test_sequential_stage_runs_in_arrival_order() {
    let log: EntryLog = Arc::new(Mutex::new(Vec::new()));
    let table = StageTable::new(vec![
        StageDef::new("intake", StageConcurrency::Unbounded, advance_handler(1)),
        StageDef::new(
            "serial",
            StageConcurrency::Sequential,
            recording_handler(Arc::clone(&log), Ack::Retire, Duration::ZERO),
        ),
    ])
    .unwrap();

    let core = Arc::new(PipelineCore::new(table, 0));
    let ctx = test_ctx(PipelineConfig::default());
    let factory = MemoryCatalogFactory::new();
    let workers = spawn_workers(&core, &ctx, &factory, 6);

    for _ in 0..200 {
        core.push(Op::new(), 0).unwrap();
    }
    drain_workers(&core, workers);

    let serials: Vec<u64> = log.lock().iter().map(|(_, s)| *s).collect();
    assert_eq!(serials.len(), 200);
    assert!(
        serials.windows(2).all(|w| w[0] < w[1]),
        "sequential stage ran out of arrival order"
    );
}

#[test]
fn test_bounded_stage_thread_cap_holds() {
    let inside = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));

    let handler: StageHandler = {
        let inside = Arc::clone(&inside);
        let high_water = Arc::clone(&high_water);
        Arc::new(move |core, _ctx, op, _store| {
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            inside.fetch_sub(1, Ordering::SeqCst);
            core.acknowledge(op, Ack::Retire)
        })
    };
    let table = StageTable::new(vec![StageDef::new("apply", StageConcurrency::Bounded(2), handler)]).unwrap();

    let core = Arc::new(PipelineCore::new(table, 0));
    let ctx = test_ctx(PipelineConfig::default());
    let factory = MemoryCatalogFactory::new();
    let workers = spawn_workers(&core, &ctx, &factory, 8);

    for _ in 0..100 {
        core.push(Op::new(), 0).unwrap();
    }
    drain_workers(&core, workers);

    assert!(
        high_water.load(Ordering::SeqCst) <= 2,
        "more than 2 workers entered the bounded stage"
    );
    assert_eq!(core.snapshot()[0].processed, 100);
    assert_eq!(core.count_ops(), 0);
}

#[test]
fn test_admission_bound_limits_live_ops() {
    let table = StageTable::new(vec![StageDef::new(
        "slow",
        StageConcurrency::Unbounded,
        Arc::new(|core, _ctx, op, _store| {
            std::thread::sleep(Duration::from_millis(1));
            core.acknowledge(op, Ack::Retire)
        }),
    )])
    .unwrap();

    let core = Arc::new(PipelineCore::new(table, 10));
    let ctx = test_ctx(PipelineConfig::default());
    let factory = MemoryCatalogFactory::new();
    let workers = spawn_workers(&core, &ctx, &factory, 4);

    for _ in 0..200 {
        // push blocks when the bound is reached, so the live count can
        // never exceed it
        core.push(Op::new(), 0).unwrap();
        assert!(core.count_ops() <= 10, "admission bound exceeded");
    }
    drain_workers(&core, workers);

    assert_eq!(core.count_ops(), 0);
    assert_eq!(core.admission_available(), Some(10));
}

#[test]
fn test_batched_stage_gathers_compatible_run() {
    let batch_sizes = Arc::new(Mutex::new(Vec::new()));

    let single: StageHandler = retire_handler();
    let batched: catalog_pipeline::infrastructure::runtime::BatchStageHandler = {
        let batch_sizes = Arc::clone(&batch_sizes);
        Arc::new(move |core, _ctx, ops, _store| {
            batch_sizes.lock().push(ops.len());
            for op in ops {
                core.acknowledge(op, Ack::Retire)?;
            }
            Ok(())
        })
    };
    let always: catalog_pipeline::infrastructure::runtime::BatchableTest = Arc::new(|_a, _b| true);

    let table = StageTable::new(vec![
        StageDef::new("apply", StageConcurrency::Unbounded, single).with_batch(batched, always),
    ])
    .unwrap();
    let core = Arc::new(PipelineCore::new(table, 0));
    let ctx = test_ctx(PipelineConfig::default());
    let factory = MemoryCatalogFactory::new();

    // queue everything before the single worker starts: the first claim
    // must pull the whole run in one batched invocation
    for _ in 0..5 {
        core.push(Op::new(), 0).unwrap();
    }
    let workers = spawn_workers(&core, &ctx, &factory, 1);
    drain_workers(&core, workers);

    let sizes = batch_sizes.lock();
    assert_eq!(sizes.iter().sum::<usize>(), 5);
    assert_eq!(sizes[0], 5, "pre-queued ops should form one batch");
    assert_eq!(core.count_ops(), 0);
}

#[test]
fn test_flushing_termination_retires_everything() {
    let retired = Arc::new(AtomicUsize::new(0));
    let handler: StageHandler = {
        let retired = Arc::clone(&retired);
        Arc::new(move |core, _ctx, op, _store| {
            retired.fetch_add(1, Ordering::SeqCst);
            core.acknowledge(op, Ack::Retire)
        })
    };
    let table = StageTable::new(vec![
        StageDef::new("in", StageConcurrency::Unbounded, advance_handler(1)),
        StageDef::new("out", StageConcurrency::Bounded(1), handler),
    ])
    .unwrap();

    let core = Arc::new(PipelineCore::new(table, 64));
    let ctx = test_ctx(PipelineConfig::default());
    let factory = MemoryCatalogFactory::new();
    let workers = spawn_workers(&core, &ctx, &factory, 4);

    for _ in 0..64 {
        core.push(Op::new(), 0).unwrap();
    }
    drain_workers(&core, workers);

    assert_eq!(retired.load(Ordering::SeqCst), 64);
    assert_eq!(core.count_ops(), 0);
    assert_eq!(core.admission_available(), Some(64));
    let ids = core.id_index_stats();
    assert_eq!(ids.ops, 0);
}
