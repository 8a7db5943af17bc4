// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Stress Test
//!
//! Pushes a large batch of synthetic operations with random identities
//! through a four-stage table under bounded admission, from concurrent
//! producers, and checks global accounting and per-id ordering at the end.

use crate::support::{drain_workers, spawn_workers, test_ctx};
use catalog_pipeline::infrastructure::config::PipelineConfig;
use catalog_pipeline::infrastructure::repositories::MemoryCatalogFactory;
use catalog_pipeline::infrastructure::runtime::{
    Ack, Op, PipelineCore, StageConcurrency, StageDef, StageHandler, StageTable,
};
use catalog_pipeline_domain::EntryId;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const OPS_PER_PRODUCER: usize = 5_000;
const PRODUCERS: usize = 4;
const ID_SPACE: u64 = 500;

#[test]
fn test_stress_random_ids_drain_cleanly() {
    let check_log: Arc<Mutex<Vec<(EntryId, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let retired = Arc::new(AtomicUsize::new(0));

    // stage 0: assign a random identity, like a record parser would
    let parse: StageHandler = Arc::new(|core, _ctx, op, _store| {
        let mut rng = rand::rng();
        let id = EntryId::from_fid(1, rng.random_range(0..ID_SPACE) as u32);
        op.set_id(id);
        core.acknowledge(op, Ack::Advance(1))
    });

    // stage 1: ordered per id; drops one op out of fifty
    let check: StageHandler = {
        let check_log = Arc::clone(&check_log);
        let retired = Arc::clone(&retired);
        Arc::new(move |core, _ctx, op, _store| {
            if let Some(id) = op.id() {
                check_log.lock().push((id, op.serial()));
            }
            if op.serial() % 50 == 0 {
                retired.fetch_add(1, Ordering::SeqCst);
                core.acknowledge(op, Ack::Retire)
            } else {
                core.acknowledge(op, Ack::Advance(2))
            }
        })
    };

    let report: StageHandler = Arc::new(|core, _ctx, op, _store| core.acknowledge(op, Ack::Advance(3)));

    // stage 3: bounded writer, like a single-writer database
    let apply: StageHandler = {
        let retired = Arc::clone(&retired);
        Arc::new(move |core, _ctx, op, _store| {
            retired.fetch_add(1, Ordering::SeqCst);
            core.acknowledge(op, Ack::Retire)
        })
    };

    let table = StageTable::new(vec![
        StageDef::new("parse", StageConcurrency::Unbounded, parse),
        StageDef::new("check", StageConcurrency::Unbounded, check).with_id_constraint(),
        StageDef::new("report", StageConcurrency::Unbounded, report),
        StageDef::new("apply", StageConcurrency::Bounded(4), apply),
    ])
    .unwrap();

    let core = Arc::new(PipelineCore::new(table, 512));
    let ctx = test_ctx(PipelineConfig::default());
    let factory = MemoryCatalogFactory::new();
    let workers = spawn_workers(&core, &ctx, &factory, 8);

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let core = Arc::clone(&core);
            std::thread::spawn(move || {
                for _ in 0..OPS_PER_PRODUCER {
                    core.push(Op::new(), 0).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    drain_workers(&core, workers);

    let total = PRODUCERS * OPS_PER_PRODUCER;
    assert_eq!(retired.load(Ordering::SeqCst), total, "every op retires exactly once");
    assert_eq!(core.count_ops(), 0);
    assert_eq!(core.admission_available(), Some(512));
    assert_eq!(core.id_index_stats().ops, 0);

    // ordered stage saw every op once, and per id in admission order
    let log = check_log.lock();
    assert_eq!(log.len(), total);
    let mut last_serial: HashMap<EntryId, u64> = HashMap::new();
    for (id, serial) in log.iter() {
        if let Some(prev) = last_serial.insert(*id, *serial) {
            assert!(prev < *serial, "id {id} ran serial {serial} after {prev}");
        }
    }

    let processed: u64 = core.snapshot().iter().map(|s| s.processed).sum();
    assert!(processed as usize >= total, "stage counters undercount");
}
