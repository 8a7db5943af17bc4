// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shared Test Doubles
//!
//! Mock collaborators and harness helpers used by the integration tests: an
//! in-memory filesystem probe, a recording alert sink, and a worker harness
//! for driving custom stage tables through the real scheduler.

use catalog_pipeline::infrastructure::alerts::LogAlertSink;
use catalog_pipeline::infrastructure::config::PipelineConfig;
use catalog_pipeline::infrastructure::policy::RuleSetPolicyEngine;
use catalog_pipeline::infrastructure::repositories::MemoryCatalogFactory;
use catalog_pipeline::infrastructure::runtime::{run_worker_loop, HandlerCtx, PipelineCore};
use catalog_pipeline_domain::{
    Alert, AlertSink, AttrSet, CatalogStoreFactory, EntryId, FsKind, FsProbe, FsProbeError, FsStat, HsmStatus,
    StripeInfo,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

/// One simulated filesystem object.
#[derive(Debug, Clone)]
pub struct MockEntry {
    pub id: EntryId,
    pub path: String,
    pub stat: FsStat,
    pub status: Option<HsmStatus>,
    pub stripe: Option<(StripeInfo, Vec<u32>)>,
}

/// In-memory filesystem probe with full capability flags.
#[derive(Default)]
pub struct MockProbe {
    by_id: Mutex<HashMap<EntryId, MockEntry>>,
    by_path: Mutex<HashMap<String, EntryId>>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, entry: MockEntry) {
        self.by_path.lock().insert(entry.path.clone(), entry.id);
        self.by_id.lock().insert(entry.id, entry);
    }

    pub fn add_file(&self, id: EntryId, path: &str, size: u64, mtime: i64) {
        self.add(MockEntry {
            id,
            path: path.to_string(),
            stat: file_stat(size, mtime),
            status: Some(HsmStatus::Synchro),
            stripe: Some((
                StripeInfo {
                    stripe_count: 1,
                    stripe_size: 1 << 20,
                    pool: None,
                },
                vec![0],
            )),
        });
    }

    fn lookup_path(&self, path: &str) -> Result<MockEntry, FsProbeError> {
        let by_path = self.by_path.lock();
        let id = by_path.get(path).ok_or(FsProbeError::Missing)?;
        self.by_id.lock().get(id).cloned().ok_or(FsProbeError::Missing)
    }
}

pub fn file_stat(size: u64, mtime: i64) -> FsStat {
    FsStat {
        kind: FsKind::File,
        owner: "1000".to_string(),
        group: "1000".to_string(),
        size,
        last_access: mtime,
        last_mod: mtime,
        change_time: mtime,
        nlink: 1,
    }
}

impl FsProbe for MockProbe {
    fn path_to_id(&self, path: &str) -> Result<EntryId, FsProbeError> {
        Ok(self.lookup_path(path)?.id)
    }

    fn id_to_path(&self, id: &EntryId) -> Result<String, FsProbeError> {
        self.by_id.lock().get(id).map(|e| e.path.clone()).ok_or(FsProbeError::Missing)
    }

    fn build_id_path(&self, id: &EntryId) -> Option<String> {
        // ids are directly addressable, like fid paths
        Some(format!("id:{}:{}", id.hi, id.lo))
    }

    fn stat(&self, path: &str) -> Result<FsStat, FsProbeError> {
        Ok(self.resolve(path)?.stat)
    }

    fn get_stripe(&self, path: &str) -> Result<(StripeInfo, Vec<u32>), FsProbeError> {
        self.resolve(path)?.stripe.ok_or(FsProbeError::Unsupported)
    }

    fn get_hsm_status(&self, path: &str) -> Result<HsmStatus, FsProbeError> {
        self.resolve(path)?.status.ok_or(FsProbeError::Unsupported)
    }
}

impl MockProbe {
    /// Resolves both path forms: `id:<hi>:<lo>` access paths and plain ones.
    fn resolve(&self, path: &str) -> Result<MockEntry, FsProbeError> {
        if let Some(rest) = path.strip_prefix("id:") {
            let mut parts = rest.splitn(2, ':');
            let hi = parts.next().and_then(|v| v.parse::<u64>().ok());
            let lo = parts.next().and_then(|v| v.parse::<u64>().ok());
            if let (Some(hi), Some(lo)) = (hi, lo) {
                let id = EntryId { hi, lo };
                return self.by_id.lock().get(&id).cloned().ok_or(FsProbeError::Missing);
            }
            return Err(FsProbeError::Missing);
        }
        self.lookup_path(path)
    }
}

/// Alert sink recording everything it gets.
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// Handler context over mock collaborators, for driving custom tables.
pub fn test_ctx(config: PipelineConfig) -> Arc<HandlerCtx> {
    let config = Arc::new(config);
    let policy = RuleSetPolicyEngine::from_config(&config).expect("valid test config");
    Arc::new(HandlerCtx {
        config,
        fs: Arc::new(MockProbe::new()),
        policy: Arc::new(policy),
        alerts: Arc::new(LogAlertSink::new()),
    })
}

/// Spawns `n` workers over a core with a custom stage table, running the
/// production worker loop.
pub fn spawn_workers(
    core: &Arc<PipelineCore>,
    ctx: &Arc<HandlerCtx>,
    factory: &MemoryCatalogFactory,
    n: usize,
) -> Vec<JoinHandle<()>> {
    (0..n)
        .map(|_| {
            let core = Arc::clone(core);
            let ctx = Arc::clone(ctx);
            let mut store = factory.open().expect("memory store always opens");
            std::thread::spawn(move || run_worker_loop(&core, &ctx, store.as_mut()))
        })
        .collect()
}

/// Joins the worker harness after asking the core to drain.
pub fn drain_workers(core: &Arc<PipelineCore>, workers: Vec<JoinHandle<()>>) {
    core.begin_terminate(true);
    for worker in workers {
        worker.join().expect("worker thread must not panic");
    }
}

/// Seeded catalog entry for the scenario tests.
pub fn catalog_entry(path: &str, md_update: i64) -> AttrSet {
    AttrSet {
        fullpath: Some(path.to_string()),
        name: path.rsplit('/').next().map(str::to_owned),
        kind: Some(FsKind::File),
        size: Some(1),
        md_update: Some(md_update),
        path_update: Some(md_update),
        status: Some(HsmStatus::Synchro),
        stripe_info: Some(StripeInfo {
            stripe_count: 1,
            stripe_size: 1 << 20,
            pool: None,
        }),
        ..Default::default()
    }
}
