// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entry Pipeline Facade
//!
//! Owns the core, the worker pool and the collaborator handles, and exposes
//! the producer interface: build an [`Op`], `push` it, `terminate` when the
//! sources dry up.
//!
//! ## Worker model
//!
//! A fixed pool of symmetric OS threads is created at start. Each worker
//! opens its own catalog store handle and keeps it for life; all
//! coordination between workers goes through the core's scheduler. Handlers
//! run to completion on the worker thread, so the pool is sized for I/O
//! concurrency (catalog round-trips, `lstat`, status probes), not for CPU
//! parallelism.

use super::core::{PipelineCore, StageSnapshot};
use super::op::{Op, OpExtra};
use crate::infrastructure::config::PipelineConfig;
use crate::infrastructure::handlers::standard::{self, standard_table};
use catalog_pipeline_domain::{AlertSink, CatalogStore, CatalogStoreFactory, FsProbe, PipelineError, PolicyEngine};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// External services the stage handlers call out to.
pub struct Collaborators {
    pub store: Arc<dyn CatalogStoreFactory>,
    pub fs: Arc<dyn FsProbe>,
    pub policy: Arc<dyn PolicyEngine>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Immutable context shared by every stage handler invocation.
pub struct HandlerCtx {
    pub config: Arc<PipelineConfig>,
    pub fs: Arc<dyn FsProbe>,
    pub policy: Arc<dyn PolicyEngine>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Running entry processor: core, workers, collaborators.
pub struct EntryPipeline {
    core: Arc<PipelineCore>,
    ctx: Arc<HandlerCtx>,
    workers: Vec<JoinHandle<()>>,
}

impl EntryPipeline {
    /// Validates the configuration, builds the standard stage table, opens
    /// one store handle per worker and starts the pool.
    pub fn start(config: Arc<PipelineConfig>, collaborators: Collaborators) -> Result<Self, PipelineError> {
        config.validate()?;

        let table = standard_table(collaborators.store.single_writer())?;
        let core = Arc::new(PipelineCore::new(table, config.pipeline.max_pending_operations));
        let ctx = Arc::new(HandlerCtx {
            config: Arc::clone(&config),
            fs: collaborators.fs,
            policy: collaborators.policy,
            alerts: collaborators.alerts,
        });

        // open every store connection up front so a broken backend fails
        // the start instead of a worker
        let mut stores = Vec::with_capacity(config.pipeline.nb_threads);
        for _ in 0..config.pipeline.nb_threads {
            stores.push(collaborators.store.open()?);
        }

        let mut workers = Vec::with_capacity(stores.len());
        for (index, store) in stores.into_iter().enumerate() {
            let core = Arc::clone(&core);
            let ctx = Arc::clone(&ctx);
            let handle = std::thread::Builder::new()
                .name(format!("entry-proc-{index}"))
                .spawn(move || worker_loop(index, core, ctx, store))
                .map_err(|err| PipelineError::internal(format!("cannot start worker {index}: {err}")))?;
            workers.push(handle);
        }

        info!(
            workers = workers.len(),
            max_pending = config.pipeline.max_pending_operations,
            "entry pipeline started"
        );
        Ok(Self { core, ctx, workers })
    }

    /// The core, for direct access to counters and dumps.
    pub fn core(&self) -> &Arc<PipelineCore> {
        &self.core
    }

    pub fn ctx(&self) -> &Arc<HandlerCtx> {
        &self.ctx
    }

    /// Admits an operation at the stage its source dictates: changelog
    /// records enter at the catalog lookup (they already carry an id), scan
    /// results enter at identity resolution, sweep commands at the sweep
    /// stage.
    pub fn push(&self, op: Op) -> Result<(), PipelineError> {
        let start_stage = match &op.extra {
            OpExtra::Changelog(_) => standard::STAGE_GET_INFO_DB,
            OpExtra::GcSweep(_) => standard::STAGE_GC_OLDENT,
            OpExtra::None => standard::STAGE_GET_ID,
        };
        self.core.push(op, start_stage)
    }

    /// Admits an operation at an explicit stage.
    pub fn push_at(&self, op: Op, start_stage: usize) -> Result<(), PipelineError> {
        self.core.push(op, start_stage)
    }

    /// Stops the pipeline and joins every worker.
    ///
    /// With `flush`, workers first drain every queued operation; without,
    /// they exit as soon as nothing is runnable and linked operations are
    /// abandoned (their callbacks never fire, the sources re-deliver).
    pub fn terminate(mut self, flush: bool) -> Result<(), PipelineError> {
        let remaining = self.core.count_ops();
        if remaining > 0 {
            info!("waiting for pipeline flush: {remaining} operations still queued");
        }
        self.core.begin_terminate(flush);

        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("entry-proc").to_string();
            if handle.join().is_err() {
                error!("worker thread {name} panicked");
            }
        }

        let leftover = self.core.count_ops();
        if leftover > 0 {
            info!("pipeline stopped with {leftover} operations abandoned");
        } else {
            info!("pipeline successfully flushed");
        }
        self.core.dump();
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<StageSnapshot> {
        self.core.snapshot()
    }

    pub fn dump(&self) {
        self.core.dump();
    }
}

fn worker_loop(index: usize, core: Arc<PipelineCore>, ctx: Arc<HandlerCtx>, mut store: Box<dyn CatalogStore>) {
    debug!("pipeline worker #{index} started");
    run_worker_loop(&core, &ctx, store.as_mut());
    if !core.is_terminating() {
        error!("worker #{index} got no work but no termination was requested");
    }
    debug!("pipeline worker #{index} terminated");
}

/// One worker's pull loop: claim a runnable operation, run its stage
/// handler (batched when the stage supports it), repeat until shutdown.
///
/// Exposed so test harnesses can drive custom stage tables with exactly the
/// production dispatch.
pub fn run_worker_loop(core: &Arc<PipelineCore>, ctx: &Arc<HandlerCtx>, store: &mut dyn CatalogStore) {
    while let Some(op) = core.next_runnable() {
        let stage_index = op.stage();
        let def = match core.table().get(stage_index) {
            Some(def) => def,
            None => {
                error!("op {} scheduled at unknown stage {stage_index}", op.serial());
                continue;
            }
        };
        // handlers acknowledge themselves; an error here is already resolved
        // (op retired or re-routed), it is only surfaced for the logs
        if let Some(batch_handler) = &def.batch_handler {
            let max = ctx.config.pipeline.max_batch_size.max(1);
            let batch = core.claim_batch(&op, max);
            if let Err(err) = batch_handler(core, ctx, &batch, store) {
                error!("batched stage {} failed ({} ops): {err}", def.name, batch.len());
            }
        } else if let Err(err) = (def.handler)(core, ctx, &op, store) {
            error!("stage {} failed for op {}: {err}", def.name, op.serial());
        }
    }
}
