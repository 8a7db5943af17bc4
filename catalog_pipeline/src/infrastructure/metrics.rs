// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Metrics
//!
//! Prometheus gauges over the live stage counters, refreshed from the same
//! snapshots that feed the log dump. The registry is process-wide; an
//! embedding service can expose it over its own endpoint.

use crate::infrastructure::runtime::core::StageSnapshot;
use once_cell::sync::Lazy;
use prometheus::{IntGaugeVec, Opts, Registry};
use tracing::error;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The registry all pipeline metrics are registered in.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Gauge family per stage counter.
pub struct PipelineMetrics {
    waiting: IntGaugeVec,
    running: IntGaugeVec,
    done: IntGaugeVec,
    processed: IntGaugeVec,
}

impl PipelineMetrics {
    pub fn new() -> Option<Self> {
        let make = |name: &str, help: &str| {
            IntGaugeVec::new(Opts::new(name, help), &["stage"]).ok()
        };
        let waiting = make("entry_proc_stage_waiting", "Operations waiting at each stage")?;
        let running = make("entry_proc_stage_running", "Operations running at each stage")?;
        let done = make("entry_proc_stage_done", "Operations finished and waiting to move forward")?;
        let processed = make("entry_proc_stage_processed_total", "Operations ever processed per stage")?;

        for gauge in [&waiting, &running, &done, &processed] {
            if let Err(err) = REGISTRY.register(Box::new(gauge.clone())) {
                error!("cannot register pipeline metrics: {err}");
                return None;
            }
        }
        Some(Self {
            waiting,
            running,
            done,
            processed,
        })
    }

    /// Publishes one snapshot of the stage counters.
    pub fn observe(&self, snapshot: &[StageSnapshot]) {
        for stage in snapshot {
            self.waiting.with_label_values(&[stage.name]).set(stage.waiting as i64);
            self.running.with_label_values(&[stage.name]).set(stage.running as i64);
            self.done.with_label_values(&[stage.name]).set(stage.done as i64);
            self.processed
                .with_label_values(&[stage.name])
                .set(stage.processed as i64);
        }
    }
}
