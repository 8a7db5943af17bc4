// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Catalog Pipeline Daemon
//!
//! Composes the bootstrap layer, the collaborators and the entry pipeline.
//! The `scan` command walks a directory tree, feeds every entry through the
//! pipeline against an in-memory catalog and optionally sweeps entries the
//! walk did not see; `check-config` validates the configuration and exits.

use anyhow::Context;
use catalog_pipeline::application::scan;
use catalog_pipeline::infrastructure::adapters::PosixFsProbe;
use catalog_pipeline::infrastructure::alerts::{LogAlertSink, SpoolingAlertSink};
use catalog_pipeline::infrastructure::config::PipelineConfig;
use catalog_pipeline::infrastructure::metrics::PipelineMetrics;
use catalog_pipeline::infrastructure::policy::RuleSetPolicyEngine;
use catalog_pipeline::infrastructure::repositories::MemoryCatalogFactory;
use catalog_pipeline::infrastructure::runtime::{Collaborators, EntryPipeline};
use catalog_pipeline_bootstrap::{
    init_logging, parse_cli, spawn_signal_listener, CancellationToken, Commands, ExitCode, ShutdownCoordinator,
};
use catalog_pipeline_domain::FsProbe;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

fn main() {
    let cli = parse_cli();
    if let Err(err) = init_logging(cli.verbose) {
        eprintln!("{err}");
        ExitCode::RuntimeError.exit();
    }

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!("{err:#}");
            ExitCode::ConfigError.exit();
        }
    };

    let code = match cli.command {
        Commands::CheckConfig => {
            info!(
                "configuration is valid: {} workers, {} alerts, {} fileclasses",
                config.pipeline.nb_threads,
                config.alert_count(),
                config.fileclasses.len()
            );
            ExitCode::Success
        }
        Commands::Scan { root, gc } => match run_scan(config, &root, gc) {
            Ok(interrupted) => {
                if interrupted {
                    ExitCode::Interrupted
                } else {
                    ExitCode::Success
                }
            }
            Err(err) => {
                error!("{err:#}");
                ExitCode::RuntimeError
            }
        },
    };
    code.exit();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.validate().context("validating configuration")?;
    Ok(config)
}

/// Runs one scan pass. Returns whether it was interrupted.
fn run_scan(config: Arc<PipelineConfig>, root: &Path, gc: bool) -> anyhow::Result<bool> {
    let coordinator = ShutdownCoordinator::new();
    spawn_signal_listener(&coordinator);
    let token = coordinator.token();

    let store = Arc::new(MemoryCatalogFactory::new());
    let catalog = store.shared();
    let probe = Arc::new(PosixFsProbe::new());
    let policy = Arc::new(RuleSetPolicyEngine::from_config(&config)?);
    let alerts = Arc::new(SpoolingAlertSink::new(Arc::new(LogAlertSink::new())));

    let pipeline = EntryPipeline::start(
        Arc::clone(&config),
        Collaborators {
            store,
            fs: Arc::clone(&probe) as Arc<dyn FsProbe>,
            policy,
            alerts,
        },
    )?;
    let metrics = PipelineMetrics::new();

    let scan_start = Utc::now().timestamp();
    let root_str = root.to_string_lossy().to_string();
    info!("scanning {root_str}");

    let pushed = walk_tree(&pipeline, probe.as_ref(), root, &token)?;
    let interrupted = token.is_cancelled();

    if gc && !interrupted {
        let scan_end = Utc::now().timestamp();
        pipeline.push(scan::gc_sweep_op(scan_start, Some(root_str), scan_end))?;
    } else if gc {
        warn!("scan interrupted, skipping the sweep of unseen entries");
    }

    if let Some(metrics) = &metrics {
        metrics.observe(&pipeline.snapshot());
    }
    pipeline.terminate(true)?;
    info!("scan done: {pushed} entries pushed, {} now in the catalog", catalog.len());
    Ok(interrupted)
}

/// Iterative tree walk pushing one scan operation per entry.
fn walk_tree(
    pipeline: &EntryPipeline,
    probe: &PosixFsProbe,
    root: &Path,
    token: &CancellationToken,
) -> anyhow::Result<u64> {
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    let mut pushed = 0u64;

    while let Some(dir) = pending.pop() {
        if token.is_cancelled() {
            break;
        }
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("cannot read {}: {err}", dir.display());
                continue;
            }
        };
        for entry in entries {
            if token.is_cancelled() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("read error under {}: {err}", dir.display());
                    continue;
                }
            };
            let path = entry.path();
            let path_display = path.to_string_lossy().to_string();
            match probe.stat(&path_display) {
                Ok(stat) => {
                    if stat.kind.is_directory() {
                        pending.push(path);
                    }
                    pipeline.push(scan::scan_entry_op(path_display, &stat))?;
                    pushed += 1;
                }
                Err(err) => warn!("cannot stat {path_display}: {err}"),
            }
        }
    }
    Ok(pushed)
}
