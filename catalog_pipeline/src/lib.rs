// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Catalog Pipeline
//!
//! Staged entry processor for filesystem catalogs. Change events from a
//! filesystem change stream and results from tree scans are pushed into a
//! bounded, partially parallel pipeline that enriches each entry from the
//! catalog and the filesystem, matches it against policy and alert rules,
//! and applies ordered catalog mutations. Source acknowledgements only go
//! out after the corresponding catalog change is durable.
//!
//! ## Architecture
//!
//! ```text
//!  producers              entry processor core                collaborators
//!  ─────────   ┌──────────────────────────────────────────┐   ────────────
//!  changelog ─▶│ GET_ID → GET_INFO_DB → GET_INFO_FS →     │──▶ CatalogStore
//!  reader      │        REPORTING → DB_APPLY →            │──▶ FsProbe
//!  tree     ──▶│        CHGLOG_CLR │ GC_OLDENT            │──▶ PolicyEngine
//!  scanner     └──────────────────────────────────────────┘──▶ AlertSink
//! ```
//!
//! The core guarantees:
//!
//! - at most `max_pending_operations` operations in flight (admission
//!   semaphore; the only producer backpressure);
//! - per-entry ordering: operations on one id run their ordered stages in
//!   push order, while unrelated entries overtake freely;
//! - strict stream-order source acknowledgement via a single sequential
//!   clearing stage;
//! - exactly-once processing with durability before acknowledgement.
//!
//! ## Layering
//!
//! The pure vocabulary and the collaborator ports live in
//! `catalog-pipeline-domain`. This crate holds the runtime
//! ([`infrastructure::runtime`]), the stage handler suite
//! ([`infrastructure::handlers::standard`]), concrete adapters, and the
//! `catalog_pipeline` binary. Entry-point concerns (CLI, logging, signals)
//! live in `catalog-pipeline-bootstrap`.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use catalog_pipeline::application::scan;
//! use catalog_pipeline::infrastructure::adapters::PosixFsProbe;
//! use catalog_pipeline::infrastructure::alerts::LogAlertSink;
//! use catalog_pipeline::infrastructure::config::PipelineConfig;
//! use catalog_pipeline::infrastructure::policy::RuleSetPolicyEngine;
//! use catalog_pipeline::infrastructure::repositories::MemoryCatalogFactory;
//! use catalog_pipeline::infrastructure::runtime::{Collaborators, EntryPipeline};
//!
//! # fn main() -> Result<(), catalog_pipeline_domain::PipelineError> {
//! let config = Arc::new(PipelineConfig::default());
//! let policy = RuleSetPolicyEngine::from_config(&config)?;
//! let pipeline = EntryPipeline::start(
//!     Arc::clone(&config),
//!     Collaborators {
//!         store: Arc::new(MemoryCatalogFactory::new()),
//!         fs: Arc::new(PosixFsProbe::new()),
//!         policy: Arc::new(policy),
//!         alerts: Arc::new(LogAlertSink::new()),
//!     },
//! )?;
//!
//! let probe = PosixFsProbe::new();
//! use catalog_pipeline_domain::FsProbe;
//! let stat = probe.stat("/etc/hosts").map_err(catalog_pipeline_domain::PipelineError::from)?;
//! pipeline.push(scan::scan_entry_op("/etc/hosts", &stat))?;
//! pipeline.terminate(true)?;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod infrastructure;

// Tests are organized as:
// - Unit tests: #[cfg(test)] modules within each source file
// - Integration tests: separate files in tests/ directory

// Re-export domain types for convenient access
pub use catalog_pipeline_domain::{
    AttrMask, AttrSet, ChangelogRecord, EntryId, FsKind, HsmStatus, PipelineError, RecordType,
};

pub use infrastructure::runtime::{Ack, Collaborators, EntryPipeline, Op, PipelineCore};
