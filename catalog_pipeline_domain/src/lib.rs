// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Catalog Pipeline Domain Layer
//!
//! Pure domain layer of the catalog pipeline: the vocabulary and the
//! contracts the entry processor core is written against, with no runtime,
//! no I/O and no threads.
//!
//! ## Contents
//!
//! - **Value objects**: [`EntryId`] (stable identity of a filesystem
//!   object), [`AttrSet`]/[`AttrMask`] (sparse attribute record plus
//!   presence/fetch masks), [`HsmStatus`].
//! - **Entities**: decoded [`ChangelogRecord`]s of the filesystem change
//!   stream.
//! - **Services**: the policy expression language and its evaluator port,
//!   refresh ("update") policies deciding when cached information is stale,
//!   and alert rules.
//! - **Ports**: [`CatalogStore`] (catalog database handle),
//!   [`CatalogStoreFactory`], [`FsProbe`] (filesystem adapter),
//!   [`AlertSink`].
//! - **Errors**: [`PipelineError`], shared by the whole workspace.
//!
//! ## Layering
//!
//! This crate follows the dependency rule of the workspace: it depends on
//! nothing but serialization and error-derive support. The pipeline runtime,
//! the adapters and the binary all live in the main crate and depend on this
//! one, never the other way around.

pub mod entities;
pub mod error;
pub mod repositories;
pub mod services;
pub mod value_objects;

pub use entities::{ChangelogRecord, HsmEvent, HsmEventKind, RecordFlags, RecordType};
pub use error::PipelineError;
pub use repositories::{
    CatalogStore, CatalogStoreFactory, CommitStatus, FsProbe, FsProbeError, FsStat, GcFilter, StoreError,
    StoreResult,
};
pub use services::{
    Alert, AlertRule, AlertSink, MatchVerdict, PolicyCase, PolicyEngine, PolicyExpr, PolicyKind, UpdatePolicies,
    UpdatePolicy, CLASS_IGNORED, CLASS_NONE,
};
pub use value_objects::{AttrMask, AttrSet, EntryId, FsKind, HsmStatus, StripeInfo};
