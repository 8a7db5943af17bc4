// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! Hierarchical error type for the catalog pipeline domain. Every fallible
//! operation in the workspace returns `Result<T, PipelineError>` (or a more
//! specific port error that converts into it), so callers can propagate with
//! `?` and match on categories at the edges.
//!
//! ## Error Categories
//!
//! - **Configuration**: malformed or inconsistent settings detected at init.
//!   The pipeline refuses to start on these.
//! - **Pipeline state**: violations of the stage machine, e.g. acknowledging
//!   an operation to a stage it has already passed.
//! - **Collaborators**: failures reported by the catalog store, the
//!   filesystem probe or the policy evaluator. These are per-operation and
//!   never tear down the pipeline itself.
//! - **System**: unexpected internal failures.

use thiserror::Error;

/// Error type shared by the whole catalog pipeline workspace.
///
/// Variants carry a human-readable message; categorisation is the variant
/// itself. Per-operation errors (store, probe, policy, callback) are logged
/// and resolved by retiring or re-routing the affected operation; they are
/// never allowed to panic a worker.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid pipeline stage: {0}")]
    InvalidStage(String),

    #[error("Missing attribute: {0}")]
    MissingAttribute(String),

    #[error("Catalog store error: {0}")]
    StoreError(String),

    #[error("Filesystem probe error: {0}")]
    FsProbeError(String),

    #[error("Policy evaluation error: {0}")]
    PolicyError(String),

    #[error("Completion callback error: {0}")]
    CallbackError(String),

    #[error("Pipeline terminated: {0}")]
    Terminated(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new stage-machine violation error
    pub fn invalid_stage(msg: impl Into<String>) -> Self {
        Self::InvalidStage(msg.into())
    }

    /// Creates a new missing-attribute error
    pub fn missing_attribute(msg: impl Into<String>) -> Self {
        Self::MissingAttribute(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Whether this error is tied to a single operation rather than the
    /// pipeline as a whole.
    pub fn is_per_operation(&self) -> bool {
        matches!(
            self,
            Self::StoreError(_)
                | Self::FsProbeError(_)
                | Self::PolicyError(_)
                | Self::CallbackError(_)
                | Self::MissingAttribute(_)
        )
    }
}
