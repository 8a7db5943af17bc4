// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Definitions
//!
//! Static description of one pipeline flavor: an ordered table of stages,
//! each with a name, a handler, a concurrency mode and ordering flags.
//! Dispatch is table-driven; different flavors (the standard
//! changelog-and-scan table, reduced tables used by tests) are simply
//! different tables built at construction time.

use super::core::PipelineCore;
use super::op::OpHandle;
use super::pipeline::HandlerCtx;
use catalog_pipeline_domain::{CatalogStore, PipelineError};
use std::fmt;
use std::sync::Arc;

/// How many workers may run a stage's handler at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageConcurrency {
    /// One at a time, in list order.
    Sequential,
    /// At most `n` at a time.
    Bounded(usize),
    /// No per-stage limit.
    Unbounded,
}

impl StageConcurrency {
    /// Upper bound on concurrent handler invocations, if any.
    pub fn max_threads(self) -> Option<usize> {
        match self {
            Self::Sequential => Some(1),
            Self::Bounded(n) => Some(n),
            Self::Unbounded => None,
        }
    }
}

/// Stage handler. Runs to completion on a worker thread and must finish by
/// acknowledging the operation (forward or retire) exactly once.
pub type StageHandler =
    Arc<dyn Fn(&PipelineCore, &HandlerCtx, &Arc<OpHandle>, &mut dyn CatalogStore) -> Result<(), PipelineError> + Send + Sync>;

/// Batched stage handler: one invocation over a run of compatible
/// operations, each of which must still be acknowledged exactly once.
pub type BatchStageHandler = Arc<
    dyn Fn(&PipelineCore, &HandlerCtx, &[Arc<OpHandle>], &mut dyn CatalogStore) -> Result<(), PipelineError>
        + Send
        + Sync,
>;

/// Decides whether two operations can share one batched invocation.
pub type BatchableTest = Arc<dyn Fn(&super::op::Op, &super::op::Op) -> bool + Send + Sync>;

/// One stage of a pipeline table.
#[derive(Clone)]
pub struct StageDef {
    pub name: &'static str,
    pub handler: StageHandler,
    /// When set, workers gather a run of batchable operations and hand them
    /// to this handler in one call.
    pub batch_handler: Option<BatchStageHandler>,
    pub test_batchable: Option<BatchableTest>,
    pub concurrency: StageConcurrency,
    /// Only the head of each per-id FIFO may run at this stage.
    pub id_constraint: bool,
    /// The handler acknowledges before performing its side effect.
    pub async_ack: bool,
}

impl StageDef {
    pub fn new(name: &'static str, concurrency: StageConcurrency, handler: StageHandler) -> Self {
        Self {
            name,
            handler,
            batch_handler: None,
            test_batchable: None,
            concurrency,
            id_constraint: false,
            async_ack: false,
        }
    }

    pub fn with_id_constraint(mut self) -> Self {
        self.id_constraint = true;
        self
    }

    pub fn with_async_ack(mut self) -> Self {
        self.async_ack = true;
        self
    }

    pub fn with_batch(mut self, handler: BatchStageHandler, test: BatchableTest) -> Self {
        self.batch_handler = Some(handler);
        self.test_batchable = Some(test);
        self
    }
}

impl fmt::Debug for StageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDef")
            .field("name", &self.name)
            .field("concurrency", &self.concurrency)
            .field("id_constraint", &self.id_constraint)
            .field("async_ack", &self.async_ack)
            .field("batched", &self.batch_handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Ordered, immutable set of stages making up one pipeline flavor.
#[derive(Debug, Clone)]
pub struct StageTable {
    stages: Vec<StageDef>,
}

impl StageTable {
    /// Builds a table, rejecting definitions the scheduler cannot honour.
    pub fn new(stages: Vec<StageDef>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::invalid_config("pipeline table has no stages"));
        }
        for (index, stage) in stages.iter().enumerate() {
            if let StageConcurrency::Bounded(0) = stage.concurrency {
                return Err(PipelineError::invalid_config(format!(
                    "stage {index} ({}) has a zero thread bound",
                    stage.name
                )));
            }
        }
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StageDef> {
        self.stages.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDef> {
        self.stages.iter()
    }
}
