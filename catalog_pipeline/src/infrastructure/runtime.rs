// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Runtime
//!
//! The entry processor core: bounded admission, stage queues with their
//! movement discipline, the per-id ordering index, the scheduler, and the
//! worker pool facade.

pub mod admission;
pub mod core;
pub mod id_constraint;
pub mod op;
pub mod pipeline;
pub(crate) mod queue;
pub mod stage;

pub use self::core::{Ack, PipelineCore, StageSnapshot};
pub use self::op::{DbOpType, GcSweep, Op, OpExtra, OpHandle};
pub use self::pipeline::{run_worker_loop, Collaborators, EntryPipeline, HandlerCtx};
pub use self::stage::{BatchStageHandler, BatchableTest, StageConcurrency, StageDef, StageHandler, StageTable};
