// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain services and evaluator ports: policy expressions, refresh
//! policies, the policy engine interface, and alert rules.

pub mod alerts;
pub mod expression;
pub mod policy_engine;
pub mod update_policy;

pub use alerts::{Alert, AlertRule, AlertSink};
pub use expression::{CmpField, CmpOp, CmpValue, Condition, ExprError, PolicyExpr};
pub use policy_engine::{MatchVerdict, PolicyCase, PolicyEngine, PolicyKind, CLASS_IGNORED, CLASS_NONE};
pub use update_policy::{
    need_fileclass_update, need_md_update, need_path_update, RefreshDecision, UpdatePolicies, UpdatePolicy,
};
