// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Policy Evaluator Port
//!
//! Interface to the policy evaluator the pipeline consults during
//! enrichment: expression matching for alert rules, whitelist checks, and
//! fileclass matching that binds entries to policies. The evaluator itself is
//! a collaborator; the pipeline only depends on this trait.

use crate::services::expression::PolicyExpr;
use crate::value_objects::attr_set::{AttrMask, AttrSet};
use crate::value_objects::entry_id::EntryId;

/// Which policy family a question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Copy-to-backend policies (selects `archive_class`).
    Archive,
    /// Space-release policies (selects `release_class`).
    Release,
}

/// Result of matching one entry against one expression.
///
/// `MissingAttr` is a real outcome, not an error: callers treat it as
/// "no match at this site" and log it, per the pipeline error model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchVerdict {
    Match,
    NoMatch,
    MissingAttr,
    Error(String),
}

impl MatchVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// The `(policy, fileset)` pair selected for an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCase {
    pub policy: String,
    pub fileset: Option<String>,
}

/// Fileclass name stored when no class matched an entry.
pub const CLASS_NONE: &str = "[none]";
/// Fileclass name stored for whitelisted (ignored) entries.
pub const CLASS_IGNORED: &str = "[ignored]";

/// Policy evaluator consumed by the enrichment stages.
pub trait PolicyEngine: Send + Sync {
    /// Matches a single expression against an entry.
    fn entry_matches(&self, id: &EntryId, attrs: &AttrSet, expr: &PolicyExpr) -> MatchVerdict;

    /// Whether the entry is excluded from the given policy family.
    fn is_whitelisted(&self, id: &EntryId, attrs: &AttrSet, kind: PolicyKind) -> bool;

    /// Policy case bound to the entry for the given family, if any.
    fn get_policy_case(&self, id: &EntryId, attrs: &AttrSet, kind: PolicyKind) -> Option<PolicyCase>;

    /// Runs fileclass matching and writes the resulting class names and
    /// update stamps into `attrs`. With `match_classes` false this is a
    /// no-op; the flag travels with the call so the pipeline configuration
    /// stays in one place.
    fn check_policies(&self, id: &EntryId, attrs: &mut AttrSet, match_classes: bool);

    /// Attributes any policy of the configuration may read. The database
    /// lookup stage fetches at least this set.
    fn global_attr_mask(&self) -> AttrMask;
}
