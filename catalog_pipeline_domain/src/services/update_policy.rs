// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Refresh Policies
//!
//! Decides when cached catalog information is stale enough to re-read from
//! the filesystem. Three independent policies exist, for POSIX metadata,
//! for the path, and for fileclass matching results. Each compares the
//! stored update stamp (`md_update`, `path_update`,
//! `arch_cl_update`/`rel_cl_update`) against the configured mode.
//!
//! The `on_event` modes do not refresh by themselves; they return a flag
//! telling the caller that a semantically relevant change event (rename for
//! paths, time or attribute change for metadata) is allowed to trigger the
//! refresh.

use crate::services::policy_engine::PolicyKind;
use crate::value_objects::attr_set::AttrSet;
use serde::{Deserialize, Serialize};

/// When to refresh one category of cached information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Keep any known value forever.
    Never,
    /// Refresh on every pass.
    Always,
    /// Refresh only when a relevant event implies it.
    OnEvent,
    /// Refresh when the stored value is older than `period_secs`.
    Periodic { period_secs: u64 },
    /// Skip below `min_secs`, force above `max_secs`, in between allow
    /// event-driven refresh.
    OnEventPeriodic { min_secs: u64, max_secs: u64 },
}

impl UpdatePolicy {
    /// Rejects combinations the engine cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if let Self::OnEventPeriodic { min_secs, max_secs } = self {
            if min_secs > max_secs {
                return Err(format!("on_event_periodic: min_secs ({min_secs}) > max_secs ({max_secs})"));
            }
        }
        Ok(())
    }
}

/// The three refresh policies of the entry processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatePolicies {
    pub md: UpdatePolicy,
    pub path: UpdatePolicy,
    pub fileclass: UpdatePolicy,
}

impl Default for UpdatePolicies {
    fn default() -> Self {
        Self {
            md: UpdatePolicy::Always,
            path: UpdatePolicy::OnEventPeriodic {
                min_secs: 0,
                max_secs: 86_400,
            },
            fileclass: UpdatePolicy::Always,
        }
    }
}

impl UpdatePolicies {
    pub fn validate(&self) -> Result<(), String> {
        self.md.validate()?;
        self.path.validate()?;
        self.fileclass.validate()?;
        if matches!(self.fileclass, UpdatePolicy::OnEvent | UpdatePolicy::OnEventPeriodic { .. }) {
            return Err("fileclass update policy supports only never/always/periodic".to_string());
        }
        Ok(())
    }
}

/// Outcome of a staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDecision {
    /// Refresh now, regardless of events.
    pub refresh: bool,
    /// A relevant change event may trigger the refresh.
    pub on_event: bool,
}

impl RefreshDecision {
    const REFRESH: Self = Self {
        refresh: true,
        on_event: false,
    };
    const KEEP: Self = Self {
        refresh: false,
        on_event: false,
    };
    const EVENT: Self = Self {
        refresh: false,
        on_event: true,
    };
}

fn decide(last: Option<i64>, force_refresh: bool, policy: &UpdatePolicy, now: i64) -> RefreshDecision {
    let last = match last {
        // never recorded: there is nothing to keep
        None => return RefreshDecision::REFRESH,
        Some(v) => v,
    };
    if force_refresh {
        return RefreshDecision::REFRESH;
    }
    match policy {
        UpdatePolicy::Always => RefreshDecision::REFRESH,
        UpdatePolicy::Never => RefreshDecision::KEEP,
        UpdatePolicy::OnEvent => RefreshDecision::EVENT,
        UpdatePolicy::Periodic { period_secs } => {
            if now.saturating_sub(last) >= *period_secs as i64 {
                RefreshDecision::REFRESH
            } else {
                RefreshDecision::KEEP
            }
        }
        UpdatePolicy::OnEventPeriodic { min_secs, max_secs } => {
            let age = now.saturating_sub(last);
            if age < *min_secs as i64 {
                RefreshDecision::KEEP
            } else if age >= *max_secs as i64 {
                RefreshDecision::REFRESH
            } else {
                RefreshDecision::EVENT
            }
        }
    }
}

/// Staleness check for POSIX metadata, keyed on `md_update`.
pub fn need_md_update(attrs: &AttrSet, policy: &UpdatePolicy, now: i64) -> RefreshDecision {
    decide(attrs.md_update, false, policy, now)
}

/// Staleness check for the path, keyed on `path_update`.
///
/// A recorded path that is not absolute is only a fragment and always forces
/// a refresh, whatever the policy says.
pub fn need_path_update(attrs: &AttrSet, policy: &UpdatePolicy, now: i64) -> RefreshDecision {
    let partial = attrs.fullpath.as_deref().is_some_and(|p| !p.starts_with('/'));
    decide(attrs.path_update, partial, policy, now)
}

/// Staleness check for fileclass matching results.
///
/// Looks at the class/stamp pair of the given policy kind. Only
/// never/always/periodic are meaningful here; configuration validation
/// rejects the event-driven modes.
pub fn need_fileclass_update(attrs: &AttrSet, policy: &UpdatePolicy, kind: PolicyKind, now: i64) -> bool {
    let (stamp, class) = match kind {
        PolicyKind::Archive => (attrs.arch_cl_update, attrs.archive_class.as_ref()),
        PolicyKind::Release => (attrs.rel_cl_update, attrs.release_class.as_ref()),
    };
    let last = match (stamp, class) {
        (Some(last), Some(_)) => last,
        // no previous match recorded
        _ => return true,
    };
    match policy {
        UpdatePolicy::Never => false,
        UpdatePolicy::Periodic { period_secs } => now.saturating_sub(last) >= *period_secs as i64,
        _ => true,
    }
}
