// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Rule-Based Policy Engine
//!
//! [`PolicyEngine`] implementation over the fileclass and whitelist rules of
//! the configuration file. Fileclass matching evaluates the classes in
//! declaration order and binds the first match; the result and its update
//! stamp are written into the entry attributes so the catalog remembers
//! them, and the fileclass refresh policy decides when a remembered match is
//! re-evaluated.
//!
//! Entries matching a whitelist rule are bound to the reserved
//! `[ignored]` class; entries matching nothing get `[none]`. Both sentinels
//! are real class names to the rest of the system.

use crate::infrastructure::config::PipelineConfig;
use catalog_pipeline_domain::services::update_policy::need_fileclass_update;
use catalog_pipeline_domain::{
    AttrMask, AttrSet, EntryId, MatchVerdict, PipelineError, PolicyCase, PolicyEngine, PolicyExpr, PolicyKind,
    UpdatePolicy, CLASS_IGNORED, CLASS_NONE,
};
use chrono::Utc;
use tracing::{debug, warn};

struct Fileclass {
    name: String,
    rule: PolicyExpr,
}

/// Policy evaluator built from the configuration file.
pub struct RuleSetPolicyEngine {
    classes: Vec<Fileclass>,
    ignores: Vec<PolicyExpr>,
    fileclass_policy: UpdatePolicy,
    global_mask: AttrMask,
}

impl RuleSetPolicyEngine {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let classes: Vec<Fileclass> = config
            .fileclasses
            .iter()
            .map(|fc| Fileclass {
                name: fc.name.clone(),
                rule: fc.rule.clone(),
            })
            .collect();
        let ignores: Vec<PolicyExpr> = config.ignores.iter().map(|ig| ig.rule.clone()).collect();

        let mut global_mask = AttrMask::EMPTY;
        for class in &classes {
            global_mask |= class.rule.attr_mask();
        }
        for ignore in &ignores {
            global_mask |= ignore.attr_mask();
        }

        Ok(Self {
            classes,
            ignores,
            fileclass_policy: config.update_policy.fileclass,
            global_mask,
        })
    }

    /// First fileclass whose rule matches, or the sentinel class names.
    fn match_class(&self, id: &EntryId, attrs: &AttrSet) -> String {
        for ignore in &self.ignores {
            if matches_quietly(id, attrs, ignore) {
                return CLASS_IGNORED.to_string();
            }
        }
        for class in &self.classes {
            if matches_quietly(id, attrs, &class.rule) {
                return class.name.clone();
            }
        }
        CLASS_NONE.to_string()
    }
}

/// Evaluates an expression, logging and treating missing attributes as a
/// no-match at this site.
fn matches_quietly(id: &EntryId, attrs: &AttrSet, expr: &PolicyExpr) -> bool {
    match expr.evaluate(attrs) {
        Ok(matched) => matched,
        Err(err) => {
            warn!("cannot evaluate rule for {id}: {err}");
            false
        }
    }
}

impl PolicyEngine for RuleSetPolicyEngine {
    fn entry_matches(&self, id: &EntryId, attrs: &AttrSet, expr: &PolicyExpr) -> MatchVerdict {
        match expr.evaluate(attrs) {
            Ok(true) => MatchVerdict::Match,
            Ok(false) => MatchVerdict::NoMatch,
            Err(catalog_pipeline_domain::services::expression::ExprError::MissingAttr(attr)) => {
                warn!("rule on {id} needs attribute '{attr}' which is not set");
                MatchVerdict::MissingAttr
            }
            Err(err) => MatchVerdict::Error(err.to_string()),
        }
    }

    fn is_whitelisted(&self, id: &EntryId, attrs: &AttrSet, kind: PolicyKind) -> bool {
        // one whitelist applies to both policy families
        let _ = kind;
        self.ignores.iter().any(|expr| matches_quietly(id, attrs, expr))
    }

    fn get_policy_case(&self, _id: &EntryId, attrs: &AttrSet, kind: PolicyKind) -> Option<PolicyCase> {
        let class = match kind {
            PolicyKind::Archive => attrs.archive_class.as_deref(),
            PolicyKind::Release => attrs.release_class.as_deref(),
        }?;
        if class == CLASS_IGNORED {
            return None;
        }
        let policy = match kind {
            PolicyKind::Archive => "archive",
            PolicyKind::Release => "release",
        };
        Some(PolicyCase {
            policy: policy.to_string(),
            fileset: (class != CLASS_NONE).then(|| class.to_string()),
        })
    }

    fn check_policies(&self, id: &EntryId, attrs: &mut AttrSet, match_classes: bool) {
        if !match_classes {
            return;
        }
        let now = Utc::now().timestamp();

        if need_fileclass_update(attrs, &self.fileclass_policy, PolicyKind::Archive, now) {
            let class = self.match_class(id, attrs);
            debug!("archive class of {id}: {class}");
            attrs.archive_class = Some(class);
            attrs.arch_cl_update = Some(now);
        }
        if need_fileclass_update(attrs, &self.fileclass_policy, PolicyKind::Release, now) {
            let class = self.match_class(id, attrs);
            attrs.release_class = Some(class);
            attrs.rel_cl_update = Some(now);
        }
    }

    fn global_attr_mask(&self) -> AttrMask {
        self.global_mask
    }
}
