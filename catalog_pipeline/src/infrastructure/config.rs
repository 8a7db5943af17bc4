// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Configuration
//!
//! TOML-backed configuration of the entry processor. Loaded once at startup,
//! validated before the pipeline starts (a bad configuration refuses to
//! start rather than limping), and immutable for the pipeline's lifetime.
//!
//! ## File layout
//!
//! ```toml
//! [pipeline]
//! nb_threads = 8
//! max_pending_operations = 10000   # 0 = unbounded
//! match_classes = true
//! detect_fake_mtime = false
//!
//! [unlink_policy]
//! hsm_remove = true
//! deferred_remove_delay_secs = 86400
//!
//! [update_policy]
//! md = { mode = "always" }
//! path = { mode = "on_event_periodic", min_secs = 0, max_secs = 86400 }
//! fileclass = { mode = "periodic", period_secs = 3600 }
//!
//! [[alert]]
//! title = "huge scratch file"
//! rule = { cmp = { attr = "size", op = "gt", value = 1073741824 } }
//!
//! [[fileclass]]
//! name = "logs"
//! rule = { cmp = { attr = "name", op = "like", value = "*.log" } }
//! ```

use catalog_pipeline_domain::services::alerts::AlertRule;
use catalog_pipeline_domain::services::expression::PolicyExpr;
use catalog_pipeline_domain::{AttrMask, PipelineError, UpdatePolicies};
use serde::Deserialize;
use std::path::Path;

fn default_nb_threads() -> usize {
    4
}

fn default_max_pending() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_deferred_delay() -> u64 {
    86_400
}

fn default_max_batch() -> usize {
    100
}

/// Core pipeline sizing and feature switches (`[pipeline]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// Worker pool size.
    pub nb_threads: usize,
    /// Admission bound; 0 disables backpressure.
    pub max_pending_operations: usize,
    /// Largest run of operations handed to a batched stage handler.
    pub max_batch_size: usize,
    /// Run fileclass matching during enrichment.
    pub match_classes: bool,
    /// Warn about modification times older than the creation time.
    pub detect_fake_mtime: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            nb_threads: default_nb_threads(),
            max_pending_operations: default_max_pending(),
            max_batch_size: default_max_batch(),
            match_classes: default_true(),
            detect_fake_mtime: false,
        }
    }
}

/// What to do with catalog entries whose filesystem object is gone
/// (`[unlink_policy]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnlinkPolicy {
    /// Keep archived entries as soft-removed instead of deleting outright.
    pub hsm_remove: bool,
    /// Grace delay added to the soft-removal purge timestamp, seconds.
    pub deferred_remove_delay_secs: u64,
}

impl Default for UnlinkPolicy {
    fn default() -> Self {
        Self {
            hsm_remove: default_true(),
            deferred_remove_delay_secs: default_deferred_delay(),
        }
    }
}

/// One fileclass definition (`[[fileclass]]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileclassDef {
    pub name: String,
    pub rule: PolicyExpr,
}

/// One whitelist entry (`[[ignore]]`): matching entries are excluded from
/// policies of both families.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IgnoreRule {
    pub rule: PolicyExpr,
}

/// Full entry processor configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub pipeline: PipelineSettings,
    pub unlink_policy: UnlinkPolicy,
    pub update_policy: UpdatePolicies,
    #[serde(rename = "alert")]
    pub alerts: Vec<AlertRule>,
    #[serde(rename = "fileclass")]
    pub fileclasses: Vec<FileclassDef>,
    #[serde(rename = "ignore")]
    pub ignores: Vec<IgnoreRule>,
}

impl PipelineConfig {
    /// Parses a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text).map_err(|err| PipelineError::invalid_config(err.to_string()))
    }

    /// Loads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| PipelineError::invalid_config(format!("cannot read {}: {err}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Rejects configurations the pipeline cannot run with. Called before
    /// start; failures abort initialisation.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.pipeline.nb_threads == 0 {
            return Err(PipelineError::invalid_config("pipeline.nb_threads must be at least 1"));
        }
        self.update_policy.validate().map_err(PipelineError::invalid_config)?;

        let mut names: Vec<&str> = self.fileclasses.iter().map(|fc| fc.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.fileclasses.len() {
            return Err(PipelineError::invalid_config("duplicate fileclass name"));
        }
        for fc in &self.fileclasses {
            if fc.name.is_empty() || fc.name.starts_with('[') {
                return Err(PipelineError::invalid_config(format!(
                    "invalid fileclass name '{}'",
                    fc.name
                )));
            }
        }
        Ok(())
    }

    /// Union of the attributes referenced by the configured alert rules.
    pub fn alert_attr_mask(&self) -> AttrMask {
        let mut mask = AttrMask::EMPTY;
        for rule in &self.alerts {
            mask |= rule.attr_mask();
        }
        mask
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }
}
