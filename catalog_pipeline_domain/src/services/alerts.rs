// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Alert Rules and Sink Port
//!
//! Alert rules are boolean expressions over the merged attributes of an
//! entry, checked by the reporting stage. When a rule matches, an [`Alert`]
//! is handed to the configured [`AlertSink`]. The pipeline owes at-least-once
//! delivery per matching rule per operation; transport, batching and
//! deduplication belong to the sink implementation.

use crate::services::expression::PolicyExpr;
use crate::value_objects::attr_set::AttrMask;
use serde::{Deserialize, Serialize};

/// One configured alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Optional human-readable title, reproduced in the alert.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    /// Expression that triggers the alert.
    pub rule: PolicyExpr,
}

impl AlertRule {
    /// Attributes the rule needs to evaluate. A rule is only checked against
    /// entries whose attribute mask covers this set.
    pub fn attr_mask(&self) -> AttrMask {
        self.rule.attr_mask()
    }
}

/// A raised alert, ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub title: Option<String>,
    /// Textual form of the matched rule.
    pub rule: String,
    /// Entry descriptor: full path when known, otherwise the id.
    pub entry: String,
    /// Rendering of the attribute values the rule looked at.
    pub values: String,
}

/// Delivery port for alerts.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}
