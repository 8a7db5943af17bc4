// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Scan Submission Helpers
//!
//! The tree walker itself is an external producer; these helpers shape what
//! it found into pipeline operations. A scan pass pushes one operation per
//! visited entry, then a final sweep operation whose watermark is the scan
//! start time, which removes the catalog entries the walk did not touch.

use crate::infrastructure::runtime::op::Op;
use catalog_pipeline_domain::{CatalogStore, FsStat, PipelineError};
use tracing::debug;

/// Variable name under which the last completed scan end is stored.
pub const VAR_LAST_SCAN_END: &str = "last_scan_end";

/// Builds the operation for one visited filesystem entry.
///
/// The metadata stamp is set to the visit time; the end-of-scan sweep keys
/// on it to find entries the walk never touched.
pub fn scan_entry_op(fullpath: impl Into<String>, stat: &FsStat) -> Op {
    let mut attrs = stat.to_attrs();
    attrs.md_update = Some(chrono::Utc::now().timestamp());
    Op::for_scan(fullpath, attrs)
}

/// Builds the end-of-scan sweep.
///
/// `scan_start` is the watermark: entries whose metadata stamp predates it
/// were not seen by this scan. `subtree` restricts partial scans. The
/// callback records the scan end in the catalog's variable store, the same
/// way the changelog reader records its cursor.
pub fn gc_sweep_op(scan_start: i64, subtree: Option<String>, scan_end: i64) -> Op {
    Op::for_gc_sweep(scan_start, subtree).with_callback(move |store: &mut dyn CatalogStore| {
        debug!("recording scan end {scan_end}");
        store
            .set_var(VAR_LAST_SCAN_END, &scan_end.to_string())
            .map_err(|err| PipelineError::CallbackError(err.to_string()))
    })
}
