// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Changelog Submission Helpers
//!
//! Glue between a changelog reader and the pipeline. The reader decodes
//! records, hands them in here with a cursor, and gets its cursor advanced
//! exactly when the corresponding catalog change is durable: the record's
//! completion callback runs on the sequential clearing stage, in stream
//! order.

use crate::infrastructure::runtime::op::Op;
use catalog_pipeline_domain::{CatalogStore, ChangelogRecord, PipelineError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Variable name under which the cleared-record cursor is persisted.
pub const VAR_CHANGELOG_CURSOR: &str = "changelog_cursor";

/// Shared cursor over a change stream: highest record index whose effects
/// are durable in the catalog.
#[derive(Debug, Default)]
pub struct ChangelogCursor {
    cleared: Mutex<Option<u64>>,
}

impl ChangelogCursor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest cleared record index, if any record was cleared yet.
    pub fn position(&self) -> Option<u64> {
        *self.cleared.lock()
    }

    fn clear_up_to(&self, index: u64) {
        let mut cleared = self.cleared.lock();
        *cleared = Some(cleared.map_or(index, |prev| prev.max(index)));
    }
}

/// Builds the pipeline operation for one record, wired to advance `cursor`
/// (and persist it in the catalog variable store) once the record's catalog
/// change is committed.
pub fn changelog_op(record: ChangelogRecord, cursor: Arc<ChangelogCursor>) -> Op {
    let index = record.index;
    Op::for_changelog(record).with_callback(move |store: &mut dyn CatalogStore| {
        trace!("changelog cursor advances past record #{index}");
        cursor.clear_up_to(index);
        store
            .set_var(VAR_CHANGELOG_CURSOR, &index.to_string())
            .map_err(|err| PipelineError::CallbackError(err.to_string()))
    })
}
