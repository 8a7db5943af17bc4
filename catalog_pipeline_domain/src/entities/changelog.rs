// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Changelog Records
//!
//! In-memory model of one record of the filesystem change stream. The wire
//! format is owned by the changelog reader; the pipeline only consumes this
//! decoded form and hands a completion callback back to the reader so the
//! stream cursor advances once the corresponding catalog change is durable.
//!
//! Record indices are strictly increasing in the order the reader produces
//! them; the final acknowledgement stage relies on that to clear records in
//! stream order.

use crate::value_objects::entry_id::EntryId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of filesystem mutation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Create,
    Mkdir,
    Rmdir,
    Unlink,
    /// Rename source event.
    Rename,
    /// Rename target event (the entry now lives under a new path).
    Ext,
    Close,
    Mtime,
    Ctime,
    Trunc,
    Setattr,
    Hsm,
}

impl RecordType {
    /// Events that only change inode metadata.
    pub fn is_ctime_event(self) -> bool {
        matches!(self, Self::Ctime | Self::Setattr)
    }

    /// Events that imply a data modification.
    pub fn is_mtime_event(self) -> bool {
        matches!(self, Self::Mtime | Self::Trunc | Self::Close)
    }

    /// Events after which the stored metadata may be stale.
    pub fn touches_metadata(self) -> bool {
        self.is_ctime_event() || self.is_mtime_event() || matches!(self, Self::Hsm)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "CREATE",
            Self::Mkdir => "MKDIR",
            Self::Rmdir => "RMDIR",
            Self::Unlink => "UNLINK",
            Self::Rename => "RENAME",
            Self::Ext => "EXT",
            Self::Close => "CLOSE",
            Self::Mtime => "MTIME",
            Self::Ctime => "CTIME",
            Self::Trunc => "TRUNC",
            Self::Setattr => "SETATTR",
            Self::Hsm => "HSM",
        };
        f.write_str(s)
    }
}

/// Archive-related sub-event carried by `RecordType::Hsm` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HsmEventKind {
    Archive,
    Restore,
    Release,
    State,
    Remove,
    Cancel,
}

/// Decoded HSM event: which operation, whether it succeeded, and whether the
/// filesystem copy was already dirty again when the event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsmEvent {
    pub kind: HsmEventKind,
    pub success: bool,
    pub dirty: bool,
}

/// Flags attached to a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFlags {
    /// For UNLINK: this was the last link to the entry.
    pub unlink_last: bool,
    /// For UNLINK: an archive copy of the entry exists.
    pub hsm_exists: bool,
}

/// One decoded record of the change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogRecord {
    /// Position in the stream, strictly increasing.
    pub index: u64,
    pub rec_type: RecordType,
    /// Event time, epoch seconds.
    pub time: i64,
    /// Target entry, when the record carries one.
    pub target_id: Option<EntryId>,
    /// Parent directory of the affected name, when the record carries one.
    pub parent_id: Option<EntryId>,
    /// Affected name within the parent, when the record carries one.
    pub name: Option<String>,
    pub flags: RecordFlags,
    /// Present only on `RecordType::Hsm` records.
    pub hsm: Option<HsmEvent>,
}

impl ChangelogRecord {
    pub fn new(index: u64, rec_type: RecordType, time: i64) -> Self {
        Self {
            index,
            rec_type,
            time,
            target_id: None,
            parent_id: None,
            name: None,
            flags: RecordFlags::default(),
            hsm: None,
        }
    }

    pub fn with_target(mut self, id: EntryId) -> Self {
        self.target_id = Some(id);
        self
    }

    pub fn with_name(mut self, parent: EntryId, name: impl Into<String>) -> Self {
        self.parent_id = Some(parent);
        self.name = Some(name.into());
        self
    }

    pub fn with_unlink_flags(mut self, last: bool, hsm_exists: bool) -> Self {
        self.flags.unlink_last = last;
        self.flags.hsm_exists = hsm_exists;
        self
    }

    pub fn with_hsm(mut self, kind: HsmEventKind, success: bool, dirty: bool) -> Self {
        self.rec_type = RecordType::Hsm;
        self.hsm = Some(HsmEvent { kind, success, dirty });
        self
    }

    /// Short descriptor used in stage dumps and logs.
    pub fn descriptor(&self) -> String {
        match self.target_id {
            Some(id) => format!("changelog #{} {} id={}", self.index, self.rec_type, id),
            None => format!("changelog #{} {}", self.index, self.rec_type),
        }
    }
}
