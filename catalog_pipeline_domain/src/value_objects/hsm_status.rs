// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # HSM Status Value Object
//!
//! Describes an entry's relation to the backend archive. The status is either
//! inferred from changelog events (archive/restore/release outcomes) or
//! probed directly from the filesystem, and is one of the attributes the
//! catalog persists.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relation of an entry to the backend archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HsmStatus {
    /// Never copied to the archive.
    New,
    /// Modified since the last archive copy.
    Modified,
    /// Archive copy in progress.
    Archiving,
    /// Archive copy exists and is up to date.
    Synchro,
    /// Data released from the filesystem, archive copy remains.
    Released,
    /// Restore from the archive in progress.
    Restoring,
}

impl HsmStatus {
    /// True when the entry data only lives in the filesystem.
    pub fn is_dirty(self) -> bool {
        matches!(self, Self::New | Self::Modified)
    }

    /// True when an archive copy exists (current or being restored).
    pub fn has_backend_copy(self) -> bool {
        matches!(self, Self::Synchro | Self::Released | Self::Restoring)
    }
}

impl std::str::FromStr for HsmStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "modified" => Ok(Self::Modified),
            "archiving" => Ok(Self::Archiving),
            "synchro" => Ok(Self::Synchro),
            "released" => Ok(Self::Released),
            "restoring" => Ok(Self::Restoring),
            other => Err(format!("unknown archive status '{other}'")),
        }
    }
}

impl fmt::Display for HsmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Archiving => "archiving",
            Self::Synchro => "synchro",
            Self::Released => "released",
            Self::Restoring => "restoring",
        };
        f.write_str(s)
    }
}
