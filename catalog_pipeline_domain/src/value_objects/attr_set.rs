// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Attribute Set Value Object
//!
//! Sparse record of everything the pipeline knows about a filesystem entry,
//! together with a bitmask describing which attributes are present.
//!
//! ## Overview
//!
//! The attribute vocabulary is closed: path information (`fullpath`, `name`,
//! `parent_id`, `depth`), POSIX metadata (`kind`, `owner`, `group`, `size`,
//! timestamps), catalog bookkeeping (`md_update`, `path_update`,
//! `creation_time`), archive state (`status`, `last_archive`, `last_restore`),
//! striping (`stripe_info`, `stripe_items`) and fileclass results
//! (`archive_class`, `release_class` and their update stamps).
//!
//! Two sets coexist on every pipeline operation: the attributes already known
//! to the catalog and the fresh values obtained during the current pass.
//! [`AttrSet::merge`] combines them with an explicit precedence flag.
//!
//! [`AttrMask`] doubles as the "what to fetch next" currency: enrichment
//! stages receive masks naming the attributes they still have to obtain, and
//! clear bits as they go.
//!
//! ## Sentinels
//!
//! `last_archive == 0` means both "never archived" and is a comparable
//! timestamp; policy predicates rely on that, so the value is stored as plain
//! epoch seconds with no `Option` layering on top.

use crate::value_objects::entry_id::EntryId;
use crate::value_objects::hsm_status::HsmStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not, Sub};

/// Bitmask over the closed attribute vocabulary.
///
/// Used both as the presence mask of an [`AttrSet`] and as a fetch-list for
/// the enrichment stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrMask(u32);

macro_rules! attr_fields {
    ($each:ident) => {
        $each!(fullpath, FULLPATH);
        $each!(name, NAME);
        $each!(parent_id, PARENT_ID);
        $each!(depth, DEPTH);
        $each!(kind, KIND);
        $each!(owner, OWNER);
        $each!(group, GROUP);
        $each!(size, SIZE);
        $each!(last_access, LAST_ACCESS);
        $each!(last_mod, LAST_MOD);
        $each!(creation_time, CREATION_TIME);
        $each!(md_update, MD_UPDATE);
        $each!(path_update, PATH_UPDATE);
        $each!(status, STATUS);
        $each!(stripe_info, STRIPE_INFO);
        $each!(stripe_items, STRIPE_ITEMS);
        $each!(last_archive, LAST_ARCHIVE);
        $each!(last_restore, LAST_RESTORE);
        $each!(archive_class, ARCHIVE_CLASS);
        $each!(release_class, RELEASE_CLASS);
        $each!(arch_cl_update, ARCH_CL_UPDATE);
        $each!(rel_cl_update, REL_CL_UPDATE);
    };
}

impl AttrMask {
    pub const EMPTY: AttrMask = AttrMask(0);

    pub const FULLPATH: AttrMask = AttrMask(1 << 0);
    pub const NAME: AttrMask = AttrMask(1 << 1);
    pub const PARENT_ID: AttrMask = AttrMask(1 << 2);
    pub const DEPTH: AttrMask = AttrMask(1 << 3);
    pub const KIND: AttrMask = AttrMask(1 << 4);
    pub const OWNER: AttrMask = AttrMask(1 << 5);
    pub const GROUP: AttrMask = AttrMask(1 << 6);
    pub const SIZE: AttrMask = AttrMask(1 << 7);
    pub const LAST_ACCESS: AttrMask = AttrMask(1 << 8);
    pub const LAST_MOD: AttrMask = AttrMask(1 << 9);
    pub const CREATION_TIME: AttrMask = AttrMask(1 << 10);
    pub const MD_UPDATE: AttrMask = AttrMask(1 << 11);
    pub const PATH_UPDATE: AttrMask = AttrMask(1 << 12);
    pub const STATUS: AttrMask = AttrMask(1 << 13);
    pub const STRIPE_INFO: AttrMask = AttrMask(1 << 14);
    pub const STRIPE_ITEMS: AttrMask = AttrMask(1 << 15);
    pub const LAST_ARCHIVE: AttrMask = AttrMask(1 << 16);
    pub const LAST_RESTORE: AttrMask = AttrMask(1 << 17);
    pub const ARCHIVE_CLASS: AttrMask = AttrMask(1 << 18);
    pub const RELEASE_CLASS: AttrMask = AttrMask(1 << 19);
    pub const ARCH_CL_UPDATE: AttrMask = AttrMask(1 << 20);
    pub const REL_CL_UPDATE: AttrMask = AttrMask(1 << 21);

    /// Every attribute of the vocabulary.
    pub const ALL: AttrMask = AttrMask((1 << 22) - 1);

    /// Attributes filled by a plain `lstat`.
    pub const POSIX: AttrMask = AttrMask(
        Self::KIND.0 | Self::OWNER.0 | Self::GROUP.0 | Self::SIZE.0 | Self::LAST_ACCESS.0 | Self::LAST_MOD.0,
    );

    /// Path-related attributes.
    pub const PATH: AttrMask = AttrMask(Self::FULLPATH.0 | Self::NAME.0 | Self::PARENT_ID.0 | Self::DEPTH.0);

    /// Striping attributes.
    pub const STRIPE: AttrMask = AttrMask(Self::STRIPE_INFO.0 | Self::STRIPE_ITEMS.0);

    /// Fileclass matching results and their update stamps.
    pub const CLASSES: AttrMask = AttrMask(
        Self::ARCHIVE_CLASS.0 | Self::RELEASE_CLASS.0 | Self::ARCH_CL_UPDATE.0 | Self::REL_CL_UPDATE.0,
    );

    /// Attributes derived by the catalog, never written back to it.
    pub const GENERATED: AttrMask = AttrMask(Self::DEPTH.0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is present in `self`.
    pub fn contains(self, other: AttrMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when at least one bit is shared with `other`.
    pub fn intersects(self, other: AttrMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: AttrMask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: AttrMask) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Names of the attributes present in this mask, in vocabulary order.
    pub fn names(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        macro_rules! collect {
            ($field:ident, $bit:ident) => {
                if self.intersects(AttrMask::$bit) {
                    out.push(stringify!($field));
                }
            };
        }
        attr_fields!(collect);
        out
    }
}

impl BitOr for AttrMask {
    type Output = AttrMask;
    fn bitor(self, rhs: AttrMask) -> AttrMask {
        AttrMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for AttrMask {
    fn bitor_assign(&mut self, rhs: AttrMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AttrMask {
    type Output = AttrMask;
    fn bitand(self, rhs: AttrMask) -> AttrMask {
        AttrMask(self.0 & rhs.0)
    }
}

impl Sub for AttrMask {
    type Output = AttrMask;
    fn sub(self, rhs: AttrMask) -> AttrMask {
        AttrMask(self.0 & !rhs.0)
    }
}

impl Not for AttrMask {
    type Output = AttrMask;
    fn not(self) -> AttrMask {
        AttrMask(!self.0 & AttrMask::ALL.0)
    }
}

impl fmt::Display for AttrMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Filesystem object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsKind {
    File,
    Directory,
    Symlink,
    Fifo,
    Socket,
    BlockDevice,
    CharDevice,
}

impl FsKind {
    pub fn is_file(self) -> bool {
        matches!(self, Self::File)
    }

    pub fn is_directory(self) -> bool {
        matches!(self, Self::Directory)
    }
}

impl std::str::FromStr for FsKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "dir" | "directory" => Ok(Self::Directory),
            "symlink" => Ok(Self::Symlink),
            "fifo" => Ok(Self::Fifo),
            "socket" => Ok(Self::Socket),
            "blkdev" => Ok(Self::BlockDevice),
            "chrdev" => Ok(Self::CharDevice),
            other => Err(format!("unknown object type '{other}'")),
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::Directory => "dir",
            Self::Symlink => "symlink",
            Self::Fifo => "fifo",
            Self::Socket => "socket",
            Self::BlockDevice => "blkdev",
            Self::CharDevice => "chrdev",
        };
        f.write_str(s)
    }
}

/// Layout summary of a striped file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeInfo {
    /// Number of storage targets the file is spread over.
    pub stripe_count: u32,
    /// Bytes per stripe.
    pub stripe_size: u64,
    /// Storage pool name, when assigned.
    pub pool: Option<String>,
}

/// Sparse attribute record plus implicit presence mask.
///
/// Presence is encoded by `Option`; [`AttrSet::mask`] computes the mask on
/// demand so the two can never disagree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrSet {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fullpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<EntryId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<FsKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_access: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_mod: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub creation_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub md_update: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path_update: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<HsmStatus>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stripe_info: Option<StripeInfo>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stripe_items: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_archive: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_restore: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub archive_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub release_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub arch_cl_update: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rel_cl_update: Option<i64>,
}

impl AttrSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask of the attributes currently present.
    pub fn mask(&self) -> AttrMask {
        let mut mask = AttrMask::EMPTY;
        macro_rules! add_bit {
            ($field:ident, $bit:ident) => {
                if self.$field.is_some() {
                    mask.insert(AttrMask::$bit);
                }
            };
        }
        attr_fields!(add_bit);
        mask
    }

    pub fn is_set(&self, mask: AttrMask) -> bool {
        self.mask().contains(mask)
    }

    pub fn is_empty(&self) -> bool {
        self.mask().is_empty()
    }

    /// Combines `other` into `self`.
    ///
    /// With `overwrite`, attributes present in `other` replace the local
    /// values; otherwise `other` only fills attributes that are still unset.
    pub fn merge(&mut self, other: &AttrSet, overwrite: bool) {
        macro_rules! merge_field {
            ($field:ident, $bit:ident) => {
                if other.$field.is_some() && (overwrite || self.$field.is_none()) {
                    self.$field = other.$field.clone();
                }
            };
        }
        attr_fields!(merge_field);
    }

    /// Drops every attribute named by `mask`.
    pub fn clear(&mut self, mask: AttrMask) {
        macro_rules! clear_field {
            ($field:ident, $bit:ident) => {
                if mask.intersects(AttrMask::$bit) {
                    self.$field = None;
                }
            };
        }
        attr_fields!(clear_field);
    }

    /// Drops every attribute *not* named by `mask`.
    pub fn retain(&mut self, mask: AttrMask) {
        self.clear(!mask);
    }

    /// Copy of this set restricted to `mask`.
    pub fn project(&self, mask: AttrMask) -> AttrSet {
        let mut out = self.clone();
        out.retain(mask);
        out
    }

    /// Fills attributes that can be derived from others.
    ///
    /// `name` and `depth` are computed from `fullpath` when requested and not
    /// already present. Depth counts path components below the root, so
    /// `/a/b/file` has depth 2.
    pub fn generate_fields(&mut self, want: AttrMask) {
        if let Some(path) = self.fullpath.clone() {
            if want.intersects(AttrMask::NAME) && self.name.is_none() {
                self.name = basename(&path).map(str::to_owned);
            }
            if want.intersects(AttrMask::DEPTH) && self.depth.is_none() {
                let components = path.split('/').filter(|c| !c.is_empty()).count();
                self.depth = Some(components.saturating_sub(1) as u32);
            }
        }
    }

    /// Basename of the recorded full path, if any.
    pub fn basename(&self) -> Option<&str> {
        self.fullpath.as_deref().and_then(basename)
    }

    /// `key=value` rendering of the attributes named by `mask`, for alert and
    /// dump output.
    pub fn display_values(&self, mask: AttrMask) -> String {
        let mut parts = Vec::new();
        macro_rules! render {
            ($field:ident, $bit:ident) => {
                if mask.intersects(AttrMask::$bit) {
                    if let Some(v) = &self.$field {
                        parts.push(format!("{}={:?}", stringify!($field), v));
                    }
                }
            };
        }
        attr_fields!(render);
        parts.join(", ")
    }
}

fn basename(path: &str) -> Option<&str> {
    path.rsplit('/').find(|c| !c.is_empty())
}
