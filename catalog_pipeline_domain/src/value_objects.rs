// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Value objects of the catalog pipeline domain: entry identities, sparse
//! attribute sets with their masks, and the archive status enumeration.

pub mod attr_set;
pub mod entry_id;
pub mod hsm_status;

pub use attr_set::{AttrMask, AttrSet, FsKind, StripeInfo};
pub use entry_id::EntryId;
pub use hsm_status::HsmStatus;
