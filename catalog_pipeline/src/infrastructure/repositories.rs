// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Catalog store implementations.

pub mod memory_catalog;

pub use memory_catalog::{MemoryCatalog, MemoryCatalogFactory, MemoryCatalogShared, StoreCall};
