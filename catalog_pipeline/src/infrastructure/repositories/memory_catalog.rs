// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Memory Catalog Store
//!
//! Hash-map backed implementation of the [`CatalogStore`] port. Used by the
//! demo binary, by dry-run style inspection, and by the test suite. All
//! handles produced by one [`MemoryCatalogFactory`] share the same
//! underlying tables, mirroring several connections to one database.
//!
//! The store keeps an optional journal of mutating calls in arrival order,
//! which is how the tests assert the exact catalog call sequence an event
//! stream produced.

use catalog_pipeline_domain::{
    AttrMask, AttrSet, CatalogStore, CatalogStoreFactory, CommitStatus, EntryId, GcFilter, PipelineError, StoreError,
    StoreResult,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One recorded mutation, for inspection by tests and tooling.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Insert(EntryId),
    Update(EntryId),
    Remove(EntryId),
    SoftRemove(EntryId),
    MassRemove(u64),
    MassSoftRemove(u64),
}

#[derive(Debug, Clone)]
struct SoftRemoved {
    attrs: AttrSet,
    purge_at: i64,
}

#[derive(Default)]
struct Tables {
    main: HashMap<EntryId, AttrSet>,
    soft_removed: HashMap<EntryId, SoftRemoved>,
    vars: HashMap<String, String>,
    journal: Option<Vec<StoreCall>>,
}

/// Shared state behind every handle of one factory.
#[derive(Default)]
pub struct MemoryCatalogShared {
    tables: Mutex<Tables>,
}

impl MemoryCatalogShared {
    /// Ids currently present in the main table.
    pub fn ids(&self) -> Vec<EntryId> {
        self.tables.lock().main.keys().copied().collect()
    }

    /// Stored attributes of one entry.
    pub fn entry(&self, id: &EntryId) -> Option<AttrSet> {
        self.tables.lock().main.get(id).cloned()
    }

    /// Ids currently parked in the deferred-removal table.
    pub fn soft_removed_ids(&self) -> Vec<EntryId> {
        self.tables.lock().soft_removed.keys().copied().collect()
    }

    /// Purge deadline of a soft-removed entry.
    pub fn purge_at(&self, id: &EntryId) -> Option<i64> {
        self.tables.lock().soft_removed.get(id).map(|e| e.purge_at)
    }

    /// Number of entries in the main table.
    pub fn len(&self) -> usize {
        self.tables.lock().main.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().main.is_empty()
    }

    /// Journal of mutations, in arrival order. Empty unless journalling was
    /// enabled on the factory.
    pub fn journal(&self) -> Vec<StoreCall> {
        self.tables.lock().journal.clone().unwrap_or_default()
    }

    /// Value of a persistent variable.
    pub fn var(&self, name: &str) -> Option<String> {
        self.tables.lock().vars.get(name).cloned()
    }

    /// Pre-populates an entry, for tests and imports.
    pub fn seed(&self, id: EntryId, attrs: AttrSet) {
        self.tables.lock().main.insert(id, attrs);
    }
}

/// Factory producing handles over one shared in-memory catalog.
pub struct MemoryCatalogFactory {
    shared: Arc<MemoryCatalogShared>,
    single_writer: bool,
}

impl MemoryCatalogFactory {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MemoryCatalogShared::default()),
            single_writer: false,
        }
    }

    /// Enables the mutation journal.
    pub fn with_journal(self) -> Self {
        self.shared.tables.lock().journal = Some(Vec::new());
        self
    }

    /// Advertises the backend as single-writer, capping the apply stage.
    pub fn with_single_writer(mut self) -> Self {
        self.single_writer = true;
        self
    }

    /// The shared state, for inspection.
    pub fn shared(&self) -> Arc<MemoryCatalogShared> {
        Arc::clone(&self.shared)
    }
}

impl Default for MemoryCatalogFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogStoreFactory for MemoryCatalogFactory {
    fn open(&self) -> Result<Box<dyn CatalogStore>, PipelineError> {
        Ok(Box::new(MemoryCatalog {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn single_writer(&self) -> bool {
        self.single_writer
    }
}

/// One handle over the shared in-memory catalog.
pub struct MemoryCatalog {
    shared: Arc<MemoryCatalogShared>,
}

impl MemoryCatalog {
    fn record(tables: &mut Tables, call: StoreCall) {
        if let Some(journal) = tables.journal.as_mut() {
            journal.push(call);
        }
    }
}

impl CatalogStore for MemoryCatalog {
    fn get(&mut self, id: &EntryId, need: AttrMask) -> StoreResult<AttrSet> {
        let tables = self.shared.tables.lock();
        match tables.main.get(id) {
            Some(attrs) => Ok(attrs.project(need)),
            None => Err(StoreError::NotExists),
        }
    }

    fn exists(&mut self, id: &EntryId) -> StoreResult<bool> {
        Ok(self.shared.tables.lock().main.contains_key(id))
    }

    fn check_stripe(&mut self, id: &EntryId) -> StoreResult<()> {
        let tables = self.shared.tables.lock();
        match tables.main.get(id) {
            Some(attrs) if attrs.stripe_info.is_some() => Ok(()),
            Some(_) => Err(StoreError::OutOfDate),
            None => Err(StoreError::NotExists),
        }
    }

    fn insert(&mut self, id: &EntryId, attrs: &AttrSet) -> StoreResult<()> {
        let mut tables = self.shared.tables.lock();
        tables.main.insert(*id, attrs.clone());
        Self::record(&mut tables, StoreCall::Insert(*id));
        Ok(())
    }

    fn update(&mut self, id: &EntryId, attrs: &AttrSet) -> StoreResult<()> {
        let mut tables = self.shared.tables.lock();
        match tables.main.get_mut(id) {
            Some(stored) => {
                stored.merge(attrs, true);
                Self::record(&mut tables, StoreCall::Update(*id));
                Ok(())
            }
            None => Err(StoreError::NotExists),
        }
    }

    fn remove(&mut self, id: &EntryId) -> StoreResult<()> {
        let mut tables = self.shared.tables.lock();
        match tables.main.remove(id) {
            Some(_) => {
                Self::record(&mut tables, StoreCall::Remove(*id));
                Ok(())
            }
            None => Err(StoreError::NotExists),
        }
    }

    fn soft_remove(&mut self, id: &EntryId, fullpath: Option<&str>, purge_at: i64) -> StoreResult<()> {
        let mut tables = self.shared.tables.lock();
        let mut attrs = tables.main.remove(id).unwrap_or_default();
        if let Some(path) = fullpath {
            attrs.fullpath = Some(path.to_string());
        }
        tables.soft_removed.insert(*id, SoftRemoved { attrs, purge_at });
        Self::record(&mut tables, StoreCall::SoftRemove(*id));
        Ok(())
    }

    fn mass_remove(&mut self, filter: &GcFilter) -> StoreResult<u64> {
        let mut tables = self.shared.tables.lock();
        let victims: Vec<EntryId> = tables
            .main
            .iter()
            .filter(|(_, attrs)| filter.selects(attrs))
            .map(|(id, _)| *id)
            .collect();
        for id in &victims {
            tables.main.remove(id);
        }
        let count = victims.len() as u64;
        Self::record(&mut tables, StoreCall::MassRemove(count));
        Ok(count)
    }

    fn mass_soft_remove(&mut self, filter: &GcFilter, purge_at: i64) -> StoreResult<u64> {
        let mut tables = self.shared.tables.lock();
        let victims: Vec<EntryId> = tables
            .main
            .iter()
            .filter(|(_, attrs)| filter.selects(attrs))
            .map(|(id, _)| *id)
            .collect();
        for id in &victims {
            if let Some(attrs) = tables.main.remove(id) {
                tables.soft_removed.insert(*id, SoftRemoved { attrs, purge_at });
            }
        }
        let count = victims.len() as u64;
        Self::record(&mut tables, StoreCall::MassSoftRemove(count));
        Ok(count)
    }

    fn get_var(&mut self, name: &str) -> StoreResult<Option<String>> {
        Ok(self.shared.tables.lock().vars.get(name).cloned())
    }

    fn set_var(&mut self, name: &str, value: &str) -> StoreResult<()> {
        self.shared.tables.lock().vars.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn force_commit(&mut self, _enable: bool) {
        // memory writes are immediately durable
    }

    fn commit_status(&self) -> CommitStatus {
        CommitStatus::Committed
    }
}
