// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Id-Ordering Index
//!
//! Hashed map from entry identity to a FIFO of the operations currently in
//! the pipeline for that identity. Stages flagged with the id constraint only
//! run the *head* of each FIFO, which serialises processing per entry while
//! unrelated entries overtake each other freely.
//!
//! A parallel index keyed on `(parent id, name)` applies the same discipline
//! to name-level events whose target id is not known yet (renames and
//! creations seen before the id is resolved).
//!
//! ## Locking
//!
//! Buckets use per-bucket mutexes, taken after the stage mutex and the op
//! identity lock. No code path holds two bucket locks at once. Callers pass
//! the already-locked identity record; registration state lives there so a
//! second registration of the same op is a no-op.

use super::op::{NameKey, OpHandle, OpIdent};
use catalog_pipeline_domain::EntryId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Fixed prime bucket count, shared by both indexes.
const BUCKET_COUNT: usize = 7919;

struct IdFifo {
    id: EntryId,
    ops: VecDeque<Arc<OpHandle>>,
}

struct NameFifo {
    key: NameKey,
    ops: VecDeque<Arc<OpHandle>>,
}

#[derive(Default)]
struct IdBucket {
    fifos: Vec<IdFifo>,
}

#[derive(Default)]
struct NameBucket {
    fifos: Vec<NameFifo>,
}

/// Counters reported by stage dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdIndexStats {
    /// Distinct identities currently tracked.
    pub ids: usize,
    /// Operations currently registered under an identity.
    pub ops: usize,
}

/// Per-id and per-name ordering FIFOs.
pub(crate) struct IdConstraintIndex {
    id_buckets: Vec<Mutex<IdBucket>>,
    name_buckets: Vec<Mutex<NameBucket>>,
}

fn name_hash(key: &NameKey) -> u64 {
    let mut val = key.0.stable_hash();
    for b in key.1.as_bytes() {
        val = (val << 5).wrapping_sub(val).wrapping_add(u64::from(*b));
    }
    val
}

impl IdConstraintIndex {
    pub fn new() -> Self {
        Self {
            id_buckets: (0..BUCKET_COUNT).map(|_| Mutex::new(IdBucket::default())).collect(),
            name_buckets: (0..BUCKET_COUNT).map(|_| Mutex::new(NameBucket::default())).collect(),
        }
    }

    fn id_bucket(&self, id: &EntryId) -> &Mutex<IdBucket> {
        &self.id_buckets[(id.stable_hash() % BUCKET_COUNT as u64) as usize]
    }

    fn name_bucket(&self, key: &NameKey) -> &Mutex<NameBucket> {
        &self.name_buckets[(name_hash(key) % BUCKET_COUNT as u64) as usize]
    }

    /// Registers `op` in the FIFOs of its identity and name key.
    ///
    /// Idempotent: an already-registered op is left where it is. With
    /// `at_head` the op is prepended instead of appended, used when a
    /// blocked operation is put back in front of its successors.
    pub fn register(&self, op: &Arc<OpHandle>, ident: &mut OpIdent, at_head: bool) {
        if let Some(id) = ident.id {
            if !ident.id_registered {
                let mut bucket = self.id_bucket(&id).lock();
                let pos = match bucket.fifos.iter().position(|f| f.id == id) {
                    Some(pos) => pos,
                    None => {
                        bucket.fifos.push(IdFifo {
                            id,
                            ops: VecDeque::new(),
                        });
                        bucket.fifos.len() - 1
                    }
                };
                let fifo = &mut bucket.fifos[pos];
                if at_head {
                    fifo.ops.push_front(Arc::clone(op));
                } else {
                    fifo.ops.push_back(Arc::clone(op));
                }
                ident.id_registered = true;
            }
        }
        if let Some(key) = ident.name_key.clone() {
            if !ident.name_registered {
                let mut bucket = self.name_bucket(&key).lock();
                let pos = match bucket.fifos.iter().position(|f| f.key == key) {
                    Some(pos) => pos,
                    None => {
                        bucket.fifos.push(NameFifo {
                            key,
                            ops: VecDeque::new(),
                        });
                        bucket.fifos.len() - 1
                    }
                };
                let fifo = &mut bucket.fifos[pos];
                if at_head {
                    fifo.ops.push_front(Arc::clone(op));
                } else {
                    fifo.ops.push_back(Arc::clone(op));
                }
                ident.name_registered = true;
            }
        }
    }

    /// Detaches `op` from its FIFOs. Required at retirement of any
    /// registered op; empty FIFOs are dropped.
    pub fn unregister(&self, op: &OpHandle, ident: &mut OpIdent) {
        if ident.id_registered {
            if let Some(id) = ident.id {
                let mut bucket = self.id_bucket(&id).lock();
                if let Some(pos) = bucket.fifos.iter().position(|f| f.id == id) {
                    bucket.fifos[pos].ops.retain(|o| o.serial() != op.serial());
                    if bucket.fifos[pos].ops.is_empty() {
                        bucket.fifos.swap_remove(pos);
                    }
                }
            }
            ident.id_registered = false;
        }
        if ident.name_registered {
            if let Some(key) = ident.name_key.clone() {
                let mut bucket = self.name_bucket(&key).lock();
                if let Some(pos) = bucket.fifos.iter().position(|f| f.key == key) {
                    bucket.fifos[pos].ops.retain(|o| o.serial() != op.serial());
                    if bucket.fifos[pos].ops.is_empty() {
                        bucket.fifos.swap_remove(pos);
                    }
                }
            }
            ident.name_registered = false;
        }
    }

    /// Whether `op` heads every FIFO it is registered in. Unregistered ops
    /// are unconstrained.
    pub fn is_first(&self, op: &OpHandle, ident: &OpIdent) -> bool {
        if ident.id_registered {
            if let Some(id) = ident.id {
                let bucket = self.id_bucket(&id).lock();
                let first = bucket
                    .fifos
                    .iter()
                    .find(|f| f.id == id)
                    .and_then(|f| f.ops.front())
                    .map(|o| o.serial());
                if first != Some(op.serial()) {
                    return false;
                }
            }
        }
        if ident.name_registered {
            if let Some(key) = &ident.name_key {
                let bucket = self.name_bucket(key).lock();
                let first = bucket
                    .fifos
                    .iter()
                    .find(|f| &f.key == key)
                    .and_then(|f| f.ops.front())
                    .map(|o| o.serial());
                if first != Some(op.serial()) {
                    return false;
                }
            }
        }
        true
    }

    /// Head of the FIFO for `id`, if any op is registered under it.
    pub fn first_of(&self, id: &EntryId) -> Option<Arc<OpHandle>> {
        let bucket = self.id_bucket(id).lock();
        bucket.fifos.iter().find(|f| f.id == *id).and_then(|f| f.ops.front()).cloned()
    }

    /// Aggregate counters over the id index.
    pub fn stats(&self) -> IdIndexStats {
        let mut stats = IdIndexStats::default();
        for bucket in &self.id_buckets {
            let bucket = bucket.lock();
            stats.ids += bucket.fifos.len();
            stats.ops += bucket.fifos.iter().map(|f| f.ops.len()).sum::<usize>();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runtime::op::Op;

    fn handle(serial: u64, id: EntryId) -> Arc<OpHandle> {
        let mut op = Op::new();
        op.id = Some(id);
        OpHandle::new(serial, 0, op)
    }

    fn register(index: &IdConstraintIndex, op: &Arc<OpHandle>) {
        let mut ident = op.ident.lock();
        index.register(op, &mut ident, false);
    }

    #[test]
    fn test_fifo_order_per_id() {
        let index = IdConstraintIndex::new();
        let id = EntryId::from_fid(1, 1);
        let a = handle(1, id);
        let b = handle(2, id);
        register(&index, &a);
        register(&index, &b);

        assert_eq!(index.first_of(&id).unwrap().serial(), 1);
        assert!(index.is_first(&a, &a.ident.lock()));
        assert!(!index.is_first(&b, &b.ident.lock()));

        {
            let mut ident = a.ident.lock();
            index.unregister(&a, &mut ident);
        }
        assert_eq!(index.first_of(&id).unwrap().serial(), 2);
        assert!(index.is_first(&b, &b.ident.lock()));
    }

    #[test]
    fn test_register_is_idempotent() {
        let index = IdConstraintIndex::new();
        let id = EntryId::from_fid(9, 9);
        let op = handle(1, id);
        register(&index, &op);
        register(&index, &op);
        assert_eq!(index.stats().ops, 1);
    }

    #[test]
    fn test_register_at_head_prepends() {
        let index = IdConstraintIndex::new();
        let id = EntryId::from_fid(2, 2);
        let a = handle(1, id);
        let b = handle(2, id);
        register(&index, &a);
        {
            let mut ident = b.ident.lock();
            index.register(&b, &mut ident, true);
        }
        assert_eq!(index.first_of(&id).unwrap().serial(), 2);
    }

    #[test]
    fn test_unregister_drops_empty_fifo() {
        let index = IdConstraintIndex::new();
        let id = EntryId::from_fid(3, 3);
        let op = handle(1, id);
        register(&index, &op);
        {
            let mut ident = op.ident.lock();
            index.unregister(&op, &mut ident);
        }
        assert!(index.first_of(&id).is_none());
        assert_eq!(index.stats(), IdIndexStats::default());
    }

    #[test]
    fn test_ops_without_identity_are_unconstrained() {
        let index = IdConstraintIndex::new();
        let op = OpHandle::new(1, 0, Op::new());
        let mut ident = op.ident.lock();
        index.register(&op, &mut ident, false);
        assert!(!ident.id_registered);
        assert!(index.is_first(&op, &ident));
    }

    #[test]
    fn test_distinct_ids_do_not_block_each_other() {
        let index = IdConstraintIndex::new();
        let a = handle(1, EntryId::from_fid(1, 1));
        let b = handle(2, EntryId::from_fid(1, 2));
        register(&index, &a);
        register(&index, &b);
        assert!(index.is_first(&a, &a.ident.lock()));
        assert!(index.is_first(&b, &b.ident.lock()));
    }
}
