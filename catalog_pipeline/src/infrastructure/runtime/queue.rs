// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Queues
//!
//! One ordered list of operations per stage, with the stage's live counters
//! and cumulative timing. The list is an index list: links (`prev`/`next` by
//! op serial) are owned by the stage and mutated only under the stage mutex,
//! while the op handles themselves stay address-stable behind `Arc`. This
//! gives O(1) append, O(1) unlink of an arbitrary op, and ordered traversal
//! from the head, which is everything the admission and movement rules need.
//!
//! Counter invariant: `waiting + running + done` equals the number of linked
//! operations. `waiting` ops still need this stage, `running` ops are inside
//! a handler, `done` ops have finished this stage and wait to be moved
//! forward as part of a contiguous prefix.

use super::op::OpHandle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Link {
    op: Arc<OpHandle>,
    prev: Option<u64>,
    next: Option<u64>,
}

/// Ordered set of the operations currently at one stage.
pub(crate) struct StageList {
    links: HashMap<u64, Link>,
    head: Option<u64>,
    tail: Option<u64>,
    /// Ops that still need this stage.
    pub waiting: usize,
    /// Ops currently inside this stage's handler.
    pub running: usize,
    /// Ops finished here, waiting to move forward.
    pub done: usize,
    /// Operations ever processed at this stage.
    pub processed: u64,
    /// Total handler wall time at this stage.
    pub total_time: Duration,
}

impl StageList {
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
            head: None,
            tail: None,
            waiting: 0,
            running: 0,
            done: 0,
            processed: 0,
            total_time: Duration::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Appends an operation at the tail. The caller adjusts `waiting`/`done`
    /// according to whether the op still needs this stage.
    pub fn push_back(&mut self, op: Arc<OpHandle>) {
        let serial = op.serial();
        debug_assert!(!self.links.contains_key(&serial), "op {serial} already linked");
        let link = Link {
            op,
            prev: self.tail,
            next: None,
        };
        if let Some(tail) = self.tail {
            if let Some(prev_link) = self.links.get_mut(&tail) {
                prev_link.next = Some(serial);
            }
        } else {
            self.head = Some(serial);
        }
        self.tail = Some(serial);
        self.links.insert(serial, link);
    }

    /// Unlinks an arbitrary operation. Counter adjustments are up to the
    /// caller.
    pub fn remove(&mut self, serial: u64) -> Option<Arc<OpHandle>> {
        let link = self.links.remove(&serial)?;
        match link.prev {
            Some(prev) => {
                if let Some(prev_link) = self.links.get_mut(&prev) {
                    prev_link.next = link.next;
                }
            }
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => {
                if let Some(next_link) = self.links.get_mut(&next) {
                    next_link.prev = link.prev;
                }
            }
            None => self.tail = link.prev,
        }
        Some(link.op)
    }

    /// Detaches the maximal prefix of ops satisfying `take`, preserving
    /// order.
    pub fn detach_prefix(&mut self, mut take: impl FnMut(&Arc<OpHandle>) -> bool) -> Vec<Arc<OpHandle>> {
        let mut batch = Vec::new();
        while let Some(serial) = self.head {
            let op = match self.links.get(&serial) {
                Some(link) => Arc::clone(&link.op),
                None => break,
            };
            if !take(&op) {
                break;
            }
            // remove() advances self.head to the next link
            if let Some(op) = self.remove(serial) {
                batch.push(op);
            }
        }
        batch
    }

    pub fn head_op(&self) -> Option<&Arc<OpHandle>> {
        self.head.and_then(|serial| self.links.get(&serial)).map(|l| &l.op)
    }

    pub fn tail_op(&self) -> Option<&Arc<OpHandle>> {
        self.tail.and_then(|serial| self.links.get(&serial)).map(|l| &l.op)
    }

    /// Serial of the op following `serial` in list order.
    pub fn next_of(&self, serial: u64) -> Option<u64> {
        self.links.get(&serial).and_then(|l| l.next)
    }

    pub fn get(&self, serial: u64) -> Option<&Arc<OpHandle>> {
        self.links.get(&serial).map(|l| &l.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runtime::op::Op;

    fn handle(serial: u64) -> Arc<OpHandle> {
        OpHandle::new(serial, 0, Op::new())
    }

    fn serials(list: &StageList) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cursor = list.head_op().map(|op| op.serial());
        while let Some(serial) = cursor {
            out.push(serial);
            cursor = list.next_of(serial);
        }
        out
    }

    #[test]
    fn test_push_preserves_order() {
        let mut list = StageList::new();
        for serial in 1..=4 {
            list.push_back(handle(serial));
        }
        assert_eq!(serials(&list), vec![1, 2, 3, 4]);
        assert_eq!(list.head_op().unwrap().serial(), 1);
        assert_eq!(list.tail_op().unwrap().serial(), 4);
    }

    #[test]
    fn test_remove_middle_keeps_links() {
        let mut list = StageList::new();
        for serial in 1..=3 {
            list.push_back(handle(serial));
        }
        let removed = list.remove(2).unwrap();
        assert_eq!(removed.serial(), 2);
        assert_eq!(serials(&list), vec![1, 3]);
        assert_eq!(list.next_of(1), Some(3));
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut list = StageList::new();
        for serial in 1..=3 {
            list.push_back(handle(serial));
        }
        list.remove(1);
        list.remove(3);
        assert_eq!(serials(&list), vec![2]);
        assert_eq!(list.head_op().unwrap().serial(), 2);
        assert_eq!(list.tail_op().unwrap().serial(), 2);

        list.remove(2);
        assert!(list.is_empty());
        assert!(list.head_op().is_none());
        assert!(list.tail_op().is_none());
    }

    #[test]
    fn test_detach_prefix_is_maximal_and_ordered() {
        let mut list = StageList::new();
        for serial in 1..=5 {
            list.push_back(handle(serial));
        }
        // take serials below 3: stops at the first refusal, not skipping over it
        let batch = list.detach_prefix(|op| op.serial() < 3);
        assert_eq!(batch.iter().map(|o| o.serial()).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(serials(&list), vec![3, 4, 5]);
    }

    #[test]
    fn test_detach_prefix_empty_when_head_refuses() {
        let mut list = StageList::new();
        for serial in 1..=3 {
            list.push_back(handle(serial));
        }
        let batch = list.detach_prefix(|op| op.serial() > 1);
        assert!(batch.is_empty());
        assert_eq!(list.len(), 3);
    }

    proptest::proptest! {
        #[test]
        fn prop_removals_never_break_order(count in 1usize..40, removals in proptest::collection::vec(0usize..40, 0..20)) {
            let mut list = StageList::new();
            for serial in 1..=count as u64 {
                list.push_back(handle(serial));
            }
            for r in removals {
                list.remove((r + 1) as u64);
            }
            let order = serials(&list);
            let mut sorted = order.clone();
            sorted.sort_unstable();
            proptest::prop_assert_eq!(order, sorted);
        }
    }
}
