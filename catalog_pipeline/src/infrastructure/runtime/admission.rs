// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bounded Admission
//!
//! Counting semaphore that bounds the total number of in-flight operations.
//! `acquire` blocks the producer when the pipeline is saturated; retiring an
//! operation releases exactly one permit. This is the only backpressure
//! mechanism on producers.
//!
//! A capacity of zero means unbounded admission: the gate is bypassed
//! entirely and never blocks.

use parking_lot::{Condvar, Mutex};

struct Counter {
    available: usize,
}

/// Counting semaphore guarding pipeline admission.
pub struct AdmissionGate {
    capacity: usize,
    counter: Mutex<Counter>,
    released: Condvar,
}

impl AdmissionGate {
    /// Creates a gate with the given capacity; `0` disables bounding.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counter: Mutex::new(Counter { available: capacity }),
            released: Condvar::new(),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity > 0
    }

    /// Takes one permit, blocking while none is available.
    pub fn acquire(&self) {
        if !self.is_bounded() {
            return;
        }
        let mut counter = self.counter.lock();
        while counter.available == 0 {
            self.released.wait(&mut counter);
        }
        counter.available -= 1;
    }

    /// Returns one permit and wakes one blocked producer.
    pub fn release(&self) {
        if !self.is_bounded() {
            return;
        }
        let mut counter = self.counter.lock();
        counter.available += 1;
        self.released.notify_one();
    }

    /// Currently available permits; `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        if !self.is_bounded() {
            return None;
        }
        Some(self.counter.lock().available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_unbounded_never_blocks() {
        let gate = AdmissionGate::new(0);
        for _ in 0..10_000 {
            gate.acquire();
        }
        assert_eq!(gate.available(), None);
    }

    #[test]
    fn test_acquire_release_round_trip() {
        let gate = AdmissionGate::new(2);
        gate.acquire();
        gate.acquire();
        assert_eq!(gate.available(), Some(0));
        gate.release();
        assert_eq!(gate.available(), Some(1));
    }

    #[test]
    fn test_blocked_acquire_resumes_on_release() {
        let gate = Arc::new(AdmissionGate::new(1));
        gate.acquire();

        let gate2 = Arc::clone(&gate);
        let waiter = std::thread::spawn(move || {
            gate2.acquire();
        });

        // give the waiter time to block, then unblock it
        std::thread::sleep(Duration::from_millis(50));
        gate.release();
        waiter.join().unwrap();
        assert_eq!(gate.available(), Some(0));
    }
}
