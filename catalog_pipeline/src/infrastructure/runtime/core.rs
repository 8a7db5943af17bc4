// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Core
//!
//! Queues, scheduler and acknowledgement machinery of the entry processor.
//! Workers pull runnable operations with [`PipelineCore::next_runnable`],
//! run the stage handler, and the handler calls back into
//! [`PipelineCore::acknowledge`] to advance or retire the operation.
//!
//! ## Ordering discipline
//!
//! Admission inserts a new operation at the *first non-empty* stage between
//! stage 0 and its start stage; if all are empty, at the start stage itself.
//! An operation inserted upstream of its own stage rides forward with the
//! ops ahead of it and is counted `done` at the hosting stage. After every
//! acknowledgement the core detaches the maximal movable prefix of the
//! current stage (finished here, not running) and re-inserts it at the
//! lowest non-empty downstream stage, recursively. Insertions always append
//! and movement only detaches prefixes, so two operations can never swap
//! relative order; combined with the per-id FIFOs this yields the per-entry
//! ordering guarantee.
//!
//! ## Lock order
//!
//! scheduler mutex → stage mutexes in ascending index → op identity lock →
//! id-index bucket lock. No handler holds more than one stage mutex at a
//! time; the core itself holds ascending runs of them during admission and
//! movement, exactly like the insertion rule requires.

use super::admission::AdmissionGate;
use super::id_constraint::{IdConstraintIndex, IdIndexStats};
use super::op::{Op, OpHandle};
use super::queue::StageList;
use super::stage::{StageConcurrency, StageTable};
use catalog_pipeline_domain::PipelineError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, trace, warn};

/// Disposition of an operation at the end of a stage handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Move to the given later stage.
    Advance(usize),
    /// Remove from the pipeline and free its admission permit.
    Retire,
}

struct SchedState {
    waiting_workers: usize,
    terminating: bool,
    /// With `drain`, workers only exit once every queue is empty; without,
    /// they exit as soon as nothing is runnable, abandoning linked ops.
    drain: bool,
}

struct ScanOutcome {
    op: Option<Arc<OpHandle>>,
    /// False when some stage still holds waiting (possibly blocked) ops.
    empty: bool,
}

/// Point-in-time counters of one stage, for dumps and metrics.
#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub name: &'static str,
    pub waiting: usize,
    pub running: usize,
    pub done: usize,
    pub processed: u64,
    /// Mean handler wall time, milliseconds per op.
    pub mean_ms: f64,
    /// Descriptor of the queue head, when present.
    pub first: Option<String>,
    /// Descriptor of the queue tail, when present.
    pub last: Option<String>,
}

/// Queues, ordering indexes, admission gate and scheduler of one pipeline.
pub struct PipelineCore {
    table: StageTable,
    stages: Vec<Mutex<StageList>>,
    ids: IdConstraintIndex,
    admission: AdmissionGate,
    sched: Mutex<SchedState>,
    work_avail: Condvar,
    next_serial: AtomicU64,
}

impl PipelineCore {
    pub fn new(table: StageTable, max_pending: usize) -> Self {
        let stages = (0..table.len()).map(|_| Mutex::new(StageList::new())).collect();
        Self {
            table,
            stages,
            ids: IdConstraintIndex::new(),
            admission: AdmissionGate::new(max_pending),
            sched: Mutex::new(SchedState {
                waiting_workers: 0,
                terminating: false,
                drain: true,
            }),
            work_avail: Condvar::new(),
            next_serial: AtomicU64::new(1),
        }
    }

    pub fn table(&self) -> &StageTable {
        &self.table
    }

    /// Available admission permits; `None` when admission is unbounded.
    pub fn admission_available(&self) -> Option<usize> {
        self.admission.available()
    }

    /// Admits an operation at `start_stage`.
    ///
    /// Blocks on the admission gate when the pipeline is saturated. The op
    /// is inserted at the first non-empty stage at or before `start_stage`
    /// so that it cannot overtake operations admitted earlier.
    pub fn push(&self, op: Op, start_stage: usize) -> Result<(), PipelineError> {
        if start_stage >= self.table.len() {
            return Err(PipelineError::invalid_stage(format!(
                "start stage {start_stage} out of range (pipeline has {} stages)",
                self.table.len()
            )));
        }

        self.admission.acquire();

        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        let handle = OpHandle::new(serial, start_stage, op);

        {
            // stage mutexes are taken in ascending order and all kept until
            // the insertion is done
            let mut guards: Vec<MutexGuard<'_, StageList>> = Vec::new();
            let mut insert_stage = start_stage;
            for i in 0..=start_stage {
                let guard = self.stages[i].lock();
                let occupied = !guard.is_empty();
                guards.push(guard);
                if occupied {
                    insert_stage = i;
                    break;
                }
            }

            if let Some(def) = self.table.get(insert_stage) {
                if def.id_constraint {
                    let mut ident = handle.ident.lock();
                    self.ids.register(&handle, &mut ident, false);
                }
            }

            if let Some(list) = guards.last_mut() {
                if insert_stage < start_stage {
                    list.done += 1;
                } else {
                    list.waiting += 1;
                }
                list.push_back(handle);
            }
        }

        let sched = self.sched.lock();
        if sched.waiting_workers > 0 {
            self.work_avail.notify_one();
        }
        Ok(())
    }

    /// Blocks until an operation is runnable, returns `None` on shutdown.
    ///
    /// Called by worker threads only. The returned op is marked running and
    /// its stage counters are already updated.
    pub fn next_runnable(&self) -> Option<Arc<OpHandle>> {
        let mut sched = self.sched.lock();
        sched.waiting_workers += 1;
        loop {
            let outcome = self.scan_for_work();
            if let Some(op) = outcome.op {
                sched.waiting_workers -= 1;
                // more may be runnable after this one
                if sched.waiting_workers > 0 {
                    self.work_avail.notify_one();
                }
                return Some(op);
            }
            if sched.terminating && (outcome.empty || !sched.drain) {
                sched.waiting_workers -= 1;
                if sched.waiting_workers > 0 {
                    self.work_avail.notify_one();
                }
                return None;
            }
            self.work_avail.wait(&mut sched);
        }
    }

    /// One scheduling pass over all stages, highest index first.
    fn scan_for_work(&self) -> ScanOutcome {
        let mut empty = true;

        for i in (0..self.table.len()).rev() {
            let def = match self.table.get(i) {
                Some(def) => def,
                None => continue,
            };
            let mut list = self.stages[i].lock();

            if list.waiting == 0 {
                continue;
            }
            match def.concurrency {
                StageConcurrency::Sequential if list.running > 0 => {
                    empty = false;
                    continue;
                }
                StageConcurrency::Bounded(n) if list.running >= n => {
                    empty = false;
                    continue;
                }
                _ => {}
            }

            // walk from the head; the first eligible op wins
            let mut cursor = list.head_op().map(|op| op.serial());
            while let Some(serial) = cursor {
                cursor = list.next_of(serial);
                let op = match list.get(serial) {
                    Some(op) => Arc::clone(op),
                    None => break,
                };

                if op.stage() > i || op.is_running() {
                    continue;
                }

                let mut ident = op.ident.lock();
                if def.id_constraint {
                    if ident.id.is_some() && !ident.id_registered {
                        warn!("operation {} reached an ordered stage unregistered", op.serial());
                        self.ids.register(&op, &mut ident, false);
                    }
                    if !self.ids.is_first(&op, &ident) {
                        // another op for the same entry is ahead
                        if let Some(id) = ident.id {
                            trace!(
                                serial = op.serial(),
                                head = self.ids.first_of(&id).map(|head| head.serial()),
                                "blocked behind an earlier op for the same entry"
                            );
                        }
                        continue;
                    }
                }

                op.set_running(true);
                ident.started_at = Some(Instant::now());
                drop(ident);
                list.waiting -= 1;
                list.running += 1;
                return ScanOutcome { op: Some(op), empty: false };
            }

            if list.waiting > 0 {
                // candidates exist but are blocked by ordering constraints
                empty = false;
            }
        }

        ScanOutcome { op: None, empty }
    }

    /// Gathers additional runnable operations behind `first` at its stage
    /// for one batched handler invocation, up to `max` in total.
    ///
    /// `first` must already be claimed by the calling worker. Candidates are
    /// taken in list order; collection stops at the first eligible op the
    /// stage's batching test rejects, so a batch is always a run of
    /// compatible operations. Claimed ops count against the stage's
    /// `running` quota like individually scheduled ones.
    pub fn claim_batch(&self, first: &Arc<OpHandle>, max: usize) -> Vec<Arc<OpHandle>> {
        let stage_idx = first.stage();
        let mut batch = vec![Arc::clone(first)];
        let test = match self.table.get(stage_idx).and_then(|def| def.test_batchable.clone()) {
            Some(test) => test,
            None => return batch,
        };
        let id_constraint = self.table.get(stage_idx).map(|def| def.id_constraint).unwrap_or(false);

        // the first op is running and owned by this worker, so its payload
        // lock is free here
        let first_data = first.data();
        let mut list = self.stages[stage_idx].lock();
        let mut cursor = list.head_op().map(|op| op.serial());
        while let Some(serial) = cursor {
            if batch.len() >= max {
                break;
            }
            cursor = list.next_of(serial);
            let op = match list.get(serial) {
                Some(op) => Arc::clone(op),
                None => break,
            };
            if op.serial() == first.serial() || op.stage() != stage_idx || op.is_running() {
                continue;
            }

            let mut ident = op.ident.lock();
            if id_constraint && !self.ids.is_first(&op, &ident) {
                continue;
            }
            if !test(&first_data, &op.data()) {
                break;
            }

            op.set_running(true);
            ident.started_at = Some(Instant::now());
            drop(ident);
            list.waiting -= 1;
            list.running += 1;
            batch.push(op);
        }
        batch
    }

    /// Records the end of a stage handler for `op` and applies its
    /// disposition.
    ///
    /// Advancing to a stage the op has already passed is a hard error: it is
    /// logged critical, nothing is moved, and the op stays marked running.
    pub fn acknowledge(&self, op: &Arc<OpHandle>, ack: Ack) -> Result<(), PipelineError> {
        let cur = op.stage();
        let def = self
            .table
            .get(cur)
            .ok_or_else(|| PipelineError::internal(format!("op {} at unknown stage {cur}", op.serial())))?;

        if let Ack::Advance(next) = ack {
            if next <= cur || next >= self.table.len() {
                error!(
                    "cannot acknowledge op {} from stage {cur} to stage {next}: not a later stage",
                    op.serial()
                );
                return Err(PipelineError::invalid_stage(format!(
                    "acknowledge to stage {next} from stage {cur}"
                )));
            }
        }

        let moved;
        let retired = matches!(ack, Ack::Retire);
        {
            let mut list = self.stages[cur].lock();

            let elapsed = {
                let mut ident = op.ident.lock();
                ident.started_at.take().map(|t| t.elapsed()).unwrap_or_default()
            };
            list.processed += 1;
            list.total_time += elapsed;
            list.running = list.running.saturating_sub(1);
            op.set_running(false);

            match ack {
                Ack::Advance(next) => {
                    op.set_stage(next);
                    list.done += 1;
                }
                Ack::Retire => {
                    list.remove(op.serial());
                    let mut ident = op.ident.lock();
                    self.ids.unregister(op, &mut ident);
                }
            }

            moved = self.drain_forward(cur, &mut list);
        }

        if retired {
            self.admission.release();
        }

        // wake-ups: a retirement may unblock a per-id successor, movement
        // makes ops available downstream, and sequential or bounded stages
        // just released a slot
        let freed_slot = matches!(def.concurrency, StageConcurrency::Sequential | StageConcurrency::Bounded(_));
        if retired || moved > 0 || freed_slot {
            let sched = self.sched.lock();
            if sched.waiting_workers > 0 {
                self.work_avail.notify_one();
            }
        }

        trace!(serial = op.serial(), stage = def.name, ?ack, moved, "acknowledged");
        Ok(())
    }

    /// Moves the maximal finished prefix of stage `src_idx` to the lowest
    /// non-empty downstream stage, recursively flushing the stages it locks
    /// on the way. Returns the number of ops moved out of `src`.
    fn drain_forward(&self, src_idx: usize, src: &mut StageList) -> usize {
        let last = self.table.len() - 1;
        if src_idx >= last {
            return 0;
        }

        let mut min_stage = usize::MAX;
        let batch = src.detach_prefix(|op| {
            if op.is_running() {
                return false;
            }
            let stage = op.stage();
            if stage <= src_idx {
                return false;
            }
            min_stage = min_stage.min(stage);
            true
        });
        if batch.is_empty() {
            return 0;
        }
        src.done = src.done.saturating_sub(batch.len());
        let min_stage = min_stage.min(last);

        // lock downstream stages in ascending order up to the first that
        // stays non-empty after being flushed itself
        let mut guards: Vec<MutexGuard<'_, StageList>> = Vec::new();
        let mut insert_stage = min_stage;
        for j in (src_idx + 1)..=min_stage {
            let mut guard = self.stages[j].lock();
            if !guard.is_empty() {
                self.drain_forward(j, &mut guard);
            }
            let occupied = !guard.is_empty();
            guards.push(guard);
            if occupied {
                insert_stage = j;
                break;
            }
        }

        let id_constraint = self.table.get(insert_stage).map(|d| d.id_constraint).unwrap_or(false);
        let count = batch.len();
        match guards.last_mut() {
            Some(target) => {
                for op in batch {
                    if id_constraint {
                        let mut ident = op.ident.lock();
                        self.ids.register(&op, &mut ident, false);
                    }
                    if insert_stage < op.stage() {
                        target.done += 1;
                    } else {
                        target.waiting += 1;
                    }
                    target.push_back(op);
                }
            }
            None => {
                // unreachable: the range src_idx+1..=min_stage is never empty
                error!("no target stage while moving {count} ops from stage {src_idx}");
                return 0;
            }
        }
        count
    }

    /// Flags the pipeline for shutdown and wakes every worker.
    ///
    /// With `drain`, workers keep pulling until all queues are empty; with
    /// `drain` false they exit as soon as nothing is runnable, abandoning
    /// whatever is still linked.
    pub fn begin_terminate(&self, drain: bool) {
        let mut sched = self.sched.lock();
        sched.terminating = true;
        sched.drain = drain;
        self.work_avail.notify_all();
    }

    pub fn is_terminating(&self) -> bool {
        self.sched.lock().terminating
    }

    /// Total operations currently linked in the pipeline.
    pub fn count_ops(&self) -> usize {
        self.stages.iter().map(|stage| stage.lock().len()).sum()
    }

    /// Counters of the id-ordering index.
    pub fn id_index_stats(&self) -> IdIndexStats {
        self.ids.stats()
    }

    /// Point-in-time counters for every stage.
    pub fn snapshot(&self) -> Vec<StageSnapshot> {
        self.table
            .iter()
            .enumerate()
            .map(|(i, def)| {
                let list = self.stages[i].lock();
                let mean_ms = if list.processed > 0 {
                    list.total_time.as_secs_f64() * 1000.0 / list.processed as f64
                } else {
                    0.0
                };
                StageSnapshot {
                    name: def.name,
                    waiting: list.waiting,
                    running: list.running,
                    done: list.done,
                    processed: list.processed,
                    mean_ms,
                    first: list.head_op().map(|op| op.describe()),
                    last: list.tail_op().map(|op| op.describe()),
                }
            })
            .collect()
    }

    /// Logs the per-stage counters and queue head/tail descriptors.
    pub fn dump(&self) {
        info!("==== entry processor pipeline stats ====");
        let ids = self.id_index_stats();
        info!("id ordering: {} ids, {} ops", ids.ids, ids.ops);
        if let Some(available) = self.admission_available() {
            info!("admission permits available: {available}");
        }
        for (i, snap) in self.snapshot().iter().enumerate() {
            info!(
                "{i:2}: {:<16} | Wait: {:5} | Curr: {:3} | Done: {:3} | Total: {:6} | ms/op: {:.2}",
                snap.name, snap.waiting, snap.running, snap.done, snap.processed, snap.mean_ms
            );
            if let Some(first) = &snap.first {
                info!("    {:<16} | first: {first}", snap.name);
            }
            if let Some(last) = &snap.last {
                info!("    {:<16} | last: {last}", snap.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runtime::stage::{StageDef, StageHandler};
    use catalog_pipeline_domain::EntryId;

    fn noop() -> StageHandler {
        Arc::new(|_core, _ctx, _op, _store| Ok(()))
    }

    fn table(n: usize) -> StageTable {
        let defs = (0..n)
            .map(|i| {
                let names = ["s0", "s1", "s2", "s3", "s4", "s5"];
                StageDef::new(names[i], StageConcurrency::Unbounded, noop())
            })
            .collect();
        StageTable::new(defs).unwrap()
    }

    fn core(n: usize) -> PipelineCore {
        PipelineCore::new(table(n), 0)
    }

    #[test]
    fn test_push_lands_at_start_stage_when_all_empty() {
        let core = core(3);
        core.push(Op::new(), 2).unwrap();
        let snap = core.snapshot();
        assert_eq!(snap[2].waiting, 1);
        assert_eq!(snap[0].waiting + snap[1].waiting, 0);
    }

    #[test]
    fn test_push_rides_at_first_non_empty_earlier_stage() {
        let core = core(3);
        core.push(Op::new(), 0).unwrap();
        core.push(Op::new(), 2).unwrap();
        let snap = core.snapshot();
        // the second op rides in stage 0's list, already past that stage
        assert_eq!(snap[0].waiting, 1);
        assert_eq!(snap[0].done, 1);
        assert_eq!(snap[2].waiting, 0);
    }

    #[test]
    fn test_rider_moves_forward_with_the_queue() {
        let core = core(3);
        core.push(Op::new(), 0).unwrap();
        core.push(Op::new(), 2).unwrap();

        let first = core.next_runnable().unwrap();
        assert_eq!(first.stage(), 0);
        core.acknowledge(&first, Ack::Advance(1)).unwrap();

        // both ops moved out of stage 0 as one batch; the rider keeps
        // travelling with the op ahead of it
        let snap = core.snapshot();
        assert_eq!(snap[0].waiting + snap[0].done, 0);
        assert_eq!(snap[1].waiting, 1);
        assert_eq!(snap[1].done, 1);

        // once the first op leaves stage 1, the rider reaches stage 2
        let op = core.next_runnable().unwrap();
        core.acknowledge(&op, Ack::Advance(2)).unwrap();
        let snap = core.snapshot();
        assert_eq!(snap[2].waiting, 2);
    }

    #[test]
    fn test_scheduler_prefers_latest_stage() {
        let core = core(3);
        core.push(Op::new(), 0).unwrap();
        let a = core.next_runnable().unwrap();
        core.acknowledge(&a, Ack::Advance(2)).unwrap();
        core.push(Op::new(), 0).unwrap();

        // op at stage 2 must be chosen before the fresh one at stage 0
        let chosen = core.next_runnable().unwrap();
        assert_eq!(chosen.serial(), a.serial());
        assert_eq!(chosen.stage(), 2);
    }

    #[test]
    fn test_acknowledge_backwards_is_rejected() {
        let core = core(3);
        core.push(Op::new(), 1).unwrap();
        let op = core.next_runnable().unwrap();
        core.acknowledge(&op, Ack::Advance(2)).unwrap();
        let op = core.next_runnable().unwrap();
        let err = core.acknowledge(&op, Ack::Advance(1));
        assert!(err.is_err());
    }

    #[test]
    fn test_retire_releases_everything() {
        let core = PipelineCore::new(table(2), 5);
        core.push(Op::new(), 0).unwrap();
        assert_eq!(core.admission_available(), Some(4));

        let op = core.next_runnable().unwrap();
        core.acknowledge(&op, Ack::Retire).unwrap();
        assert_eq!(core.admission_available(), Some(5));
        assert_eq!(core.count_ops(), 0);
    }

    #[test]
    fn test_sequential_stage_runs_one_at_a_time() {
        let defs = vec![StageDef::new("seq", StageConcurrency::Sequential, noop())];
        let core = PipelineCore::new(StageTable::new(defs).unwrap(), 0);
        core.push(Op::new(), 0).unwrap();
        core.push(Op::new(), 0).unwrap();

        let first = core.next_runnable().unwrap();
        // second op is not runnable while the stage is busy; with drain off,
        // a terminating scheduler hands back None instead of blocking
        core.begin_terminate(false);
        assert!(core.next_runnable().is_none());
        core.acknowledge(&first, Ack::Retire).unwrap();
        let second = core.next_runnable().unwrap();
        core.acknowledge(&second, Ack::Retire).unwrap();
        assert_eq!(core.count_ops(), 0);
    }

    #[test]
    fn test_id_constraint_serialises_same_entry() {
        let defs = vec![
            StageDef::new("lookup", StageConcurrency::Unbounded, noop()).with_id_constraint(),
            StageDef::new("apply", StageConcurrency::Unbounded, noop()),
        ];
        let core = PipelineCore::new(StageTable::new(defs).unwrap(), 0);
        let id = EntryId::from_fid(1, 1);
        for _ in 0..2 {
            let mut op = Op::new();
            op.id = Some(id);
            core.push(op, 0).unwrap();
        }

        let first = core.next_runnable().unwrap();
        // same id: the second op must not be schedulable yet
        core.begin_terminate(false);
        assert!(core.next_runnable().is_none());

        core.acknowledge(&first, Ack::Advance(1)).unwrap();
        let unblocked = core.next_runnable().unwrap();
        assert_eq!(unblocked.stage(), 1);
        assert_eq!(unblocked.serial(), first.serial());
    }

    #[test]
    fn test_same_id_order_preserved_through_insertion_rule() {
        let defs = vec![
            StageDef::new("first", StageConcurrency::Unbounded, noop()),
            StageDef::new("ordered", StageConcurrency::Unbounded, noop()).with_id_constraint(),
        ];
        let core = PipelineCore::new(StageTable::new(defs).unwrap(), 0);
        let id = EntryId::from_fid(4, 4);

        // one op enters at stage 0, a second for the same id at stage 1
        let mut a = Op::new();
        a.id = Some(id);
        core.push(a, 0).unwrap();
        let mut b = Op::new();
        b.id = Some(id);
        core.push(b, 1).unwrap();

        let a = core.next_runnable().unwrap();
        assert_eq!(a.serial(), 1);
        core.acknowledge(&a, Ack::Advance(1)).unwrap();

        // at the ordered stage, the first-pushed op must still come first
        let chosen = core.next_runnable().unwrap();
        assert_eq!(chosen.serial(), 1);
        core.acknowledge(&chosen, Ack::Retire).unwrap();
        let chosen = core.next_runnable().unwrap();
        assert_eq!(chosen.serial(), 2);
        core.acknowledge(&chosen, Ack::Retire).unwrap();
    }

    #[test]
    fn test_snapshot_reports_descriptors() {
        let core = core(2);
        let mut op = Op::new();
        op.fs_attrs.fullpath = Some("/fs/seen".into());
        core.push(op, 0).unwrap();
        let snap = core.snapshot();
        assert_eq!(snap[0].first.as_deref(), Some("/fs/seen"));
        assert_eq!(snap[0].first, snap[0].last);
    }

    #[test]
    fn test_push_beyond_table_is_rejected() {
        let core = core(2);
        assert!(core.push(Op::new(), 2).is_err());
    }
}
