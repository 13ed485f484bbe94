/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-database transaction admission queue (SPEC_FULL §4.4).

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::event::TaskQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    ReadOnly,
    ReadWrite,
    VersionChange,
}

impl TxnMode {
    fn is_readonly(self) -> bool {
        matches!(self, TxnMode::ReadOnly)
    }
}

struct Entry {
    id: u64,
    scope: FxHashSet<String>,
    mode: TxnMode,
    started: bool,
    notified: bool,
    on_start: Option<Box<dyn FnOnce()>>,
}

/// Enforces creation-order admission and scope-overlap serialisation across
/// read-only and read-write transactions on one database. Version-change
/// transactions are modelled with scope `{"*"}`, which overlaps everything.
pub struct Scheduler {
    queue: VecDeque<Entry>,
    next_id: u64,
    tasks: TaskQueue,
}

const VERSION_CHANGE_SCOPE: &str = "\0version-change\0";

impl Scheduler {
    pub fn new(tasks: TaskQueue) -> Scheduler {
        Scheduler {
            queue: VecDeque::new(),
            next_id: 0,
            tasks,
        }
    }

    /// The id [`Scheduler::add`] will hand out next. Transactions are
    /// constructed with this id before admission, since the transaction
    /// and the scheduler must agree on it (see the `debug_assert` in
    /// `Transaction::admit`); safe to read ahead of time because nothing
    /// else can call `add` in between on this single-threaded queue.
    pub fn peek_next_id(&self) -> u64 {
        self.next_id
    }

    fn scope_for(mode: TxnMode, scope: &[String]) -> FxHashSet<String> {
        if mode == TxnMode::VersionChange {
            FxHashSet::from_iter([VERSION_CHANGE_SCOPE.to_string()])
        } else {
            scope.iter().cloned().collect()
        }
    }

    fn overlaps(a: &FxHashSet<String>, b: &FxHashSet<String>) -> bool {
        a.contains(VERSION_CHANGE_SCOPE)
            || b.contains(VERSION_CHANGE_SCOPE)
            || a.intersection(b).next().is_some()
    }

    /// Admits a transaction into the queue in creation order. `on_start` is
    /// always invoked on a deferred task, never synchronously, to avoid
    /// re-entrance (SPEC_FULL §4.4). Returns an id used later with
    /// [`Scheduler::finished`].
    pub fn add(
        &mut self,
        scope: &[String],
        mode: TxnMode,
        on_start: impl FnOnce() + 'static,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back(Entry {
            id,
            scope: Self::scope_for(mode, scope),
            mode,
            started: false,
            notified: false,
            on_start: Some(Box::new(on_start)),
        });
        self.try_start_ready();
        id
    }

    /// A started, committed/aborted transaction leaves the queue, possibly
    /// unblocking later entries.
    pub fn finished(&mut self, id: u64) {
        self.queue.retain(|e| e.id != id);
        self.try_start_ready();
    }

    fn try_start_ready(&mut self) {
        let mut blocking: Vec<(FxHashSet<String>, TxnMode)> = Vec::new();
        let mut to_start = Vec::new();
        for (idx, entry) in self.queue.iter().enumerate() {
            if entry.started {
                blocking.push((entry.scope.clone(), entry.mode));
                continue;
            }
            let blocked = blocking.iter().any(|(scope, mode)| {
                Self::overlaps(scope, &entry.scope) && !(mode.is_readonly() && entry.mode.is_readonly())
            });
            if blocked {
                blocking.push((entry.scope.clone(), entry.mode));
                continue;
            }
            to_start.push(idx);
            blocking.push((entry.scope.clone(), entry.mode));
        }
        for idx in to_start {
            if let Some(entry) = self.queue.get_mut(idx) {
                if entry.started {
                    continue;
                }
                entry.started = true;
                log::debug!("scheduler starting transaction {}", entry.id);
            }
        }
        // Schedule each newly-started entry's callback exactly once, on a
        // deferred task, in queue order.
        for entry in self.queue.iter_mut() {
            if entry.started && !entry.notified {
                entry.notified = true;
                if let Some(cb) = entry.on_start.take() {
                    self.tasks.schedule(cb);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn independent_scopes_start_immediately_and_in_order() {
        let tasks = TaskQueue::new();
        let mut scheduler = Scheduler::new(tasks.clone());
        let started = Rc::new(RefCell::new(Vec::new()));

        let s1 = started.clone();
        scheduler.add(&["a".to_string()], TxnMode::ReadWrite, move || s1.borrow_mut().push("a"));
        let s2 = started.clone();
        scheduler.add(&["b".to_string()], TxnMode::ReadWrite, move || s2.borrow_mut().push("b"));

        tasks.drain();
        assert_eq!(*started.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn overlapping_readwrite_scopes_serialize() {
        let tasks = TaskQueue::new();
        let mut scheduler = Scheduler::new(tasks.clone());
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = order.clone();
        let id_a = scheduler.add(&["x".to_string()], TxnMode::ReadWrite, move || o1.borrow_mut().push("a-start"));
        let o2 = order.clone();
        scheduler.add(&["x".to_string()], TxnMode::ReadWrite, move || o2.borrow_mut().push("b-start"));

        tasks.drain();
        assert_eq!(*order.borrow(), vec!["a-start"]);

        order.borrow_mut().clear();
        scheduler.finished(id_a);
        tasks.drain();
        assert_eq!(*order.borrow(), vec!["b-start"]);
    }

    #[test]
    fn readonly_scopes_run_concurrently() {
        let tasks = TaskQueue::new();
        let mut scheduler = Scheduler::new(tasks.clone());
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = order.clone();
        scheduler.add(&["x".to_string()], TxnMode::ReadOnly, move || o1.borrow_mut().push("a"));
        let o2 = order.clone();
        scheduler.add(&["x".to_string()], TxnMode::ReadOnly, move || o2.borrow_mut().push("b"));

        tasks.drain();
        assert_eq!(*order.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn version_change_blocks_everything_until_finished() {
        let tasks = TaskQueue::new();
        let mut scheduler = Scheduler::new(tasks.clone());
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = order.clone();
        let vc_id = scheduler.add(&[], TxnMode::VersionChange, move || o1.borrow_mut().push("vc"));
        let o2 = order.clone();
        scheduler.add(&["anything".to_string()], TxnMode::ReadOnly, move || o2.borrow_mut().push("ro"));

        tasks.drain();
        assert_eq!(*order.borrow(), vec!["vc"]);

        order.borrow_mut().clear();
        scheduler.finished(vc_id);
        tasks.drain();
        assert_eq!(*order.borrow(), vec!["ro"]);
    }
}
