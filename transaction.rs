/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Transaction core state machine (SPEC_FULL §4.5): active/inactive/
//! committing/finished, lazy savepoints, operation/event queueing, and
//! abort.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::driver::{Durability, StorageDriver};
use crate::error::{Error, Result};
use crate::event::{
    AncestorTarget, EventKind, EventTarget, Listener, Request, RequestResult, RequestSource,
    TaskQueue,
};
use crate::journal::Journal;
use crate::scheduler::{Scheduler, TxnMode};
use crate::shared::{Shared, WeakShared};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Inactive,
    Committing,
    Finished,
}

type OpClosure = Box<dyn FnOnce()>;
type EventClosure = Box<dyn FnOnce()>;

struct Buffered {
    request: Shared<Request>,
    op: OpClosure,
    event: EventClosure,
}

/// One IndexedDB-style transaction. Always created and driven through a
/// [`Shared<Transaction>`] handle, since requests and the scheduler hold
/// back-references into it.
pub struct Transaction {
    id: u64,
    pub scope: Vec<String>,
    pub mode: TxnMode,
    pub durability: Durability,
    state: TxnState,
    driver: Rc<dyn StorageDriver>,
    scheduler: Shared<Scheduler>,
    tasks: TaskQueue,
    microtasks: TaskQueue,

    savepoint_name: String,
    savepoint_active: bool,

    started: bool,
    commit_on_start: bool,
    pending: Vec<Shared<Request>>,
    buffered: VecDeque<Buffered>,

    pub journal: Journal,

    /// The database's request-bubble target, set once by the database
    /// that created this transaction. `None` in tests that exercise the
    /// transaction in isolation.
    database_ancestor: Option<Shared<EventTarget>>,

    /// Requests bubble success/error events through the transaction on
    /// their way to the database; these are the transaction's own
    /// `addEventListener`-style listeners for that bubble phase.
    success_listeners: Vec<Listener>,
    error_listeners: Vec<Listener>,
    /// The transaction's own `complete`/`abort` events. These fire on the
    /// transaction itself, not through the request dispatch kernel.
    complete_listeners: Vec<Box<dyn FnMut()>>,
    abort_listeners: Vec<Box<dyn FnMut(&Error)>>,
    /// Invoked exactly once when the transaction reaches `Finished`,
    /// carrying the outcome. The database uses this single seam to run
    /// journal-revert/connection bookkeeping rather than being wired into
    /// the lower-level event kernel as a literal ancestor.
    on_finish: Option<Box<dyn FnOnce(&Transaction)>>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        scope: Vec<String>,
        mode: TxnMode,
        durability: Durability,
        driver: Rc<dyn StorageDriver>,
        scheduler: Shared<Scheduler>,
        tasks: TaskQueue,
        microtasks: TaskQueue,
    ) -> Shared<Transaction> {
        let txn = Shared::new(Transaction {
            id,
            scope,
            mode,
            durability,
            state: TxnState::Active,
            driver,
            scheduler,
            tasks,
            microtasks,
            savepoint_name: format!("txn_{}", id),
            savepoint_active: false,
            started: false,
            commit_on_start: false,
            pending: Vec::new(),
            buffered: VecDeque::new(),
            journal: Journal::new(),
            database_ancestor: None,
            success_listeners: Vec::new(),
            error_listeners: Vec::new(),
            complete_listeners: Vec::new(),
            abort_listeners: Vec::new(),
            on_finish: None,
        });

        let weak = txn.downgrade();
        txn.borrow().microtasks.schedule(Box::new(move || {
            if let Some(t) = weak.upgrade() {
                Transaction::go_inactive(&t);
            }
        }));

        txn
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn set_on_finish(&mut self, cb: impl FnOnce(&Transaction) + 'static) {
        self.on_finish = Some(Box::new(cb));
    }

    pub fn set_database_ancestor(&mut self, target: Shared<EventTarget>) {
        self.database_ancestor = Some(target);
    }

    pub fn add_success_listener(&mut self, listener: Listener) {
        self.success_listeners.push(listener);
    }

    pub fn add_error_listener(&mut self, listener: Listener) {
        self.error_listeners.push(listener);
    }

    pub fn add_complete_listener(&mut self, listener: Box<dyn FnMut()>) {
        self.complete_listeners.push(listener);
    }

    pub fn add_abort_listener(&mut self, listener: Box<dyn FnMut(&Error)>) {
        self.abort_listeners.push(listener);
    }

    pub fn driver(&self) -> &Rc<dyn StorageDriver> {
        &self.driver
    }

    pub fn check_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            _ => Err(Error::TransactionInactive),
        }
    }

    pub fn check_writable(&self) -> Result<()> {
        if self.mode.is_readonly() {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Begins this transaction's savepoint on first use. A no-op on later
    /// calls (SPEC_FULL §4.5, `ensureSavepoint`).
    pub fn ensure_savepoint(t: &Shared<Transaction>) -> Result<()> {
        let (already, name, driver) = {
            let tb = t.borrow();
            (tb.savepoint_active, tb.savepoint_name.clone(), tb.driver.clone())
        };
        if already {
            return Ok(());
        }
        driver.begin_savepoint(&name)?;
        t.borrow_mut().savepoint_active = true;
        Ok(())
    }

    /// Registers this transaction with the per-database scheduler. Must be
    /// called once, after construction, once the scope is finalised.
    pub fn admit(t: &Shared<Transaction>) {
        let (scope, mode, scheduler) = {
            let tb = t.borrow();
            (tb.scope.clone(), tb.mode, tb.scheduler.clone())
        };
        let weak = t.downgrade();
        let id = scheduler.borrow_mut().add(&scope, mode, move || {
            if let Some(tt) = weak.upgrade() {
                Transaction::on_scheduler_start(&tt);
            }
        });
        debug_assert_eq!(id, t.borrow().id, "scheduler and transaction ids must line up");
    }

    fn go_inactive(t: &Shared<Transaction>) {
        let should_check = {
            let mut tb = t.borrow_mut();
            if tb.state == TxnState::Active {
                tb.state = TxnState::Inactive;
                true
            } else {
                false
            }
        };
        if should_check {
            Transaction::maybe_auto_commit(t);
        }
    }

    fn maybe_auto_commit(t: &Shared<Transaction>) {
        let (state, pending_empty, started) = {
            let tb = t.borrow();
            (tb.state, tb.pending.is_empty(), tb.started)
        };
        if state != TxnState::Inactive || !pending_empty {
            return;
        }
        if !started {
            t.borrow_mut().commit_on_start = true;
        } else {
            Transaction::begin_commit(t);
        }
    }

    fn on_scheduler_start(t: &Shared<Transaction>) {
        t.borrow_mut().started = true;

        loop {
            let next = t.borrow_mut().buffered.pop_front();
            let Buffered { request, op, event } = match next {
                Some(b) => b,
                None => break,
            };
            let _ = &request;
            op();
            let tasks = t.borrow().tasks.clone();
            tasks.schedule(event);
        }

        if t.borrow().commit_on_start {
            Transaction::begin_commit(t);
        }
    }

    /// Submits one request's operation/event pair (SPEC_FULL §4.5). If the
    /// scheduler has not started this transaction, both closures buffer;
    /// otherwise the operation runs synchronously now and the event
    /// closure is deferred.
    pub fn submit(t: &Shared<Transaction>, request: Shared<Request>, op: OpClosure, event: EventClosure) {
        {
            let mut tb = t.borrow_mut();
            tb.pending.push(request.clone());
        }
        let started = t.borrow().started;
        if !started {
            t.borrow_mut().buffered.push_back(Buffered { request, op, event });
            return;
        }
        op();
        let tasks = t.borrow().tasks.clone();
        tasks.schedule(event);
    }

    /// Convenience for the common case: compute a result synchronously
    /// (the "operation closure"), store it on a freshly minted request,
    /// and queue the matching "event closure" that dispatches it through
    /// this transaction. Returns the request handle immediately, as real
    /// `IDBRequest`-returning calls do.
    pub fn submit_sync(
        t: &Shared<Transaction>,
        source: RequestSource,
        compute: impl FnOnce() -> Result<RequestResult> + 'static,
    ) -> Shared<Request> {
        Transaction::submit_computed(t, Shared::new(Request::new(source)), compute)
    }

    /// Like [`Transaction::submit_sync`], but re-arms and resubmits an
    /// existing request instead of minting a new one — `continue`/
    /// `advance`/`continuePrimaryKey` reuse the cursor's original request
    /// this way rather than handing back a fresh one each call
    /// (SPEC_FULL §4.8).
    pub fn resubmit_sync(
        t: &Shared<Transaction>,
        request: &Shared<Request>,
        compute: impl FnOnce() -> Result<RequestResult> + 'static,
    ) -> Shared<Request> {
        request.borrow_mut().rearm();
        Transaction::submit_computed(t, request.clone(), compute)
    }

    fn submit_computed(
        t: &Shared<Transaction>,
        request: Shared<Request>,
        compute: impl FnOnce() -> Result<RequestResult> + 'static,
    ) -> Shared<Request> {
        let op_request = request.clone();
        let op: OpClosure = Box::new(move || {
            let outcome = compute();
            let mut r = op_request.borrow_mut();
            match outcome {
                Ok(v) => r.set_done_success(v),
                Err(e) => r.set_done_error(e),
            }
        });

        let event_txn = t.clone();
        let event_request = request.clone();
        let event: EventClosure = Box::new(move || {
            let kind = if event_request.borrow().error.is_some() {
                EventKind::Error
            } else {
                EventKind::Success
            };
            Transaction::dispatch_request_event(&event_txn, &event_request, kind);
        });

        Transaction::submit(t, request.clone(), op, event);
        request
    }

    fn remove_pending(&mut self, request: &Shared<Request>) {
        self.pending.retain(|r| !Shared::ptr_eq(r, request));
    }

    /// Dispatches one request's success/error event through the bubble
    /// chain `[transaction, database]`, then applies the transaction-core
    /// discipline from SPEC_FULL §4.5: abort on a thrown listener, abort
    /// on an unprevented error, otherwise a double microtask back to
    /// inactive.
    pub fn dispatch_request_event(t: &Shared<Transaction>, request: &Shared<Request>, kind: EventKind) {
        t.borrow_mut().state = TxnState::Active;

        let database_ancestor = t.borrow().database_ancestor.clone();
        let mut txn_ancestor = TransactionAncestor(t.clone());
        let (threw, prevented) = match &database_ancestor {
            Some(db) => {
                let mut db_borrow = db.borrow_mut();
                let mut chain: [&mut dyn AncestorTarget; 2] = [&mut txn_ancestor, &mut *db_borrow];
                request.borrow_mut().dispatch(kind, &mut chain)
            },
            None => {
                let mut chain: [&mut dyn AncestorTarget; 1] = [&mut txn_ancestor];
                request.borrow_mut().dispatch(kind, &mut chain)
            },
        };

        if threw {
            let err = request
                .borrow()
                .error
                .clone()
                .unwrap_or(Error::Abort);
            t.borrow_mut().remove_pending(request);
            Transaction::abort(t, err);
            return;
        }
        if kind == EventKind::Error && !prevented {
            let err = request
                .borrow()
                .error
                .clone()
                .unwrap_or(Error::Abort);
            t.borrow_mut().remove_pending(request);
            Transaction::abort(t, err);
            return;
        }

        t.borrow_mut().remove_pending(request);

        // A double microtask: one to let any synchronous follow-up code
        // in the handler observe an active transaction, a second to
        // actually flip state and check for auto-commit.
        let outer_weak = t.downgrade();
        let outer_microtasks = t.borrow().microtasks.clone();
        outer_microtasks.schedule(Box::new(move || {
            if let Some(tt) = outer_weak.upgrade() {
                let inner_weak = tt.downgrade();
                let inner_microtasks = tt.borrow().microtasks.clone();
                inner_microtasks.schedule(Box::new(move || {
                    if let Some(tt2) = inner_weak.upgrade() {
                        Transaction::go_inactive(&tt2);
                    }
                }));
            }
        }));
    }

    fn begin_commit(t: &Shared<Transaction>) {
        t.borrow_mut().state = TxnState::Committing;
        let (driver, name, active) = {
            let tb = t.borrow();
            (tb.driver.clone(), tb.savepoint_name.clone(), tb.savepoint_active)
        };
        if active {
            if let Err(e) = driver.release_savepoint(&name) {
                Transaction::abort(t, e);
                return;
            }
        }
        Transaction::finish(t, None);
    }

    /// Cancels pending callbacks, fails every still-pending request, rolls
    /// back the savepoint, reverts version-change metadata, fires
    /// `abort`, then notifies the scheduler (SPEC_FULL §4.5).
    pub fn abort(t: &Shared<Transaction>, error: Error) {
        {
            let tb = t.borrow();
            if tb.state == TxnState::Finished {
                return;
            }
        }
        t.borrow_mut().buffered.clear();

        let pending = std::mem::take(&mut t.borrow_mut().pending);
        for request in &pending {
            let mut r = request.borrow_mut();
            if r.ready_state == crate::event::ReadyState::Pending {
                r.set_done_error(error.clone());
            }
        }

        let (driver, name, active) = {
            let tb = t.borrow();
            (tb.driver.clone(), tb.savepoint_name.clone(), tb.savepoint_active)
        };
        if active {
            if let Err(e) = driver.rollback_savepoint(&name) {
                log::error!("rollback of savepoint {} failed: {}", name, e);
            }
        }

        Transaction::finish(t, Some(error));
    }

    fn finish(t: &Shared<Transaction>, error: Option<Error>) {
        let on_finish = {
            let mut tb = t.borrow_mut();
            tb.state = TxnState::Finished;
            match &error {
                Some(e) => {
                    for l in tb.abort_listeners.iter_mut() {
                        l(e);
                    }
                },
                None => {
                    for l in tb.complete_listeners.iter_mut() {
                        l();
                    }
                },
            }
            tb.on_finish.take()
        };
        if let Some(cb) = on_finish {
            cb(&t.borrow());
        }

        let (scheduler, id) = {
            let tb = t.borrow();
            (tb.scheduler.clone(), tb.id)
        };
        scheduler.borrow_mut().finished(id);
    }
}

struct TransactionAncestor(Shared<Transaction>);

impl AncestorTarget for TransactionAncestor {
    fn run_listeners(&mut self, kind: EventKind, ctx: &crate::event::EventPhaseContext) {
        let mut tb = self.0.borrow_mut();
        let listeners = match kind {
            EventKind::Success => &mut tb.success_listeners,
            EventKind::Error => &mut tb.error_listeners,
        };
        for l in listeners.iter_mut() {
            l(ctx);
        }
    }
}

pub type TransactionHandle = Shared<Transaction>;
pub type TransactionWeakHandle = WeakShared<Transaction>;
