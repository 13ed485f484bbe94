/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Request/event kernel (SPEC_FULL §4.3, §9): single-shot requests, a
//! three-phase (capture/target/bubble) event dispatch over the
//! request→transaction→database chain, and a synchronous, drainable task
//! queue standing in for the host's deferred-task primitive.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::Error;

/// What produced a request: used only for labelling, since result/error
/// storage and dispatch are uniform across sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    Store,
    Index,
    Cursor,
    Factory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Done,
}

/// An arbitrary request result. Keeping this small and enum-shaped (rather
/// than a trait object) matches the tagged-variant-over-inheritance guidance
/// for this design (SPEC_FULL §9) and keeps requests cheap to re-arm for
/// cursor `continue`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestResult {
    None,
    Key(crate::key::Key),
    Value(crate::value::Value),
    Count(u64),
    Keys(Vec<crate::key::Key>),
    Values(Vec<crate::value::Value>),
    Records(Vec<crate::store::Record>),
    /// `openCursor`/`openKeyCursor`'s result: the cursor handle and its
    /// initial row, or `None` if nothing matched.
    Cursor(crate::shared::Shared<crate::cursor::Cursor>, Option<crate::cursor::CursorRow>),
    /// `continue`/`advance`/`continuePrimaryKey`'s result: the row the
    /// cursor landed on, or `None` once exhausted. The cursor handle
    /// itself doesn't change, so it isn't repeated here.
    CursorRow(Option<crate::cursor::CursorRow>),
    /// An `open()`/`deleteDatabase()` outcome: the connection handle (or
    /// `None` for a `deleteDatabase` success).
    Connection(Option<crate::database::DatabaseHandle>),
}

/// A single-shot request produced by a transaction. Never mutated once
/// `ready_state` is `Done` (SPEC_FULL §3).
pub struct Request {
    pub source: RequestSource,
    pub ready_state: ReadyState,
    pub result: Option<RequestResult>,
    pub error: Option<Error>,
    success_listeners: Vec<Listener>,
    error_listeners: Vec<Listener>,
}

/// A listener is `FnMut` because a once-listener needs to record that it
/// fired (for `on*` attribute semantics) without requiring `Sync`/`Send` —
/// this crate is single-threaded cooperative (SPEC_FULL §5).
pub type Listener = Box<dyn FnMut(&EventPhaseContext)>;

/// What a listener sees when invoked: whether this was the capture, target
/// or bubble phase, and a handle to flag "some listener threw" / "default
/// prevented" back to the dispatcher.
pub struct EventPhaseContext<'a> {
    pub phase: Phase,
    threw: &'a RefCell<bool>,
    prevented: &'a RefCell<bool>,
}

impl<'a> EventPhaseContext<'a> {
    pub fn prevent_default(&self) {
        *self.prevented.borrow_mut() = true;
    }

    pub fn report_exception(&self) {
        *self.threw.borrow_mut() = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Capture,
    Target,
    Bubble,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Success,
    Error,
}

impl Request {
    pub fn new(source: RequestSource) -> Request {
        Request {
            source,
            ready_state: ReadyState::Pending,
            result: None,
            error: None,
            success_listeners: Vec::new(),
            error_listeners: Vec::new(),
        }
    }

    /// Resets a finished request back to `Pending` for `continue`/`advance`
    /// re-seeking (SPEC_FULL §4.8) without touching listeners.
    pub fn rearm(&mut self) {
        self.ready_state = ReadyState::Pending;
        self.result = None;
        self.error = None;
    }

    pub fn add_success_listener(&mut self, listener: Listener) {
        self.success_listeners.push(listener);
    }

    pub fn add_error_listener(&mut self, listener: Listener) {
        self.error_listeners.push(listener);
    }

    pub fn set_done_success(&mut self, result: RequestResult) {
        self.ready_state = ReadyState::Done;
        self.result = Some(result);
        self.error = None;
    }

    pub fn set_done_error(&mut self, error: Error) {
        self.ready_state = ReadyState::Done;
        self.error = Some(error);
        self.result = None;
    }

    /// Dispatches `kind`'s event through capture (ancestors outermost→
    /// innermost), target (this request's own listeners), then bubble
    /// (innermost→outermost) if not stopped. `ancestors` are the bubbling
    /// chain's non-target nodes, e.g. `[transaction, database]`.
    ///
    /// Returns `(some_listener_threw, default_prevented)`; the transaction
    /// machinery (not this kernel) decides whether either fact causes an
    /// abort (SPEC_FULL §4.5, §9).
    pub fn dispatch(
        &mut self,
        kind: EventKind,
        ancestors: &mut [&mut dyn AncestorTarget],
    ) -> (bool, bool) {
        let threw = RefCell::new(false);
        let prevented = RefCell::new(false);

        // `ancestors` is given innermost-first (e.g. `[transaction, database]`),
        // so capture — outermost to innermost — walks it in reverse.
        for ancestor in ancestors.iter_mut().rev() {
            let ctx = EventPhaseContext {
                phase: Phase::Capture,
                threw: &threw,
                prevented: &prevented,
            };
            ancestor.run_listeners(kind, &ctx);
        }

        let target_listeners = match kind {
            EventKind::Success => &mut self.success_listeners,
            EventKind::Error => &mut self.error_listeners,
        };
        for listener in target_listeners.iter_mut() {
            let ctx = EventPhaseContext {
                phase: Phase::Target,
                threw: &threw,
                prevented: &prevented,
            };
            listener(&ctx);
        }

        // Bubble — innermost to outermost — walks it forward.
        for ancestor in ancestors.iter_mut() {
            let ctx = EventPhaseContext {
                phase: Phase::Bubble,
                threw: &threw,
                prevented: &prevented,
            };
            ancestor.run_listeners(kind, &ctx);
        }

        (threw.into_inner(), prevented.into_inner())
    }
}

/// A node in the bubbling chain above a request (transaction, database).
pub trait AncestorTarget {
    fn run_listeners(&mut self, kind: EventKind, ctx: &EventPhaseContext);
}

/// A plain event target usable standalone (e.g. `Database` for
/// `versionchange`) or as an [`AncestorTarget`] link in a request's chain.
#[derive(Default)]
pub struct EventTarget {
    success_listeners: Vec<Listener>,
    error_listeners: Vec<Listener>,
}

impl EventTarget {
    pub fn add_success_listener(&mut self, listener: Listener) {
        self.success_listeners.push(listener);
    }

    pub fn add_error_listener(&mut self, listener: Listener) {
        self.error_listeners.push(listener);
    }
}

impl AncestorTarget for EventTarget {
    fn run_listeners(&mut self, kind: EventKind, ctx: &EventPhaseContext) {
        let listeners = match kind {
            EventKind::Success => &mut self.success_listeners,
            EventKind::Error => &mut self.error_listeners,
        };
        for listener in listeners.iter_mut() {
            listener(ctx);
        }
    }
}

/// A closure queued to run on a deferred task boundary (SPEC_FULL §4.3,
/// §5, §9). The reference model's task queue is a synchronous, drainable
/// `VecDeque` — tests "run the event loop" by draining it explicitly.
pub type Task = Box<dyn FnOnce()>;

#[derive(Clone, Default)]
pub struct TaskQueue {
    inner: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue::default()
    }

    pub fn schedule(&self, task: Task) {
        self.inner.borrow_mut().push_back(task);
    }

    /// Runs every task currently queued, including ones scheduled by
    /// earlier tasks in this same drain — mirrors draining a macrotask
    /// queue to quiescence.
    pub fn drain(&self) {
        loop {
            let next = self.inner.borrow_mut().pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

/// A microtask checkpoint is, in this synchronous reference model, just
/// running a zero-or-more stack of microtasks to quiescence before control
/// returns to the task queue. Represented identically to [`TaskQueue`]
/// because draining semantics are the same; kept as a distinct type so call
/// sites document which boundary they mean.
pub type MicrotaskQueue = TaskQueue;
