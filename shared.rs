/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A single-threaded shared-mutable-cell wrapper used for the
//! request↔transaction↔database object graph (SPEC_FULL §9: "model as
//! arena handles ... a request's `transaction` back-pointer is a borrow,
//! not ownership"). `Rc<RefCell<T>>` is this crate's single-threaded
//! counterpart to the corpus's `Arc<AtomicRefCell<T>>` cell type used for
//! shared graph nodes elsewhere in the tree.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};

pub struct Shared<T> {
    value: Rc<RefCell<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared {
            value: Rc::new(RefCell::new(value)),
        }
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.value.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.value.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }

    /// A non-owning back-reference, e.g. a request's pointer to its
    /// transaction (SPEC_FULL §9: "a borrow, not ownership").
    pub fn downgrade(&self) -> WeakShared<T> {
        WeakShared {
            value: Rc::downgrade(&self.value),
        }
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared {
            value: self.value.clone(),
        }
    }
}

impl<T> Deref for Shared<T> {
    type Target = RefCell<T>;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Identity, not structural, comparison — two handles are equal iff they
/// point at the same cell. Needed so types that embed a `Shared<T>` (e.g.
/// `RequestResult::Connection`) can still derive `PartialEq`.
impl<T> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:p})", Rc::as_ptr(&self.value))
    }
}

pub struct WeakShared<T> {
    value: Weak<RefCell<T>>,
}

impl<T> WeakShared<T> {
    pub fn upgrade(&self) -> Option<Shared<T>> {
        self.value.upgrade().map(|value| Shared { value })
    }
}

impl<T> Clone for WeakShared<T> {
    fn clone(&self) -> Self {
        WeakShared {
            value: self.value.clone(),
        }
    }
}
