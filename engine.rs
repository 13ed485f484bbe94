/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The process-wide (but not globally-singleton — SPEC_FULL §9) registry
//! of open databases: one storage driver, one transaction scheduler, and
//! one task/microtask queue pair per database name, shared by every live
//! connection to that name.

use std::path::PathBuf;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::database::Database;
use crate::driver::{Durability, SqliteDriver, StorageDriver};
use crate::error::Result;
use crate::event::TaskQueue;
use crate::scheduler::Scheduler;
use crate::shared::{Shared, WeakShared};

struct Slot {
    driver: Rc<dyn StorageDriver>,
    scheduler: Shared<Scheduler>,
    tasks: TaskQueue,
    microtasks: TaskQueue,
    connections: Vec<WeakShared<Database>>,
}

/// An engine instance is self-contained: two engines pointed at different
/// `base_dir`s never share state, which is what lets tests run many of
/// them side by side instead of fighting over one process-wide registry.
pub struct Engine {
    base_dir: PathBuf,
    durability: Durability,
    slots: FxHashMap<String, Slot>,
}

impl Engine {
    pub fn new(base_dir: PathBuf, durability: Durability) -> Shared<Engine> {
        Shared::new(Engine {
            base_dir,
            durability,
            slots: FxHashMap::default(),
        })
    }

    fn ensure_slot(&mut self, name: &str) -> Result<&mut Slot> {
        if !self.slots.contains_key(name) {
            let driver: Rc<dyn StorageDriver> =
                Rc::new(SqliteDriver::open(&self.base_dir, name, self.durability)?);
            let tasks = TaskQueue::new();
            let microtasks = TaskQueue::new();
            let scheduler = Scheduler::new(tasks.clone());
            self.slots.insert(
                name.to_string(),
                Slot {
                    driver,
                    scheduler: Shared::new(scheduler),
                    tasks,
                    microtasks,
                    connections: Vec::new(),
                },
            );
        }
        Ok(self.slots.get_mut(name).expect("just inserted"))
    }

    /// Opens a new connection handle to `name`, creating the on-disk
    /// database and its scheduler/task-queue slot on first use.
    pub fn open_connection(engine: &Shared<Engine>, name: &str) -> Result<Shared<Database>> {
        let (driver, scheduler, tasks, microtasks) = {
            let mut eb = engine.borrow_mut();
            let slot = eb.ensure_slot(name)?;
            (
                slot.driver.clone(),
                slot.scheduler.clone(),
                slot.tasks.clone(),
                slot.microtasks.clone(),
            )
        };
        let db = Database::open(name.to_string(), driver, scheduler, tasks, microtasks)?;
        let mut eb = engine.borrow_mut();
        let slot = eb.ensure_slot(name)?;
        slot.connections.push(db.downgrade());
        Ok(db)
    }

    /// Every still-live connection to `name`, pruning dead weak refs.
    pub fn live_connections(&mut self, name: &str) -> Vec<Shared<Database>> {
        let Some(slot) = self.slots.get_mut(name) else {
            return Vec::new();
        };
        slot.connections.retain(|w| w.upgrade().is_some());
        slot.connections.iter().filter_map(|w| w.upgrade()).collect()
    }

    pub fn driver_for(&mut self, name: &str) -> Result<Rc<dyn StorageDriver>> {
        Ok(self.ensure_slot(name)?.driver.clone())
    }

    pub fn tasks_for(&mut self, name: &str) -> Result<TaskQueue> {
        Ok(self.ensure_slot(name)?.tasks.clone())
    }

    /// The microtask queue backing `name`'s database slot. Exposed mainly
    /// so callers driving the event loop by hand (tests, an embedder with
    /// no native microtask checkpoint) can pump it between task drains.
    pub fn microtasks_for(&mut self, name: &str) -> Result<TaskQueue> {
        Ok(self.ensure_slot(name)?.microtasks.clone())
    }

    /// Tears down a database's on-disk state. Live connections should be
    /// notified (`versionchange` with `newVersion=None`) by the caller
    /// before this runs (SPEC_FULL §4.9).
    pub fn delete_database(engine: &Shared<Engine>, name: &str) -> Result<()> {
        let driver = {
            let mut eb = engine.borrow_mut();
            eb.ensure_slot(name)?.driver.clone()
        };
        driver.delete_database()?;
        engine.borrow_mut().slots.remove(name);
        Ok(())
    }
}
