/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A single open connection (SPEC_FULL §4.9): the live object-store/index
//! name cache, structural mutations (which are legal only inside a
//! version-change transaction), and transaction creation.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::driver::{Durability, IndexMeta, StorageDriver, StoreMeta};
use crate::error::{Error, Result};
use crate::event::{EventTarget, Listener, TaskQueue};
use crate::journal::{JournalEntry, MetadataCache};
use crate::keypath::KeyPath;
use crate::scheduler::{Scheduler, TxnMode};
use crate::shared::{Shared, WeakShared};
use crate::store::{IndexHandle, StoreHandle};
use crate::transaction::{Transaction, TransactionHandle};

struct StoreEntry {
    id: i64,
    deleted: bool,
}

struct IndexEntry {
    id: i64,
    deleted: bool,
}

/// One open handle on a database. Several `Database` instances can be
/// live at once for the same name (they share the engine's driver and
/// scheduler for that name); each tracks the live object-store/index
/// name set independently so a version-change abort's journal replay
/// only ever patches the connection that ran it.
pub struct Database {
    pub name: String,
    driver: Rc<dyn StorageDriver>,
    scheduler: Shared<Scheduler>,
    tasks: TaskQueue,
    microtasks: TaskQueue,
    stores: FxHashMap<String, StoreEntry>,
    indexes: FxHashMap<(String, String), IndexEntry>,
    /// The bubble target for every request created inside a transaction
    /// on this connection, and the place `versionchange` listeners live.
    pub connection_target: Shared<EventTarget>,
    version_change_listeners: Vec<Box<dyn FnMut(u64, Option<u64>)>>,
    closed: bool,
}

impl Database {
    pub fn open(
        name: String,
        driver: Rc<dyn StorageDriver>,
        scheduler: Shared<Scheduler>,
        tasks: TaskQueue,
        microtasks: TaskQueue,
    ) -> Result<Shared<Database>> {
        let mut stores = FxHashMap::default();
        for meta in driver.list_stores()? {
            stores.insert(meta.name.clone(), StoreEntry { id: meta.id, deleted: false });
        }
        let mut indexes = FxHashMap::default();
        for (store_name, entry) in stores.iter().map(|(n, e)| (n.clone(), e.id)) {
            for idx in driver.list_indexes(entry)? {
                indexes.insert(
                    (store_name.clone(), idx.name.clone()),
                    IndexEntry { id: idx.id, deleted: false },
                );
            }
        }
        Ok(Shared::new(Database {
            name,
            driver,
            scheduler,
            tasks,
            microtasks,
            stores,
            indexes,
            connection_target: Shared::new(EventTarget::default()),
            version_change_listeners: Vec::new(),
            closed: false,
        }))
    }

    pub fn version(&self) -> Result<u64> {
        self.driver.version()
    }

    pub fn set_version(&self, version: u64) -> Result<()> {
        self.driver.set_version(version)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn add_version_change_listener(&mut self, listener: Box<dyn FnMut(u64, Option<u64>)>) {
        self.version_change_listeners.push(listener);
    }

    /// Registers a listener on the connection-wide bubble target — the
    /// node every transaction's requests on this connection bubble
    /// through (SPEC_FULL §4.3, §9).
    pub fn add_success_listener(db: &Shared<Database>, listener: Listener) {
        db.borrow().connection_target.borrow_mut().add_success_listener(listener);
    }

    pub fn add_error_listener(db: &Shared<Database>, listener: Listener) {
        db.borrow().connection_target.borrow_mut().add_error_listener(listener);
    }

    pub fn fire_version_change(&mut self, old_version: u64, new_version: Option<u64>) {
        for l in self.version_change_listeners.iter_mut() {
            l(old_version, new_version);
        }
    }

    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .iter()
            .filter(|(_, e)| !e.deleted)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn index_names(&self, store_name: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .indexes
            .iter()
            .filter(|((store, _), e)| store == store_name && !e.deleted)
            .map(|((_, name), _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn store_id(&self, name: &str) -> Result<i64> {
        self.stores
            .get(name)
            .filter(|e| !e.deleted)
            .map(|e| e.id)
            .ok_or_else(|| Error::NotFound(format!("no object store named '{name}'")))
    }

    fn index_id(&self, store_name: &str, index_name: &str) -> Result<i64> {
        self.indexes
            .get(&(store_name.to_string(), index_name.to_string()))
            .filter(|e| !e.deleted)
            .map(|e| e.id)
            .ok_or_else(|| Error::NotFound(format!("no index named '{index_name}' on '{store_name}'")))
    }

    /// Builds a fresh [`StoreHandle`] (including the generator's current
    /// value) for use in one record operation. Always re-reads the
    /// driver rather than trusting a cached copy.
    pub fn store_handle(db: &Shared<Database>, name: &str) -> Result<StoreHandle> {
        let (id, driver) = {
            let dbb = db.borrow();
            (dbb.store_id(name)?, dbb.driver.clone())
        };
        let meta = driver
            .get_store_meta(name)?
            .ok_or_else(|| Error::Storage(format!("store '{name}' metadata missing for id {id}")))?;
        Ok(StoreHandle {
            id: meta.id,
            key_path: meta.key_path,
            auto_increment: meta.auto_increment,
            current_key: meta.current_key,
        })
    }

    pub fn index_handles(db: &Shared<Database>, store_name: &str) -> Result<Vec<IndexHandle>> {
        let (store_id, driver) = {
            let dbb = db.borrow();
            (dbb.store_id(store_name)?, dbb.driver.clone())
        };
        Ok(driver
            .list_indexes(store_id)?
            .into_iter()
            .map(|m| IndexHandle {
                id: m.id,
                key_path: m.key_path,
                unique: m.unique,
                multi_entry: m.multi_entry,
            })
            .collect())
    }

    pub fn index_handle(db: &Shared<Database>, store_name: &str, index_name: &str) -> Result<IndexHandle> {
        let (store_id, index_id, driver) = {
            let dbb = db.borrow();
            (dbb.store_id(store_name)?, dbb.index_id(store_name, index_name)?, dbb.driver.clone())
        };
        let meta = driver
            .get_index_meta(store_id, index_name)?
            .filter(|m| m.id == index_id)
            .ok_or_else(|| Error::Storage("index metadata missing".into()))?;
        Ok(IndexHandle {
            id: meta.id,
            key_path: meta.key_path,
            unique: meta.unique,
            multi_entry: meta.multi_entry,
        })
    }

    /// Opens a new transaction scoped to `scope` and admits it into this
    /// database's scheduler. Structural mutations below are only legal
    /// when `mode == TxnMode::VersionChange`; callers are expected to
    /// pass exactly one such transaction per `open()` upgrade.
    pub fn begin_transaction(db: &Shared<Database>, scope: Vec<String>, mode: TxnMode, durability: Durability) -> TransactionHandle {
        let (driver, scheduler, tasks, microtasks, target) = {
            let dbb = db.borrow();
            (
                dbb.driver.clone(),
                dbb.scheduler.clone(),
                dbb.tasks.clone(),
                dbb.microtasks.clone(),
                dbb.connection_target.clone(),
            )
        };
        let id = scheduler.borrow().peek_next_id();
        let txn = Transaction::new(id, scope, mode, durability, driver, scheduler, tasks, microtasks);
        txn.borrow_mut().set_database_ancestor(target);

        let db_weak = db.downgrade();
        txn.borrow_mut().set_on_finish(move |t| {
            if t.mode != TxnMode::VersionChange {
                return;
            }
            if let Some(db) = db_weak.upgrade() {
                let mut journal = t.journal.clone();
                if !journal.is_empty() {
                    let mut dbb = db.borrow_mut();
                    journal.revert(&mut *dbb);
                }
            }
        });

        Transaction::admit(&txn);
        txn
    }

    pub fn create_object_store(
        txn: &TransactionHandle,
        db: &Shared<Database>,
        name: &str,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> Result<StoreMeta> {
        Self::require_version_change(txn)?;
        if let Some(path) = &key_path {
            path.validate()?;
            if auto_increment && !path.allows_auto_increment() {
                return Err(Error::InvalidAccess(
                    "autoIncrement requires a non-empty, non-sequence key path".into(),
                ));
            }
        }
        {
            let dbb = db.borrow();
            if dbb.stores.get(name).is_some_and(|e| !e.deleted) {
                return Err(Error::Constraint(format!("an object store named '{name}' already exists")));
            }
        }
        let driver = txn.borrow().driver().clone();
        let meta = driver.create_store(name, key_path, auto_increment)?;
        db.borrow_mut().stores.insert(name.to_string(), StoreEntry { id: meta.id, deleted: false });
        txn.borrow_mut().journal.push(JournalEntry::CreatedStore { name: name.to_string() });
        Ok(meta)
    }

    pub fn delete_object_store(txn: &TransactionHandle, db: &Shared<Database>, name: &str) -> Result<()> {
        Self::require_version_change(txn)?;
        let id = {
            let dbb = db.borrow();
            dbb.store_id(name)?
        };
        let driver = txn.borrow().driver().clone();
        driver.delete_store(id)?;
        db.borrow_mut().stores.get_mut(name).expect("looked up above").deleted = true;
        txn.borrow_mut().journal.push(JournalEntry::DeletedStore { name: name.to_string() });
        Ok(())
    }

    pub fn rename_object_store(txn: &TransactionHandle, db: &Shared<Database>, old_name: &str, new_name: &str) -> Result<()> {
        Self::require_version_change(txn)?;
        if old_name == new_name {
            return Ok(());
        }
        let id = {
            let dbb = db.borrow();
            let id = dbb.store_id(old_name)?;
            if dbb.stores.get(new_name).is_some_and(|e| !e.deleted) {
                return Err(Error::Constraint(format!("an object store named '{new_name}' already exists")));
            }
            id
        };
        let driver = txn.borrow().driver().clone();
        driver.rename_store(id, new_name)?;
        {
            let mut dbb = db.borrow_mut();
            dbb.stores.remove(old_name);
            dbb.stores.insert(new_name.to_string(), StoreEntry { id, deleted: false });
        }
        txn.borrow_mut().journal.push(JournalEntry::RenamedStore {
            old: old_name.to_string(),
            new: new_name.to_string(),
        });
        Ok(())
    }

    pub fn create_index(
        txn: &TransactionHandle,
        db: &Shared<Database>,
        store_name: &str,
        name: &str,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Result<IndexMeta> {
        Self::require_version_change(txn)?;
        key_path.validate()?;
        if multi_entry && !key_path.allows_multi_entry() {
            return Err(Error::InvalidAccess(
                "multiEntry requires a single, non-sequence key path".into(),
            ));
        }
        let store_id = {
            let dbb = db.borrow();
            if dbb.indexes.get(&(store_name.to_string(), name.to_string())).is_some_and(|e| !e.deleted) {
                return Err(Error::Constraint(format!("an index named '{name}' already exists")));
            }
            dbb.store_id(store_name)?
        };
        let driver = txn.borrow().driver().clone();
        let meta = driver.create_index(store_id, name, key_path, unique, multi_entry)?;
        db.borrow_mut().indexes.insert(
            (store_name.to_string(), name.to_string()),
            IndexEntry { id: meta.id, deleted: false },
        );
        txn.borrow_mut().journal.push(JournalEntry::CreatedIndex {
            store: store_name.to_string(),
            name: name.to_string(),
        });

        let handle = IndexHandle {
            id: meta.id,
            key_path: meta.key_path.clone(),
            unique: meta.unique,
            multi_entry: meta.multi_entry,
        };
        crate::index::back_populate(&*driver, store_id, &handle)?;

        Ok(meta)
    }

    pub fn delete_index(txn: &TransactionHandle, db: &Shared<Database>, store_name: &str, name: &str) -> Result<()> {
        Self::require_version_change(txn)?;
        let id = {
            let dbb = db.borrow();
            dbb.index_id(store_name, name)?
        };
        let driver = txn.borrow().driver().clone();
        driver.delete_index(id)?;
        db.borrow_mut()
            .indexes
            .get_mut(&(store_name.to_string(), name.to_string()))
            .expect("looked up above")
            .deleted = true;
        txn.borrow_mut().journal.push(JournalEntry::DeletedIndex {
            store: store_name.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn rename_index(txn: &TransactionHandle, db: &Shared<Database>, store_name: &str, old_name: &str, new_name: &str) -> Result<()> {
        Self::require_version_change(txn)?;
        if old_name == new_name {
            return Ok(());
        }
        let id = {
            let dbb = db.borrow();
            let id = dbb.index_id(store_name, old_name)?;
            if dbb.indexes.get(&(store_name.to_string(), new_name.to_string())).is_some_and(|e| !e.deleted) {
                return Err(Error::Constraint(format!("an index named '{new_name}' already exists")));
            }
            id
        };
        let driver = txn.borrow().driver().clone();
        driver.rename_index(id, new_name)?;
        {
            let mut dbb = db.borrow_mut();
            dbb.indexes.remove(&(store_name.to_string(), old_name.to_string()));
            dbb.indexes
                .insert((store_name.to_string(), new_name.to_string()), IndexEntry { id, deleted: false });
        }
        txn.borrow_mut().journal.push(JournalEntry::RenamedIndex {
            store: store_name.to_string(),
            old: old_name.to_string(),
            new: new_name.to_string(),
        });
        Ok(())
    }

    fn require_version_change(txn: &TransactionHandle) -> Result<()> {
        if txn.borrow().mode != TxnMode::VersionChange {
            return Err(Error::InvalidState(
                "structural mutations require a version-change transaction".into(),
            ));
        }
        Ok(())
    }
}

impl MetadataCache for Database {
    fn mark_store_deleted(&mut self, name: &str) {
        if let Some(e) = self.stores.get_mut(name) {
            e.deleted = true;
        }
    }

    fn unmark_store_deleted(&mut self, name: &str) {
        if let Some(e) = self.stores.get_mut(name) {
            e.deleted = false;
        }
    }

    fn rename_store_cache(&mut self, from: &str, to: &str) {
        if let Some(e) = self.stores.remove(from) {
            self.stores.insert(to.to_string(), e);
        }
    }

    fn mark_index_deleted(&mut self, store: &str, name: &str) {
        if let Some(e) = self.indexes.get_mut(&(store.to_string(), name.to_string())) {
            e.deleted = true;
        }
    }

    fn unmark_index_deleted(&mut self, store: &str, name: &str) {
        if let Some(e) = self.indexes.get_mut(&(store.to_string(), name.to_string())) {
            e.deleted = false;
        }
    }

    fn rename_index_cache(&mut self, store: &str, from: &str, to: &str) {
        if let Some(e) = self.indexes.remove(&(store.to_string(), from.to_string())) {
            self.indexes.insert((store.to_string(), to.to_string()), e);
        }
    }
}

pub type DatabaseHandle = Shared<Database>;
pub type DatabaseWeakHandle = WeakShared<Database>;
