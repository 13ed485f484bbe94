/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! `open`/`deleteDatabase` (SPEC_FULL §4.9): the one place version
//! resolution, `upgradeneeded`, and cross-connection `versionchange`
//! notification happen.

use crate::database::{Database, DatabaseHandle};
use crate::driver::Durability;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::event::{AncestorTarget, EventKind, Request, RequestResult, RequestSource};
use crate::scheduler::TxnMode;
use crate::shared::Shared;
use crate::transaction::TransactionHandle;

/// Opens `name` at `version` (or the existing/default version if `None`),
/// returning the request immediately; the whole algorithm runs on a
/// deferred task against the database's task queue (SPEC_FULL §4.9).
///
/// `on_upgrade_needed` runs synchronously inside that deferred task, once
/// the version-change transaction has been admitted and before its
/// completion is awaited — the caller uses it to create/alter stores and
/// indexes via [`Database`]'s structural methods.
pub fn open(
    engine: &Shared<Engine>,
    name: &str,
    version: Option<u64>,
    on_upgrade_needed: impl FnOnce(&TransactionHandle, &DatabaseHandle, u64, u64) + 'static,
) -> Shared<Request> {
    let request = Shared::new(Request::new(RequestSource::Factory));

    let tasks = match engine.borrow_mut().tasks_for(name) {
        Ok(t) => t,
        // No task queue exists yet because the storage couldn't even be
        // opened; nothing to defer onto, so report synchronously.
        Err(e) => {
            finish_request(&request, Err(e));
            return request;
        },
    };

    let engine = engine.clone();
    let name = name.to_string();
    let req = request.clone();
    tasks.schedule(Box::new(move || run_open(&engine, &name, version, on_upgrade_needed, &req)));

    request
}

fn run_open(
    engine: &Shared<Engine>,
    name: &str,
    version: Option<u64>,
    on_upgrade_needed: impl FnOnce(&TransactionHandle, &DatabaseHandle, u64, u64) + 'static,
    request: &Shared<Request>,
) {
    let db = match Engine::open_connection(engine, name) {
        Ok(db) => db,
        Err(e) => return finish_request(request, Err(e)),
    };
    let existing = match db.borrow().version() {
        Ok(v) => v,
        Err(e) => return finish_request(request, Err(e)),
    };

    if let Some(requested) = version {
        if requested < existing {
            return finish_request(request, Err(Error::Version { requested, existing }));
        }
    }
    let resolved = version.unwrap_or(if existing == 0 { 1 } else { existing });

    if resolved <= existing {
        return finish_request(request, Ok(Some(db)));
    }

    let txn = Database::begin_transaction(&db, Vec::new(), TxnMode::VersionChange, Durability::Strict);
    on_upgrade_needed(&txn, &db, existing, resolved);

    let complete_request = request.clone();
    let complete_db = db.clone();
    let mut complete_once = Some((complete_request, complete_db, resolved));
    txn.borrow_mut().add_complete_listener(Box::new(move || {
        if let Some((req, db, new_version)) = complete_once.take() {
            let result = db.borrow().set_version(new_version).map(|_| Some(db.clone()));
            finish_request(&req, result);
        }
    }));

    let abort_request = request.clone();
    let mut abort_once = Some(abort_request);
    txn.borrow_mut().add_abort_listener(Box::new(move |err| {
        if let Some(req) = abort_once.take() {
            finish_request(&req, Err(err.clone()));
        }
    }));
}

/// Notifies every live, non-closed connection to `name` with a
/// `versionchange` event (`newVersion = None`), removes the database, then
/// reports the request's own success as a version-change-shaped outcome
/// (SPEC_FULL §4.9).
pub fn delete_database(engine: &Shared<Engine>, name: &str) -> Shared<Request> {
    let request = Shared::new(Request::new(RequestSource::Factory));

    let tasks = match engine.borrow_mut().tasks_for(name) {
        Ok(t) => t,
        Err(e) => {
            finish_request(&request, Err(e));
            return request;
        },
    };

    let engine = engine.clone();
    let name = name.to_string();
    let req = request.clone();
    tasks.schedule(Box::new(move || run_delete(&engine, &name, &req)));

    request
}

fn run_delete(engine: &Shared<Engine>, name: &str, request: &Shared<Request>) {
    let connections = engine.borrow_mut().live_connections(name);
    for db in &connections {
        if db.borrow().is_closed() {
            continue;
        }
        if let Ok(old_version) = db.borrow().version() {
            db.borrow_mut().fire_version_change(old_version, None);
        }
    }

    if let Err(e) = Engine::delete_database(engine, name) {
        return finish_request(request, Err(e));
    }

    finish_request(request, Ok(None));
}

fn finish_request(request: &Shared<Request>, result: Result<Option<DatabaseHandle>>) {
    let kind = match &result {
        Ok(_) => EventKind::Success,
        Err(_) => EventKind::Error,
    };
    {
        let mut r = request.borrow_mut();
        match result {
            Ok(db) => r.set_done_success(RequestResult::Connection(db)),
            Err(e) => r.set_done_error(e),
        }
    }
    let mut chain: [&mut dyn AncestorTarget; 0] = [];
    request.borrow_mut().dispatch(kind, &mut chain);
}
