/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! DDL for the per-database SQLite file (SPEC_FULL §6, §6.1). Two data
//! tables (`records`, `index_entries`) whose BLOB key columns carry the
//! §4.1 encoding so `ORDER BY key` matches IndexedDB order, plus a small
//! in-file catalog.

pub const INIT_SQL: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS object_stores (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        name            TEXT NOT NULL UNIQUE,
        key_path        TEXT,
        auto_increment  INTEGER NOT NULL,
        current_key     INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS indexes (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        store_id    INTEGER NOT NULL REFERENCES object_stores(id),
        name        TEXT NOT NULL,
        key_path    TEXT NOT NULL,
        is_unique   INTEGER NOT NULL,
        multi_entry INTEGER NOT NULL,
        UNIQUE(store_id, name)
    );

    CREATE TABLE IF NOT EXISTS records (
        store_id INTEGER NOT NULL,
        key      BLOB NOT NULL,
        value    BLOB NOT NULL,
        PRIMARY KEY (store_id, key)
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS index_entries (
        index_id    INTEGER NOT NULL,
        key         BLOB NOT NULL,
        primary_key BLOB NOT NULL,
        PRIMARY KEY (index_id, key, primary_key)
    ) WITHOUT ROWID;

    CREATE INDEX IF NOT EXISTS index_entries_by_primary
        ON index_entries(index_id, primary_key);
";
