/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The one concrete [`StorageDriver`](super::StorageDriver): SQLite via
//! `rusqlite`, with `sea-query` + `sea-query-rusqlite` building the
//! dynamic range queries (SPEC_FULL §6.1).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use sea_query::{Cond, Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

use super::schema::INIT_SQL;
use super::{Direction, Durability, IndexMeta, StorageDriver, StoreMeta};
use crate::error::{Error, Result};
use crate::key::{self, Key};
use crate::keypath::KeyPath;
use crate::keyrange::KeyRange;

#[derive(Iden, Clone, Copy)]
enum Records {
    Table,
    StoreId,
    Key,
    Value,
}

#[derive(Iden, Clone, Copy)]
enum IndexEntries {
    Table,
    IndexId,
    Key,
    PrimaryKey,
}

#[derive(Iden, Clone, Copy)]
enum Meta {
    Table,
    Key,
    Value,
}

/// Maps an arbitrary database name to a filesystem-safe file stem. Names
/// outside `[A-Za-z0-9_-]` are escaped as `_XX` (hex byte), which keeps the
/// mapping collision-free and reversible-enough for debugging.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        let c = byte as char;
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        } else {
            out.push_str(&format!("_{byte:02x}"));
        }
    }
    if out.is_empty() {
        out.push_str("_empty");
    }
    out
}

pub struct SqliteDriver {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
}

impl SqliteDriver {
    /// Opens (creating if absent) the SQLite file for `name` under
    /// `storage_path`.
    pub fn open(storage_path: &Path, name: &str, durability: Durability) -> Result<Self> {
        std::fs::create_dir_all(storage_path)
            .map_err(|e| Error::Storage(format!("cannot create storage directory: {e}")))?;
        let path = storage_path.join(format!("{}.sqlite3", sanitize_name(name)));
        let conn = Connection::open(&path)?;
        conn.execute_batch(INIT_SQL)?;
        let synchronous = match durability {
            Durability::Relaxed => "NORMAL",
            Durability::Strict => "FULL",
        };
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = {synchronous}; PRAGMA foreign_keys = ON;"
        ))?;
        log::debug!("opened indexeddb store '{name}' at {}", path.display());
        Ok(SqliteDriver {
            conn: Mutex::new(Some(conn)),
            path,
        })
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let guard = self.conn.lock().expect("driver mutex poisoned");
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(Error::InvalidState("database has been deleted".into())),
        }
    }

    fn row_key(bytes: Vec<u8>) -> Result<Key> {
        key::decode(&bytes)
    }
}

fn key_path_to_json(path: &KeyPath) -> String {
    serde_json::to_string(path).expect("KeyPath is always serializable")
}

fn key_path_from_json(s: &str) -> Result<KeyPath> {
    serde_json::from_str(s).map_err(|e| Error::Storage(format!("corrupt key path: {e}")))
}

impl StorageDriver for SqliteDriver {
    fn version(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let (sql, values) = Query::select()
                .column(Meta::Value)
                .from(Meta::Table)
                .and_where(Expr::col(Meta::Key).eq("version"))
                .build_rusqlite(SqliteQueryBuilder);
            let version: Option<String> = conn
                .query_row(&sql, &*values.as_params(), |row| row.get(0))
                .optional()?;
            Ok(version.map(|v| v.parse().unwrap_or(0)).unwrap_or(0))
        })
    }

    fn set_version(&self, version: u64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES ('version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [version.to_string()],
            )?;
            Ok(())
        })
    }

    fn delete_database(&self) -> Result<()> {
        {
            let mut guard = self.conn.lock().expect("driver mutex poisoned");
            guard.take();
        }
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| Error::Storage(format!("cannot delete database file: {e}")))?;
        }
        for suffix in ["-wal", "-shm"] {
            let side = PathBuf::from(format!("{}{suffix}", self.path.display()));
            let _ = std::fs::remove_file(side);
        }
        Ok(())
    }

    fn list_stores(&self) -> Result<Vec<StoreMeta>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, key_path, auto_increment, current_key FROM object_stores",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, name, key_path, auto_increment, current_key) = row?;
                out.push(StoreMeta {
                    id,
                    name,
                    key_path: key_path.map(|s| key_path_from_json(&s)).transpose()?,
                    auto_increment: auto_increment != 0,
                    current_key,
                });
            }
            Ok(out)
        })
    }

    fn create_store(
        &self,
        name: &str,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> Result<StoreMeta> {
        self.with_conn(|conn| {
            let key_path_json = key_path.as_ref().map(key_path_to_json);
            conn.execute(
                "INSERT INTO object_stores(name, key_path, auto_increment, current_key)
                 VALUES (?1, ?2, ?3, 1)",
                rusqlite::params![name, key_path_json, auto_increment as i64],
            )?;
            let id = conn.last_insert_rowid();
            Ok(StoreMeta {
                id,
                name: name.to_string(),
                key_path,
                auto_increment,
                current_key: 1,
            })
        })
    }

    fn delete_store(&self, store_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM indexes WHERE store_id = ?1",
                [store_id],
            )?;
            conn.execute(
                "DELETE FROM records WHERE store_id = ?1",
                [store_id],
            )?;
            let affected = conn.execute("DELETE FROM object_stores WHERE id = ?1", [store_id])?;
            if affected == 0 {
                return Err(Error::NotFound(format!("object store {store_id}")));
            }
            Ok(())
        })
    }

    fn rename_store(&self, store_id: i64, new_name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE object_stores SET name = ?1 WHERE id = ?2",
                rusqlite::params![new_name, store_id],
            )?;
            Ok(())
        })
    }

    fn get_store_meta(&self, name: &str) -> Result<Option<StoreMeta>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, key_path, auto_increment, current_key FROM object_stores WHERE name = ?1",
                    [name],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                None => Ok(None),
                Some((id, key_path, auto_increment, current_key)) => Ok(Some(StoreMeta {
                    id,
                    name: name.to_string(),
                    key_path: key_path.map(|s| key_path_from_json(&s)).transpose()?,
                    auto_increment: auto_increment != 0,
                    current_key,
                })),
            }
        })
    }

    fn update_current_key(&self, store_id: i64, value: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE object_stores SET current_key = ?1 WHERE id = ?2",
                rusqlite::params![value, store_id],
            )?;
            Ok(())
        })
    }

    fn list_indexes(&self, store_id: i64) -> Result<Vec<IndexMeta>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, key_path, is_unique, multi_entry FROM indexes WHERE store_id = ?1",
            )?;
            let rows = stmt.query_map([store_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, name, key_path, is_unique, multi_entry) = row?;
                out.push(IndexMeta {
                    id,
                    store_id,
                    name,
                    key_path: key_path_from_json(&key_path)?,
                    unique: is_unique != 0,
                    multi_entry: multi_entry != 0,
                });
            }
            Ok(out)
        })
    }

    fn create_index(
        &self,
        store_id: i64,
        name: &str,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Result<IndexMeta> {
        self.with_conn(|conn| {
            let key_path_json = key_path_to_json(&key_path);
            conn.execute(
                "INSERT INTO indexes(store_id, name, key_path, is_unique, multi_entry)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![store_id, name, key_path_json, unique as i64, multi_entry as i64],
            )?;
            let id = conn.last_insert_rowid();
            Ok(IndexMeta {
                id,
                store_id,
                name: name.to_string(),
                key_path,
                unique,
                multi_entry,
            })
        })
    }

    fn delete_index(&self, index_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM index_entries WHERE index_id = ?1", [index_id])?;
            let affected = conn.execute("DELETE FROM indexes WHERE id = ?1", [index_id])?;
            if affected == 0 {
                return Err(Error::NotFound(format!("index {index_id}")));
            }
            Ok(())
        })
    }

    fn rename_index(&self, index_id: i64, new_name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE indexes SET name = ?1 WHERE id = ?2",
                rusqlite::params![new_name, index_id],
            )?;
            Ok(())
        })
    }

    fn get_index_meta(&self, store_id: i64, name: &str) -> Result<Option<IndexMeta>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, key_path, is_unique, multi_entry FROM indexes
                     WHERE store_id = ?1 AND name = ?2",
                    rusqlite::params![store_id, name],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                None => Ok(None),
                Some((id, key_path, is_unique, multi_entry)) => Ok(Some(IndexMeta {
                    id,
                    store_id,
                    name: name.to_string(),
                    key_path: key_path_from_json(&key_path)?,
                    unique: is_unique != 0,
                    multi_entry: multi_entry != 0,
                })),
            }
        })
    }

    fn put_record(&self, store_id: i64, key: &Key, value: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO records(store_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(store_id, key) DO UPDATE SET value = excluded.value",
                rusqlite::params![store_id, key::encode(key), value],
            )?;
            Ok(())
        })
    }

    fn get_record(&self, store_id: i64, key: &Key) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM records WHERE store_id = ?1 AND key = ?2",
                rusqlite::params![store_id, key::encode(key)],
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::from)
        })
    }

    fn delete_record(&self, store_id: i64, key: &Key) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM records WHERE store_id = ?1 AND key = ?2",
                rusqlite::params![store_id, key::encode(key)],
            )?;
            Ok(())
        })
    }

    fn clear_records(&self, store_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM records WHERE store_id = ?1", [store_id])?;
            Ok(())
        })
    }

    fn get_in_range(&self, store_id: i64, range: &KeyRange) -> Result<Option<(Key, Vec<u8>)>> {
        let rows = self.scan_in_range(store_id, range, Direction::Forward, Some(1))?;
        Ok(rows.into_iter().next())
    }

    fn delete_in_range(&self, store_id: i64, range: &KeyRange) -> Result<u64> {
        self.with_conn(|conn| {
            let (sql, values) = Query::delete()
                .from_table(Records::Table)
                .and_where(Expr::col(Records::StoreId).eq(store_id))
                .cond_where(range_condition(Records::Key, range))
                .build_rusqlite(SqliteQueryBuilder);
            let affected = conn.execute(&sql, &*values.as_params())?;
            Ok(affected as u64)
        })
    }

    fn count_in_range(&self, store_id: i64, range: &KeyRange) -> Result<u64> {
        self.with_conn(|conn| {
            let (sql, values) = Query::select()
                .expr(Expr::col(Records::Key).count())
                .from(Records::Table)
                .and_where(Expr::col(Records::StoreId).eq(store_id))
                .cond_where(range_condition(Records::Key, range))
                .build_rusqlite(SqliteQueryBuilder);
            let count: i64 = conn.query_row(&sql, &*values.as_params(), |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn scan_in_range(
        &self,
        store_id: i64,
        range: &KeyRange,
        direction: Direction,
        limit: Option<u64>,
    ) -> Result<Vec<(Key, Vec<u8>)>> {
        self.with_conn(|conn| {
            let order = match direction {
                Direction::Forward => Order::Asc,
                Direction::Reverse => Order::Desc,
            };
            let mut query = Query::select();
            query
                .columns([Records::Key, Records::Value])
                .from(Records::Table)
                .and_where(Expr::col(Records::StoreId).eq(store_id))
                .cond_where(range_condition(Records::Key, range))
                .order_by(Records::Key, order);
            if let Some(limit) = limit {
                query.limit(limit);
            }
            let (sql, values) = query.build_rusqlite(SqliteQueryBuilder);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(&*values.as_params(), |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (key_bytes, value) = row?;
                out.push((Self::row_key(key_bytes)?, value));
            }
            Ok(out)
        })
    }

    fn add_index_entry(&self, index_id: i64, index_key: &Key, primary_key: &Key) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO index_entries(index_id, key, primary_key) VALUES (?1, ?2, ?3)",
                rusqlite::params![index_id, key::encode(index_key), key::encode(primary_key)],
            )?;
            Ok(())
        })
    }

    fn delete_entries_for_primary(&self, index_id: i64, primary_key: &Key) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM index_entries WHERE index_id = ?1 AND primary_key = ?2",
                rusqlite::params![index_id, key::encode(primary_key)],
            )?;
            Ok(())
        })
    }

    fn check_unique(&self, index_id: i64, index_key: &Key, exclude_primary: Option<&Key>) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = match exclude_primary {
                Some(pk) => conn.query_row(
                    "SELECT COUNT(*) FROM index_entries
                     WHERE index_id = ?1 AND key = ?2 AND primary_key != ?3",
                    rusqlite::params![index_id, key::encode(index_key), key::encode(pk)],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT COUNT(*) FROM index_entries WHERE index_id = ?1 AND key = ?2",
                    rusqlite::params![index_id, key::encode(index_key)],
                    |row| row.get(0),
                )?,
            };
            Ok(count == 0)
        })
    }

    fn count_index(&self, index_id: i64, range: &KeyRange) -> Result<u64> {
        self.with_conn(|conn| {
            let (sql, values) = Query::select()
                .expr(Expr::col(IndexEntries::Key).count())
                .from(IndexEntries::Table)
                .and_where(Expr::col(IndexEntries::IndexId).eq(index_id))
                .cond_where(range_condition(IndexEntries::Key, range))
                .build_rusqlite(SqliteQueryBuilder);
            let count: i64 = conn.query_row(&sql, &*values.as_params(), |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn scan_index(
        &self,
        index_id: i64,
        range: &KeyRange,
        direction: Direction,
        limit: Option<u64>,
    ) -> Result<Vec<(Key, Key)>> {
        self.with_conn(|conn| {
            let order = match direction {
                Direction::Forward => Order::Asc,
                Direction::Reverse => Order::Desc,
            };
            let mut query = Query::select();
            query
                .columns([IndexEntries::Key, IndexEntries::PrimaryKey])
                .from(IndexEntries::Table)
                .and_where(Expr::col(IndexEntries::IndexId).eq(index_id))
                .cond_where(range_condition(IndexEntries::Key, range))
                .order_by(IndexEntries::Key, order)
                .order_by(IndexEntries::PrimaryKey, Order::Asc);
            if let Some(limit) = limit {
                query.limit(limit);
            }
            let (sql, values) = query.build_rusqlite(SqliteQueryBuilder);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(&*values.as_params(), |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (key_bytes, pk_bytes) = row?;
                out.push((Self::row_key(key_bytes)?, Self::row_key(pk_bytes)?));
            }
            Ok(out)
        })
    }

    fn begin_savepoint(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(&format!("SAVEPOINT \"{name}\""))?;
            Ok(())
        })
    }

    fn release_savepoint(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(&format!("RELEASE SAVEPOINT \"{name}\""))?;
            Ok(())
        })
    }

    fn rollback_savepoint(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT \"{name}\"; RELEASE SAVEPOINT \"{name}\""
            ))?;
            Ok(())
        })
    }
}

/// Builds the `WHERE` fragment for a key-column range bound, encoding the
/// endpoints the same way [`crate::key::encode`] does so that SQLite's
/// lexical BLOB ordering matches IndexedDB key order.
fn range_condition<I: Iden + 'static>(column: I, range: &KeyRange) -> Cond {
    let mut cond = Cond::all();
    if let Some(lower) = &range.lower {
        let bytes = key::encode(lower);
        cond = if range.lower_open {
            cond.add(Expr::col(column.clone()).gt(bytes))
        } else {
            cond.add(Expr::col(column.clone()).gte(bytes))
        };
    }
    if let Some(upper) = &range.upper {
        let bytes = key::encode(upper);
        cond = if range.upper_open {
            cond.add(Expr::col(column).lt(bytes))
        } else {
            cond.add(Expr::col(column).lte(bytes))
        };
    }
    cond
}
