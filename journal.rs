/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Metadata revert journal for version-change transactions (SPEC_FULL
//! §4.6). SQL rollback already undoes the on-disk catalog; this journal
//! exists to fix up the *in-memory* name/handle caches that user code
//! may already be holding a reference to.

/// The in-memory cache a version-change abort needs to patch up.
/// Implemented by the database's store/index name caches.
pub trait MetadataCache {
    fn mark_store_deleted(&mut self, name: &str);
    fn unmark_store_deleted(&mut self, name: &str);
    fn rename_store_cache(&mut self, from: &str, to: &str);
    fn mark_index_deleted(&mut self, store: &str, name: &str);
    fn unmark_index_deleted(&mut self, store: &str, name: &str);
    fn rename_index_cache(&mut self, store: &str, from: &str, to: &str);
}

#[derive(Debug, Clone)]
pub enum JournalEntry {
    CreatedStore { name: String },
    DeletedStore { name: String },
    RenamedStore { old: String, new: String },
    CreatedIndex { store: String, name: String },
    DeletedIndex { store: String, name: String },
    RenamedIndex { store: String, old: String, new: String },
}

impl JournalEntry {
    fn revert(&self, cache: &mut dyn MetadataCache) {
        match self {
            JournalEntry::CreatedStore { name } => cache.mark_store_deleted(name),
            JournalEntry::DeletedStore { name } => cache.unmark_store_deleted(name),
            JournalEntry::RenamedStore { old, new } => cache.rename_store_cache(new, old),
            JournalEntry::CreatedIndex { store, name } => cache.mark_index_deleted(store, name),
            JournalEntry::DeletedIndex { store, name } => cache.unmark_index_deleted(store, name),
            JournalEntry::RenamedIndex { store, old, new } => {
                cache.rename_index_cache(store, new, old)
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Vec<JournalEntry>);

impl Journal {
    pub fn new() -> Journal {
        Journal(Vec::new())
    }

    /// Appends an entry, in order. A rename of a store created earlier in
    /// the same transaction is dropped: the created-store revert already
    /// deletes it outright regardless of any name it picked up along the
    /// way (SPEC_FULL §4.6).
    pub fn push(&mut self, entry: JournalEntry) {
        if let JournalEntry::RenamedStore { old, .. } = &entry {
            let created_here = self
                .0
                .iter()
                .any(|e| matches!(e, JournalEntry::CreatedStore { name } if name == old));
            if created_here {
                return;
            }
        }
        self.0.push(entry);
    }

    /// Replays every entry in reverse order against `cache`.
    pub fn revert(&mut self, cache: &mut dyn MetadataCache) {
        for entry in self.0.drain(..).rev() {
            entry.revert(cache);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeCache {
        deleted_stores: HashSet<String>,
        renamed_stores: Vec<(String, String)>,
    }

    impl MetadataCache for FakeCache {
        fn mark_store_deleted(&mut self, name: &str) {
            self.deleted_stores.insert(name.to_string());
        }
        fn unmark_store_deleted(&mut self, name: &str) {
            self.deleted_stores.remove(name);
        }
        fn rename_store_cache(&mut self, from: &str, to: &str) {
            self.renamed_stores.push((from.to_string(), to.to_string()));
        }
        fn mark_index_deleted(&mut self, _store: &str, _name: &str) {}
        fn unmark_index_deleted(&mut self, _store: &str, _name: &str) {}
        fn rename_index_cache(&mut self, _store: &str, _from: &str, _to: &str) {}
    }

    #[test]
    fn revert_undoes_create_in_reverse_order() {
        let mut j = Journal::new();
        j.push(JournalEntry::CreatedStore { name: "a".into() });
        j.push(JournalEntry::DeletedStore { name: "b".into() });
        let mut cache = FakeCache::default();
        j.revert(&mut cache);
        assert!(cache.deleted_stores.contains("a"));
        assert!(!cache.deleted_stores.contains("b"));
        assert!(j.is_empty());
    }

    #[test]
    fn rename_of_store_created_in_same_txn_is_dropped() {
        let mut j = Journal::new();
        j.push(JournalEntry::CreatedStore { name: "a".into() });
        j.push(JournalEntry::RenamedStore {
            old: "a".into(),
            new: "b".into(),
        });
        let mut cache = FakeCache::default();
        j.revert(&mut cache);
        assert!(cache.deleted_stores.contains("a"));
        assert!(cache.renamed_stores.is_empty());
    }

    #[test]
    fn rename_of_preexisting_store_reverts_name() {
        let mut j = Journal::new();
        j.push(JournalEntry::RenamedStore {
            old: "a".into(),
            new: "b".into(),
        });
        let mut cache = FakeCache::default();
        j.revert(&mut cache);
        assert_eq!(cache.renamed_stores, vec![("b".to_string(), "a".to_string())]);
    }
}
