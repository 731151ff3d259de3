//! Metadata revert journal for version-change transactions.
//!
//! The SQL rollback already restores the on-disk catalog; this journal
//! exists to fix the in-memory handles user code still holds. Each
//! metadata mutation appends an entry, and on abort the journal is
//! replayed in reverse: created stores and indexes become deleted
//! sentinels, deletions are undone, renames reverse. A rename of an
//! entity that was also created inside the same transaction is skipped;
//! the handle is becoming a deleted sentinel regardless.

use crate::index::Index;
use crate::store::ObjectStore;
use std::sync::Arc;

pub(crate) enum MetadataChange {
    CreatedStore {
        handle: ObjectStore,
    },
    DeletedStore {
        handle: Option<ObjectStore>,
    },
    RenamedStore {
        handle: ObjectStore,
        old_name: String,
    },
    CreatedIndex {
        handle: Index,
    },
    DeletedIndex {
        handle: Option<Index>,
    },
    RenamedIndex {
        handle: Index,
        old_name: String,
    },
}

pub(crate) fn revert(journal: Vec<MetadataChange>) {
    let created_stores: Vec<ObjectStore> = journal
        .iter()
        .filter_map(|change| match change {
            MetadataChange::CreatedStore { handle } => Some(handle.clone()),
            _ => None,
        })
        .collect();
    let created_indexes: Vec<Index> = journal
        .iter()
        .filter_map(|change| match change {
            MetadataChange::CreatedIndex { handle } => Some(handle.clone()),
            _ => None,
        })
        .collect();

    for change in journal.into_iter().rev() {
        match change {
            MetadataChange::CreatedStore { handle } => handle.mark_deleted(),
            MetadataChange::DeletedStore { handle } => {
                if let Some(handle) = handle {
                    handle.mark_undeleted();
                }
            }
            MetadataChange::RenamedStore { handle, old_name } => {
                let also_created = created_stores
                    .iter()
                    .any(|created| Arc::ptr_eq(&created.inner, &handle.inner));
                if !also_created {
                    handle.set_cached_name(old_name);
                }
            }
            MetadataChange::CreatedIndex { handle } => handle.mark_deleted(),
            MetadataChange::DeletedIndex { handle } => {
                if let Some(handle) = handle {
                    handle.mark_undeleted();
                }
            }
            MetadataChange::RenamedIndex { handle, old_name } => {
                let also_created = created_indexes
                    .iter()
                    .any(|created| Arc::ptr_eq(&created.inner, &handle.inner));
                if !also_created {
                    handle.set_cached_name(old_name);
                }
            }
        }
    }
}
