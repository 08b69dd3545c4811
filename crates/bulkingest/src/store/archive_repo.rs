//! Ledger of expanded archives, keyed by archive fingerprint.
//!
//! A rescan consults it to skip archives whose members were already
//! registered; member documents are deduplicated independently.

use rusqlite::{params, OptionalExtension};

use super::{timestamp_now, Store, StoreError};

pub fn is_expanded(store: &Store, project_id: i64, fingerprint: &str) -> Result<bool, StoreError> {
    store.with_conn(|conn| {
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM archives WHERE project_id = ?1 AND fingerprint = ?2",
                params![project_id, fingerprint],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

/// Records a fully expanded archive. Returns false if it was already recorded.
pub fn record_expansion(
    store: &Store,
    project_id: i64,
    fingerprint: &str,
    source_path: &str,
    entry_count: u64,
) -> Result<bool, StoreError> {
    let entry_count = i64::try_from(entry_count).unwrap_or(i64::MAX);
    let expanded_at = timestamp_now();
    store.write_tx(|tx| {
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO archives (project_id, fingerprint, source_path, entry_count,
             expanded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project_id, fingerprint, source_path, entry_count, expanded_at],
        )?;
        Ok(inserted == 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::project_repo;
    use std::path::Path;

    #[test]
    fn test_record_and_query() {
        let store = Store::open_in_memory().unwrap();
        let project =
            project_repo::create_project(&store, "p", Path::new("/in"), Path::new("/data"))
                .unwrap();

        assert!(!is_expanded(&store, project.id, "zipfp").unwrap());
        assert!(record_expansion(&store, project.id, "zipfp", "/in/a.zip", 3).unwrap());
        assert!(is_expanded(&store, project.id, "zipfp").unwrap());

        // Second record is ignored.
        assert!(!record_expansion(&store, project.id, "zipfp", "/in/b.zip", 3).unwrap());
    }
}
