//! Read-only aggregate queries behind `status` and `report`.

use std::collections::BTreeMap;

use rusqlite::{params, Connection};
use serde::Serialize;

use super::job_repo::JobState;
use super::{now_ms, Store, StoreError};

const NO_EXTENSION: &str = "(none)";

/// Per-project counts. Every job state is present, zero-filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectCounts {
    pub project_id: i64,
    pub by_state: BTreeMap<JobState, u64>,
    pub total_jobs: u64,
    pub total_documents: u64,
    pub total_original_bytes: u64,
    pub by_extension: BTreeMap<String, u64>,
}

impl ProjectCounts {
    pub fn state(&self, state: JobState) -> u64 {
        self.by_state.get(&state).copied().unwrap_or(0)
    }

    /// True once every job reached `Done` or `Abandoned`.
    pub fn is_settled(&self) -> bool {
        self.state(JobState::Pending) == 0 && self.state(JobState::Leased) == 0
    }
}

/// An abandoned job with enough context to investigate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbandonedJob {
    pub job_id: i64,
    pub document_id: i64,
    pub source_path: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

/// Counts for one project, read from a single snapshot.
pub fn project_counts(store: &Store, project_id: i64) -> Result<ProjectCounts, StoreError> {
    let now = now_ms();
    store.read_tx(|tx| {
        ensure_project(tx, project_id)?;
        counts_in(tx, project_id, now)
    })
}

/// Counts plus the abandoned jobs, read from a single snapshot.
pub fn project_snapshot(
    store: &Store,
    project_id: i64,
) -> Result<(ProjectCounts, Vec<AbandonedJob>), StoreError> {
    let now = now_ms();
    store.read_tx(|tx| {
        ensure_project(tx, project_id)?;
        Ok((counts_in(tx, project_id, now)?, abandoned_in(tx, project_id)?))
    })
}

fn ensure_project(conn: &Connection, project_id: i64) -> Result<(), StoreError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM projects WHERE id = ?1)",
        params![project_id],
        |r| r.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound {
            entity: "project",
            id: project_id,
        })
    }
}

fn counts_in(conn: &Connection, project_id: i64, now: i64) -> Result<ProjectCounts, StoreError> {
    let mut by_state: BTreeMap<JobState, u64> =
        JobState::ALL.iter().map(|state| (*state, 0)).collect();

    let mut stmt = conn.prepare(
        "SELECT CASE WHEN state = 'leased' AND lease_expires_at <= ?2 THEN 'pending'
                     ELSE state END AS effective_state,
                COUNT(*)
         FROM jobs WHERE project_id = ?1
         GROUP BY effective_state",
    )?;
    let rows = stmt.query_map(params![project_id, now], |r| {
        Ok((r.get::<_, JobState>(0)?, r.get::<_, u64>(1)?))
    })?;
    for row in rows {
        let (state, count) = row?;
        by_state.insert(state, count);
    }
    let total_jobs = by_state.values().sum();

    let (total_documents, total_original_bytes): (u64, u64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM documents WHERE project_id = ?1",
        params![project_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut by_extension = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT COALESCE(file_extension, ?2), COUNT(*) FROM documents
         WHERE project_id = ?1 GROUP BY 1",
    )?;
    let rows = stmt.query_map(params![project_id, NO_EXTENSION], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?))
    })?;
    for row in rows {
        let (extension, count) = row?;
        by_extension.insert(extension, count);
    }

    Ok(ProjectCounts {
        project_id,
        by_state,
        total_jobs,
        total_documents,
        total_original_bytes,
        by_extension,
    })
}

fn abandoned_in(conn: &Connection, project_id: i64) -> Result<Vec<AbandonedJob>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT j.id, j.document_id, d.source_path, j.attempt_count, j.last_error
         FROM jobs j JOIN documents d ON d.id = j.document_id
         WHERE j.project_id = ?1 AND j.state = 'abandoned'
         ORDER BY j.id ASC",
    )?;
    let jobs = stmt
        .query_map(params![project_id], |r| {
            Ok(AbandonedJob {
                job_id: r.get(0)?,
                document_id: r.get(1)?,
                source_path: r.get(2)?,
                attempt_count: r.get(3)?,
                last_error: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::store::document_repo::{self, NewDocument};
    use crate::store::{job_repo, project_repo};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn add_doc(store: &Store, project_id: i64, fp: &str, ext: Option<&str>, size: u64) -> i64 {
        document_repo::upsert_document_and_job(
            store,
            &NewDocument {
                project_id,
                source_path: format!("/in/{}", fp),
                canonical_path: PathBuf::from(format!("/o/{}", fp)),
                content_fingerprint: fp.to_string(),
                size_bytes: size,
                file_extension: ext.map(str::to_string),
                mime_type: None,
            },
        )
        .unwrap()
        .job_id
    }

    #[test]
    fn test_counts_for_empty_project() {
        let store = Store::open_in_memory().unwrap();
        let project =
            project_repo::create_project(&store, "p", Path::new("/in"), Path::new("/data"))
                .unwrap();

        let counts = project_counts(&store, project.id).unwrap();
        assert_eq!(counts.total_jobs, 0);
        assert_eq!(counts.by_state.len(), 4);
        assert_eq!(counts.state(JobState::Done), 0);
        assert!(counts.is_settled());
    }

    #[test]
    fn test_counts_group_by_state_and_extension() {
        let store = Store::open_in_memory().unwrap();
        let project =
            project_repo::create_project(&store, "p", Path::new("/in"), Path::new("/data"))
                .unwrap();
        let a = add_doc(&store, project.id, "a", Some("pdf"), 10);
        add_doc(&store, project.id, "b", Some("pdf"), 20);
        add_doc(&store, project.id, "c", None, 5);

        let leased = job_repo::lease_next_job(
            &store,
            Some(project.id),
            "w",
            Duration::from_secs(60),
            1,
        )
        .unwrap();
        assert_eq!(leased[0].id, a);
        job_repo::complete_job(&store, a, "w", "/ocr/1.json").unwrap();

        let counts = project_counts(&store, project.id).unwrap();
        assert_eq!(counts.state(JobState::Done), 1);
        assert_eq!(counts.state(JobState::Pending), 2);
        assert_eq!(counts.total_jobs, 3);
        assert_eq!(counts.total_documents, 3);
        assert_eq!(counts.total_original_bytes, 35);
        assert_eq!(counts.by_extension.get("pdf"), Some(&2));
        assert_eq!(counts.by_extension.get(NO_EXTENSION), Some(&1));
        assert!(!counts.is_settled());
    }

    #[test]
    fn test_snapshot_lists_abandoned() {
        let store = Store::open_in_memory().unwrap();
        let project =
            project_repo::create_project(&store, "p", Path::new("/in"), Path::new("/data"))
                .unwrap();
        let job = add_doc(&store, project.id, "a", Some("png"), 1);
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        job_repo::lease_next_job(&store, None, "w", Duration::from_secs(60), 1).unwrap();
        job_repo::fail_job(&store, job, "w", "unreadable page", &policy).unwrap();

        let (counts, abandoned) = project_snapshot(&store, project.id).unwrap();
        assert_eq!(counts.state(JobState::Abandoned), 1);
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].source_path, "/in/a");
        assert_eq!(abandoned[0].last_error.as_deref(), Some("unreadable page"));
    }

    #[test]
    fn test_unknown_project() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            project_counts(&store, 5),
            Err(StoreError::NotFound { .. })
        ));
    }
}
