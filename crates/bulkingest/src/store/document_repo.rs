//! Document repository: the append-only ledger of discovered files and
//! the job created alongside each one.

use std::path::PathBuf;

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{now_ms, timestamp_now, Store, StoreError};

/// A discovered file about to be registered.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub project_id: i64,
    /// Path in the scanned tree; archive members read `<archive>!/<entry>`.
    pub source_path: String,
    pub canonical_path: PathBuf,
    pub content_fingerprint: String,
    pub size_bytes: u64,
    pub file_extension: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub project_id: i64,
    pub source_path: String,
    pub canonical_path: PathBuf,
    pub content_fingerprint: String,
    pub size_bytes: u64,
    pub file_extension: Option<String>,
    pub mime_type: Option<String>,
    pub discovered_at: String,
}

impl Document {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let canonical: String = row.get("canonical_path")?;
        let size: i64 = row.get("size_bytes")?;
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            source_path: row.get("source_path")?,
            canonical_path: PathBuf::from(canonical),
            content_fingerprint: row.get("content_fingerprint")?,
            size_bytes: size.max(0) as u64,
            file_extension: row.get("file_extension")?,
            mime_type: row.get("mime_type")?,
            discovered_at: row.get("discovered_at")?,
        })
    }
}

/// Result of [`upsert_document_and_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub document_id: i64,
    pub job_id: i64,
    /// False when a document with the same fingerprint already existed.
    pub created: bool,
}

/// Registers a document and its pending job, or does nothing when the
/// project already has a document with the same fingerprint.
pub fn upsert_document_and_job(
    store: &Store,
    doc: &NewDocument,
) -> Result<UpsertOutcome, StoreError> {
    let size = i64::try_from(doc.size_bytes).unwrap_or(i64::MAX);
    let discovered_at = timestamp_now();

    store.write_tx(|tx| {
        let project_exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM projects WHERE id = ?1",
                params![doc.project_id],
                |r| r.get(0),
            )
            .optional()?;
        if project_exists.is_none() {
            return Err(StoreError::NotFound {
                entity: "project",
                id: doc.project_id,
            });
        }

        let inserted = tx.execute(
            "INSERT INTO documents (project_id, source_path, canonical_path, content_fingerprint,
             size_bytes, file_extension, mime_type, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (project_id, content_fingerprint) DO NOTHING",
            params![
                doc.project_id,
                doc.source_path,
                doc.canonical_path.to_string_lossy(),
                doc.content_fingerprint,
                size,
                doc.file_extension,
                doc.mime_type,
                discovered_at,
            ],
        )?;

        if inserted == 1 {
            let document_id = tx.last_insert_rowid();
            let now = now_ms();
            tx.execute(
                "INSERT INTO jobs (document_id, project_id, state, attempt_count, not_before,
                 created_at, updated_at)
                 VALUES (?1, ?2, 'pending', 0, 0, ?3, ?3)",
                params![document_id, doc.project_id, now],
            )?;
            return Ok(UpsertOutcome {
                document_id,
                job_id: tx.last_insert_rowid(),
                created: true,
            });
        }

        let (document_id, job_id): (i64, i64) = tx.query_row(
            "SELECT d.id, j.id FROM documents d JOIN jobs j ON j.document_id = d.id
             WHERE d.project_id = ?1 AND d.content_fingerprint = ?2",
            params![doc.project_id, doc.content_fingerprint],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(UpsertOutcome {
            document_id,
            job_id,
            created: false,
        })
    })
}

pub fn get_document(store: &Store, id: i64) -> Result<Option<Document>, StoreError> {
    store.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id],
                Document::from_row,
            )
            .optional()?)
    })
}

pub fn find_by_fingerprint(
    store: &Store,
    project_id: i64,
    fingerprint: &str,
) -> Result<Option<Document>, StoreError> {
    store.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM documents WHERE project_id = ?1 AND content_fingerprint = ?2",
                params![project_id, fingerprint],
                Document::from_row,
            )
            .optional()?)
    })
}

pub fn count_documents(store: &Store, project_id: i64) -> Result<u64, StoreError> {
    store.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE project_id = ?1",
            params![project_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
