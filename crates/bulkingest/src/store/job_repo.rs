//! Job repository: the leasing protocol over the `jobs` table.
//!
//! Every transition runs in one immediate transaction: the eligible rows are
//! selected and rewritten while SQLite's write lock is held, so concurrent
//! workers (threads or processes) never receive the same job. Expired leases
//! are not reaped by a background task; a lease whose `lease_expires_at` has
//! passed simply counts as pending for every query that runs afterwards.

use std::fmt;
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::Serialize;

use super::{duration_ms, now_ms, Store, StoreError};
use crate::config::RetryPolicy;

const MAX_ERROR_LEN: usize = 4_000;

/// Projection used by every read so callers see the effective state.
const SELECT_JOB: &str = "SELECT j.*,
    CASE WHEN j.state = 'leased' AND j.lease_expires_at <= ?1 THEN 'pending' ELSE j.state END
        AS effective_state
    FROM jobs j";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Leased,
    Done,
    Abandoned,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Leased,
        JobState::Done,
        JobState::Abandoned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Leased => "leased",
            JobState::Done => "done",
            JobState::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobState::Pending),
            "leased" => Some(JobState::Leased),
            "done" => Some(JobState::Done),
            "abandoned" => Some(JobState::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Abandoned)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromSql for JobState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        JobState::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown job state '{}'", text).into()))
    }
}

impl ToSql for JobState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// A job row. `state` is the effective state: an expired lease reads as
/// `Pending` even though `lease_owner` still names the previous holder.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub document_id: i64,
    pub project_id: i64,
    pub state: JobState,
    pub attempt_count: u32,
    pub lease_owner: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub lease_expires_at: Option<i64>,
    /// Earliest time a retried job may be leased again.
    pub not_before: i64,
    pub last_error: Option<String>,
    pub output_ref: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Job {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            project_id: row.get("project_id")?,
            state: row.get("effective_state")?,
            attempt_count: row.get("attempt_count")?,
            lease_owner: row.get("lease_owner")?,
            lease_expires_at: row.get("lease_expires_at")?,
            not_before: row.get("not_before")?,
            last_error: row.get("last_error")?,
            output_ref: row.get("output_ref")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Outcome of [`fail_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailOutcome {
    /// `Pending` when a retry is scheduled, `Abandoned` when attempts ran out.
    pub state: JobState,
    pub attempt_count: u32,
    /// When the retry becomes eligible (ms since epoch).
    pub retry_at: Option<i64>,
}

/// Leases up to `limit` eligible jobs to `worker_id` for `lease_duration`.
///
/// Eligible jobs are pending jobs past their backoff gate and leased jobs
/// whose lease has expired. Oldest `updated_at` first, ties by job id.
pub fn lease_next_job(
    store: &Store,
    project_id: Option<i64>,
    worker_id: &str,
    lease_duration: Duration,
    limit: usize,
) -> Result<Vec<Job>, StoreError> {
    lease_next_job_at(store, project_id, worker_id, lease_duration, limit, now_ms())
}

/// [`lease_next_job`] evaluated at an explicit clock reading.
pub fn lease_next_job_at(
    store: &Store,
    project_id: Option<i64>,
    worker_id: &str,
    lease_duration: Duration,
    limit: usize,
    now: i64,
) -> Result<Vec<Job>, StoreError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let expires_at = now.saturating_add(duration_ms(lease_duration));
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    store.write_tx(|tx| {
        let candidates: Vec<(i64, String, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, state, lease_owner FROM jobs
                 WHERE ((state = 'pending' AND not_before <= ?1)
                     OR (state = 'leased' AND lease_expires_at <= ?1))
                   AND (?2 IS NULL OR project_id = ?2)
                 ORDER BY updated_at ASC, id ASC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![now, project_id, limit], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut leased = Vec::with_capacity(candidates.len());
        for (id, state, previous_owner) in candidates {
            if state == JobState::Leased.as_str() {
                log::warn!(
                    "Reclaiming job {} from expired lease held by '{}'",
                    id,
                    previous_owner.as_deref().unwrap_or("unknown")
                );
            }
            tx.execute(
                "UPDATE jobs SET state = 'leased', lease_owner = ?2, lease_expires_at = ?3,
                 updated_at = ?4
                 WHERE id = ?1",
                params![id, worker_id, expires_at, now],
            )?;
            leased.push(fetch(tx, id, now)?);
        }
        Ok(leased)
    })
}

/// Marks a leased job done and records where its output was written.
///
/// Fails with `LeaseLost` unless `worker_id` holds an unexpired lease.
pub fn complete_job(
    store: &Store,
    job_id: i64,
    worker_id: &str,
    output_ref: &str,
) -> Result<Job, StoreError> {
    complete_job_at(store, job_id, worker_id, output_ref, now_ms())
}

pub fn complete_job_at(
    store: &Store,
    job_id: i64,
    worker_id: &str,
    output_ref: &str,
    now: i64,
) -> Result<Job, StoreError> {
    store.write_tx(|tx| {
        check_lease(tx, job_id, worker_id, now)?;
        tx.execute(
            "UPDATE jobs SET state = 'done', output_ref = ?2, last_error = NULL,
             lease_owner = NULL, lease_expires_at = NULL, completed_at = ?3, updated_at = ?3
             WHERE id = ?1",
            params![job_id, output_ref, now],
        )?;
        fetch(tx, job_id, now)
    })
}

/// Records a failed attempt. The job returns to `Pending` behind a backoff
/// gate, or becomes `Abandoned` once `policy.max_attempts` is reached.
///
/// Fails with `LeaseLost` unless `worker_id` holds an unexpired lease.
pub fn fail_job(
    store: &Store,
    job_id: i64,
    worker_id: &str,
    error: &str,
    policy: &RetryPolicy,
) -> Result<FailOutcome, StoreError> {
    fail_job_at(store, job_id, worker_id, error, policy, now_ms())
}

pub fn fail_job_at(
    store: &Store,
    job_id: i64,
    worker_id: &str,
    error: &str,
    policy: &RetryPolicy,
    now: i64,
) -> Result<FailOutcome, StoreError> {
    let error: String = error.chars().take(MAX_ERROR_LEN).collect();

    store.write_tx(|tx| {
        let attempt_count = check_lease(tx, job_id, worker_id, now)?.saturating_add(1);

        if policy.is_exhausted(attempt_count) {
            tx.execute(
                "UPDATE jobs SET state = 'abandoned', attempt_count = ?2, last_error = ?3,
                 lease_owner = NULL, lease_expires_at = NULL, completed_at = ?4, updated_at = ?4
                 WHERE id = ?1",
                params![job_id, attempt_count, error, now],
            )?;
            return Ok(FailOutcome {
                state: JobState::Abandoned,
                attempt_count,
                retry_at: None,
            });
        }

        let retry_at = now.saturating_add(duration_ms(policy.delay_after(attempt_count)));
        tx.execute(
            "UPDATE jobs SET state = 'pending', attempt_count = ?2, last_error = ?3,
             lease_owner = NULL, lease_expires_at = NULL, not_before = ?4, updated_at = ?5
             WHERE id = ?1",
            params![job_id, attempt_count, error, retry_at, now],
        )?;
        Ok(FailOutcome {
            state: JobState::Pending,
            attempt_count,
            retry_at: Some(retry_at),
        })
    })
}

/// Returns a job leased by `worker_id` to `Pending` without counting an
/// attempt. Returns false when the lease was no longer held.
pub fn release_job(store: &Store, job_id: i64, worker_id: &str) -> Result<bool, StoreError> {
    let now = now_ms();
    store.write_tx(|tx| {
        let released = tx.execute(
            "UPDATE jobs SET state = 'pending', lease_owner = NULL, lease_expires_at = NULL,
             updated_at = ?3
             WHERE id = ?1 AND state = 'leased' AND lease_owner = ?2 AND lease_expires_at > ?3",
            params![job_id, worker_id, now],
        )?;
        Ok(released == 1)
    })
}

/// Jobs of a project currently in `state` (effective), oldest first.
pub fn list_jobs_by_state(
    store: &Store,
    project_id: i64,
    state: JobState,
) -> Result<Vec<Job>, StoreError> {
    let now = now_ms();
    store.read_tx(|tx| list_in(tx, project_id, state, now))
}

pub(crate) fn list_in(
    conn: &Connection,
    project_id: i64,
    state: JobState,
    now: i64,
) -> Result<Vec<Job>, StoreError> {
    let sql = format!(
        "SELECT * FROM ({}) WHERE project_id = ?2 AND effective_state = ?3
         ORDER BY updated_at ASC, id ASC",
        SELECT_JOB
    );
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map(params![now, project_id, state], Job::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

pub fn get_job(store: &Store, job_id: i64) -> Result<Option<Job>, StoreError> {
    let now = now_ms();
    store.with_conn(|conn| {
        Ok(conn
            .query_row(
                &format!("{} WHERE j.id = ?2", SELECT_JOB),
                params![now, job_id],
                Job::from_row,
            )
            .optional()?)
    })
}

/// Verifies `worker_id` holds a live lease and returns the attempt count.
fn check_lease(
    conn: &Connection,
    job_id: i64,
    worker_id: &str,
    now: i64,
) -> Result<u32, StoreError> {
    let current: Option<(JobState, Option<String>, Option<i64>, u32)> = conn
        .query_row(
            "SELECT state, lease_owner, lease_expires_at, attempt_count FROM jobs WHERE id = ?1",
            params![job_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((state, owner, expires_at, attempt_count)) = current else {
        return Err(StoreError::NotFound {
            entity: "job",
            id: job_id,
        });
    };

    let live = state == JobState::Leased
        && owner.as_deref() == Some(worker_id)
        && expires_at.is_some_and(|t| t > now);
    if !live {
        return Err(StoreError::LeaseLost {
            job_id,
            worker_id: worker_id.to_string(),
        });
    }
    Ok(attempt_count)
}

fn fetch(conn: &Connection, job_id: i64, now: i64) -> Result<Job, StoreError> {
    Ok(conn.query_row(
        &format!("{} WHERE j.id = ?2", SELECT_JOB),
        params![now, job_id],
        Job::from_row,
    )?)
}
