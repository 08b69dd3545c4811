//! Schema migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies pending
//! ones in order, all inside one immediate transaction so two processes
//! initializing the same store cannot interleave.

use rusqlite::{Connection, TransactionBehavior};

use super::error::StoreError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_projects_table",
        sql: include_str!("sql/001_create_projects.sql"),
    },
    Migration {
        version: 2,
        description: "create_documents_table",
        sql: include_str!("sql/002_create_documents.sql"),
    },
    Migration {
        version: 3,
        description: "create_jobs_table",
        sql: include_str!("sql/003_create_jobs.sql"),
    },
    Migration {
        version: 4,
        description: "create_archives_table",
        sql: include_str!("sql/004_create_archives.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        tx.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        names.iter().any(|name| name == column)
    }

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let mut conn = fresh();
        run_all(&mut conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = fresh();
        run_all(&mut conn).unwrap();
        run_all(&mut conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_schema_version_matches_latest_migration() {
        let mut conn = fresh();
        run_all(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 4);
        assert!(column_exists(&conn, "archives", "entry_count"));
    }

    #[test]
    fn test_jobs_table_has_lease_columns() {
        let mut conn = fresh();
        run_all(&mut conn).unwrap();

        for column in ["lease_owner", "lease_expires_at", "not_before", "output_ref"] {
            assert!(column_exists(&conn, "jobs", column), "{column}");
        }
    }

    #[test]
    fn test_job_state_is_checked() {
        let mut conn = fresh();
        run_all(&mut conn).unwrap();
        conn.execute_batch(
            "INSERT INTO projects (name, input_path, root_path, created_at) VALUES ('p', '/i', '/r', 'now');
             INSERT INTO documents (project_id, source_path, canonical_path, content_fingerprint, size_bytes, discovered_at)
             VALUES (1, 'a', 'b', 'f', 1, 'now');",
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO jobs (document_id, project_id, state, created_at, updated_at)
             VALUES (1, 1, 'bogus', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
