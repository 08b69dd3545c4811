//! Project repository: operations on the `projects` table.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{timestamp_now, Store, StoreError};

/// Soft status flag, the only mutable project attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
        }
    }

    fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "active" => Ok(ProjectStatus::Active),
            "archived" => Ok(ProjectStatus::Archived),
            other => Err(StoreError::CorruptRow {
                table: "projects",
                reason: format!("unknown status '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub input_path: PathBuf,
    /// `<data_root>/projects/<id>`.
    pub root_path: PathBuf,
    pub status: ProjectStatus,
    pub created_at: String,
}

struct ProjectRow {
    id: i64,
    name: String,
    input_path: String,
    root_path: String,
    status: String,
    created_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            input_path: row.get("input_path")?,
            root_path: row.get("root_path")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_project(self) -> Result<Project, StoreError> {
        Ok(Project {
            id: self.id,
            name: self.name,
            input_path: PathBuf::from(self.input_path),
            root_path: PathBuf::from(self.root_path),
            status: ProjectStatus::parse(&self.status)?,
            created_at: self.created_at,
        })
    }
}

/// Inserts a project and derives its root under `data_root` in one transaction.
///
/// Fails with `ConstraintViolation` when the name is taken.
pub fn create_project(
    store: &Store,
    name: &str,
    input_path: &Path,
    data_root: &Path,
) -> Result<Project, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::ConstraintViolation(
            "project name must not be empty".to_string(),
        ));
    }

    let created_at = timestamp_now();
    let result = store.write_tx(|tx| {
        tx.execute(
            "INSERT INTO projects (name, input_path, root_path, status, created_at)
             VALUES (?1, ?2, '', 'active', ?3)",
            params![name, input_path.to_string_lossy(), created_at],
        )?;
        let id = tx.last_insert_rowid();
        let root_path = data_root.join("projects").join(id.to_string());
        tx.execute(
            "UPDATE projects SET root_path = ?2 WHERE id = ?1",
            params![id, root_path.to_string_lossy()],
        )?;
        fetch(tx, id)
    });

    match result {
        Err(StoreError::ConstraintViolation(_)) => Err(StoreError::ConstraintViolation(format!(
            "project name '{}' already exists",
            name
        ))),
        other => {
            if let Ok(project) = &other {
                log::info!("Created project {} ({})", project.id, project.name);
            }
            other
        }
    }
}

/// Finds a project by its ID.
pub fn get_project(store: &Store, id: i64) -> Result<Option<Project>, StoreError> {
    store.with_conn(|conn| {
        conn.query_row(
            "SELECT * FROM projects WHERE id = ?1",
            params![id],
            ProjectRow::from_row,
        )
        .optional()?
        .map(ProjectRow::into_project)
        .transpose()
    })
}

/// Like [`get_project`], but an unknown id is `NotFound`.
pub fn require_project(store: &Store, id: i64) -> Result<Project, StoreError> {
    get_project(store, id)?.ok_or(StoreError::NotFound {
        entity: "project",
        id,
    })
}

pub fn list_projects(store: &Store) -> Result<Vec<Project>, StoreError> {
    store.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM projects ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ProjectRow::into_project).collect()
    })
}

pub fn set_project_status(
    store: &Store,
    id: i64,
    status: ProjectStatus,
) -> Result<(), StoreError> {
    store.write_tx(|tx| {
        let changed = tx.execute(
            "UPDATE projects SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "project",
                id,
            });
        }
        Ok(())
    })
}

fn fetch(conn: &Connection, id: i64) -> Result<Project, StoreError> {
    conn.query_row(
        "SELECT * FROM projects WHERE id = ?1",
        params![id],
        ProjectRow::from_row,
    )?
    .into_project()
}
