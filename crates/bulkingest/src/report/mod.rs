//! Project status report: aggregated counts plus the abandoned jobs, rendered
//! as plain text and stored under the project's `reports/` directory.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::LayoutError;
use crate::storage::filesystem::store_with_atomic_creation;
use crate::storage::ProjectLayout;
use crate::store::job_repo::JobState;
use crate::store::project_repo::{self, Project};
use crate::store::stats_repo::{self, AbandonedJob, ProjectCounts};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub project: Project,
    pub generated_at: DateTime<Utc>,
    pub counts: ProjectCounts,
    pub abandoned: Vec<AbandonedJob>,
}

impl Report {
    /// Reads counts and abandoned jobs for `project_id` from one snapshot.
    pub fn build(store: &Store, project_id: i64) -> Result<Self, StoreError> {
        let project = project_repo::require_project(store, project_id)?;
        let (counts, abandoned) = stats_repo::project_snapshot(store, project_id)?;
        Ok(Self {
            project,
            generated_at: Utc::now(),
            counts,
            abandoned,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let title = "Bulk Ingest Report";
        let _ = writeln!(out, "{}", title);
        let _ = writeln!(out, "{}", "-".repeat(title.len()));
        let _ = writeln!(out, "Project: {} - {}", self.project.id, self.project.name);
        let _ = writeln!(
            out,
            "Generated: {}",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(out, "Total documents: {}", self.counts.total_documents);
        let _ = writeln!(
            out,
            "Total original bytes: {}",
            self.counts.total_original_bytes
        );
        let _ = writeln!(out, "Total jobs: {}", self.counts.total_jobs);
        let _ = writeln!(out);

        let _ = writeln!(out, "Jobs by state:");
        for state in JobState::ALL {
            let _ = writeln!(out, "  {}: {}", state, self.counts.state(state));
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "File extensions:");
        for (extension, count) in &self.counts.by_extension {
            let _ = writeln!(out, "  {}: {}", extension, count);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Abandoned jobs: {}", self.abandoned.len());
        for job in &self.abandoned {
            let _ = writeln!(
                out,
                "  job {} (document {}, {} attempts) {}: {}",
                job.job_id,
                job.document_id,
                job.attempt_count,
                job.source_path,
                job.last_error.as_deref().unwrap_or("no error recorded")
            );
        }
        out
    }

    /// Writes the rendered report to `reports/<timestamp>.report`. A second
    /// report in the same second gets a numbered suffix.
    pub fn write(&self, layout: &ProjectLayout) -> Result<PathBuf, LayoutError> {
        let filename = format!("{}.report", self.generated_at.format("%Y%m%dT%H%M%SZ"));
        store_with_atomic_creation(&layout.reports_dir(), &filename, self.render().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_render_empty_project() {
        let store = Store::open_in_memory().unwrap();
        let project =
            project_repo::create_project(&store, "archive-2024", Path::new("/in"), Path::new("/d"))
                .unwrap();

        let report = Report::build(&store, project.id).unwrap();
        let text = report.render();
        assert!(text.contains("Project: 1 - archive-2024"));
        assert!(text.contains("  DONE: 0"));
        assert!(text.contains("Abandoned jobs: 0"));
    }

    #[test]
    fn test_write_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let project =
            project_repo::create_project(&store, "p", Path::new("/in"), dir.path()).unwrap();
        let layout = ProjectLayout::new(&project.root_path);

        let report = Report::build(&store, project.id).unwrap();
        let first = report.write(&layout).unwrap();
        let second = report.write(&layout).unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with(layout.reports_dir()));
        assert_eq!(
            first.extension().and_then(|e| e.to_str()),
            Some("report")
        );
        assert_eq!(std::fs::read_to_string(&second).unwrap(), report.render());
    }

    #[test]
    fn test_unknown_project() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            Report::build(&store, 3),
            Err(StoreError::NotFound { .. })
        ));
    }
}
