//! Entry points for the four phases (create project, scan, work, report)
//! over one store and one configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::config::loader::validate_config;
use crate::config::IngestConfig;
use crate::error::{LayoutError, Result};
use crate::processor::{CommandOcr, OcrTransform};
use crate::report::Report;
use crate::scanner::{ScanSummary, Scanner};
use crate::storage::ProjectLayout;
use crate::store::project_repo::{self, Project, ProjectStatus};
use crate::store::stats_repo::{self, ProjectCounts};
use crate::store::Store;
use crate::worker::{WorkSummary, WorkerLoop};

/// A written report and what it contains.
#[derive(Debug, Clone, Serialize)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub report: Report,
}

pub struct Ingest<T: OcrTransform = CommandOcr> {
    config: IngestConfig,
    store: Store,
    ocr: T,
}

impl Ingest<CommandOcr> {
    /// Opens the store (applying migrations) with the command-line OCR tools.
    pub fn open(config: IngestConfig) -> Result<Self> {
        let ocr = CommandOcr::new(&config.ocr);
        Self::with_transform(config, ocr)
    }
}

impl<T: OcrTransform> Ingest<T> {
    pub fn with_transform(config: IngestConfig, ocr: T) -> Result<Self> {
        validate_config(&config)?;
        let store = Store::open(&config.database_path)?.with_busy_policy(
            config.busy_retries,
            Duration::from_millis(config.busy_backoff_ms),
        );
        Ok(Self { config, store, ocr })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Registers a project over an existing input directory and creates its
    /// directory layout.
    pub fn create_project(&self, name: &str, input_path: &Path) -> Result<Project> {
        let input_path = input_path
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| {
                crate::scanner::ScanError::InputNotFound(input_path.to_path_buf())
            })?;
        let data_root = absolute(&self.config.data_root)?;

        let project = project_repo::create_project(&self.store, name, &input_path, &data_root)?;
        ProjectLayout::new(&project.root_path).create_dirs()?;
        info!(project_id = project.id, root = %project.root_path.display(), "Project ready");
        Ok(project)
    }

    pub fn get_project(&self, project_id: i64) -> Result<Project> {
        Ok(project_repo::require_project(&self.store, project_id)?)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(project_repo::list_projects(&self.store)?)
    }

    pub fn set_project_status(&self, project_id: i64, status: ProjectStatus) -> Result<()> {
        Ok(project_repo::set_project_status(
            &self.store,
            project_id,
            status,
        )?)
    }

    /// Scans `input_path` into the project.
    pub fn scan(&self, project_id: i64, input_path: &Path) -> Result<ScanSummary> {
        let project = self.get_project(project_id)?;
        let scanner = Scanner::new(self.store.clone(), &self.config);
        Ok(scanner.scan(&project, input_path)?)
    }

    /// Scans the input path the project was created with.
    pub fn scan_project(&self, project_id: i64) -> Result<ScanSummary> {
        let project = self.get_project(project_id)?;
        let scanner = Scanner::new(self.store.clone(), &self.config);
        Ok(scanner.scan(&project, &project.input_path)?)
    }

    /// A worker loop bound to this store; use it directly to hold the
    /// shutdown handle while it runs.
    pub fn worker(&self) -> WorkerLoop<&T> {
        WorkerLoop::new(self.store.clone(), &self.ocr, &self.config)
    }

    pub fn work(&self, project_id: i64, limit: usize) -> Result<WorkSummary> {
        let project = self.get_project(project_id)?;
        self.worker().work(&project, limit)
    }

    pub fn status(&self, project_id: i64) -> Result<ProjectCounts> {
        Ok(stats_repo::project_counts(&self.store, project_id)?)
    }

    /// Writes `reports/<timestamp>.report` for the project.
    pub fn report(&self, project_id: i64) -> Result<ReportArtifact> {
        let report = Report::build(&self.store, project_id)?;
        let layout = ProjectLayout::new(&report.project.root_path);
        let path = report.write(&layout)?;
        info!(
            project_id,
            path = %path.display(),
            abandoned = report.abandoned.len(),
            "Report written"
        );
        Ok(ReportArtifact { path, report })
    }
}

fn absolute(path: &Path) -> std::result::Result<PathBuf, LayoutError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| LayoutError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(cwd.join(path))
}
