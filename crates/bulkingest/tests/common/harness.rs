//! Test harness for isolated test execution.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use bulkingest::{Ingest, IngestConfig, OcrTransform, Project, Store};

/// An isolated environment: a temp dir holding `input/`, `data/` and the
/// SQLite store.
pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub data_root: PathBuf,
    pub db_path: PathBuf,
    pub config: IngestConfig,
}

impl TestHarness {
    /// Default configuration with retry backoff disabled, so a failed job is
    /// eligible again immediately.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut IngestConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let input_dir = base.join("input");
        let data_root = base.join("data");
        let db_path = base.join("bulkingest.db");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");

        let mut config = IngestConfig {
            data_root: data_root.clone(),
            database_path: db_path.clone(),
            retry_base_delay_secs: 0,
            retry_max_delay_secs: 0,
            ..IngestConfig::default()
        };
        customize(&mut config);

        Self {
            temp_dir,
            input_dir,
            data_root,
            db_path,
            config,
        }
    }

    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn ingest<T: OcrTransform>(&self, ocr: T) -> Ingest<T> {
        Ingest::with_transform(self.config.clone(), ocr).expect("Failed to open ingest")
    }

    /// A second, independent store handle on the same database file, as a
    /// separate process would open it.
    pub fn open_store(&self) -> Store {
        Store::open(&self.db_path).expect("Failed to open store")
    }

    /// Creates a project over `input/`.
    pub fn create_project<T: OcrTransform>(&self, ingest: &Ingest<T>) -> Project {
        ingest
            .create_project("scans", &self.input_dir)
            .expect("Failed to create project")
    }

    /// Writes a file under `input/`, creating parent directories.
    pub fn write_input(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.input_dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    /// Every file under `input/` with its bytes, sorted by path.
    pub fn snapshot_input(&self) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files: Vec<(PathBuf, Vec<u8>)> = walkdir::WalkDir::new(&self.input_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let bytes = std::fs::read(e.path()).expect("Failed to read input file");
                (e.path().to_path_buf(), bytes)
            })
            .collect();
        files.sort();
        files
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
