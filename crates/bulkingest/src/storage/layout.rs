//! Canonical on-disk layout of a project.
//!
//! ```text
//! <data_root>/projects/<project_id>/originals/<fingerprint>.<ext>
//! <data_root>/projects/<project_id>/ocr/<document_id>.json|.txt
//! <data_root>/projects/<project_id>/logs/
//! <data_root>/projects/<project_id>/reports/<timestamp>.report
//! ```

use std::path::{Path, PathBuf};

use super::filesystem::ensure_directory;
use crate::error::LayoutError;

pub const ORIGINALS_DIR: &str = "originals";
pub const OCR_DIR: &str = "ocr";
pub const LOGS_DIR: &str = "logs";
pub const REPORTS_DIR: &str = "reports";
pub const SCAN_LOG: &str = "scan.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn originals_dir(&self) -> PathBuf {
        self.root.join(ORIGINALS_DIR)
    }

    pub fn ocr_dir(&self) -> PathBuf {
        self.root.join(OCR_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join(REPORTS_DIR)
    }

    pub fn scan_log(&self) -> PathBuf {
        self.logs_dir().join(SCAN_LOG)
    }

    /// Creates the four project subdirectories. Idempotent.
    pub fn create_dirs(&self) -> Result<(), LayoutError> {
        for dir in [
            self.originals_dir(),
            self.ocr_dir(),
            self.logs_dir(),
            self.reports_dir(),
        ] {
            ensure_directory(&dir)?;
        }
        Ok(())
    }

    /// `originals/<fingerprint>.<ext>`, or just the fingerprint when the
    /// source had no extension.
    pub fn original_path(&self, fingerprint: &str, extension: Option<&str>) -> PathBuf {
        match extension {
            Some(ext) if !ext.is_empty() => {
                self.originals_dir().join(format!("{}.{}", fingerprint, ext))
            }
            _ => self.originals_dir().join(fingerprint),
        }
    }

    pub fn ocr_json_path(&self, document_id: i64) -> PathBuf {
        self.ocr_dir().join(format!("{}.json", document_id))
    }

    pub fn ocr_text_path(&self, document_id: i64) -> PathBuf {
        self.ocr_dir().join(format!("{}.txt", document_id))
    }
}

/// One row of the folder-structure explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub path: String,
    pub description: &'static str,
}

pub fn folder_structure_table(data_root: &Path) -> Vec<FolderEntry> {
    let root = data_root.display();
    let rows = [
        (format!("{}/projects/", root), "Root for all projects"),
        (
            format!("{}/projects/<project_id>/", root),
            "Root for a specific project",
        ),
        (
            format!("<project_root>/{}/", ORIGINALS_DIR),
            "Canonical copies of original input files",
        ),
        (
            format!("<project_root>/{}/", OCR_DIR),
            "OCR output files (JSON/TXT)",
        ),
        (
            format!("<project_root>/{}/", LOGS_DIR),
            "Logs related to ingest / processing",
        ),
        (
            format!("<project_root>/{}/", REPORTS_DIR),
            "Generated summary/report files",
        ),
    ];
    rows.into_iter()
        .map(|(path, description)| FolderEntry { path, description })
        .collect()
}

/// Renders the folder-structure table as aligned plain text.
pub fn render_folder_structure_table(data_root: &Path) -> String {
    let rows = folder_structure_table(data_root);
    let width = rows
        .iter()
        .map(|row| row.path.len())
        .max()
        .unwrap_or(0)
        .max("Path pattern".len());

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!("{:<width$} | Description", "Path pattern"));
    lines.push(format!("{}-|-{}", "-".repeat(width), "-".repeat(42)));
    for row in &rows {
        lines.push(format!("{:<width$} | {}", row.path, row.description));
    }
    lines.join("\n")
}
