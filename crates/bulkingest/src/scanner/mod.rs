//! Input discovery: walks an input tree, expands archives, and registers each
//! terminal file as a document with a pending job.
//!
//! A scan is idempotent. Files are identified by content fingerprint, so a
//! rescan of unchanged input registers nothing, and a file that moved or was
//! renamed is still recognized. The input tree is only ever read.

pub mod archive;
pub mod fingerprint;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::error::LayoutError;
use crate::storage::filesystem::{append_line, copy_no_clobber};
use crate::storage::ProjectLayout;
use crate::store::document_repo::{self, NewDocument};
use crate::store::project_repo::Project;
use crate::store::{archive_repo, timestamp_now, Store, StoreError};

pub use fingerprint::{fingerprint_bytes, fingerprint_file};

/// Errors that abort a scan.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Input path '{0}' does not exist")]
    InputNotFound(PathBuf),

    #[error("Failed to create staging directory: {0}")]
    Staging(#[source] std::io::Error),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A per-item problem. The item is skipped and the scan continues.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanWarning {
    #[error("unreadable file '{path}': {reason}")]
    UnreadableFile { path: String, reason: String },

    #[error("corrupt archive '{path}': {reason}")]
    CorruptArchive { path: String, reason: String },

    #[error("archive '{path}' nested {depth} levels deep exceeds the limit")]
    ArchiveTooDeep { path: String, depth: usize },
}

impl ScanWarning {
    pub fn path(&self) -> &str {
        match self {
            ScanWarning::UnreadableFile { path, .. }
            | ScanWarning::CorruptArchive { path, .. }
            | ScanWarning::ArchiveTooDeep { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Terminal files considered (archive members included).
    pub files_seen: u64,
    pub documents_created: u64,
    /// Files whose fingerprint was already registered.
    pub duplicates: u64,
    pub skipped_unsupported: u64,
    pub archives_expanded: u64,
    /// Archives recognized from an earlier scan and not expanded again.
    pub archives_skipped: u64,
    pub warnings: Vec<ScanWarning>,
}

impl ScanSummary {
    /// True when the scan registered nothing new.
    pub fn is_noop(&self) -> bool {
        self.documents_created == 0 && self.archives_expanded == 0
    }
}

/// A file waiting to be handled, on disk at `path`.
struct Item {
    path: PathBuf,
    /// Label recorded as the document's source path.
    source: String,
    /// Number of archives enclosing this item.
    depth: usize,
}

enum Work {
    File(Item),
    /// Pushed beneath an archive's members; popped once they are all handled.
    SealArchive {
        fingerprint: String,
        source: String,
        entry_count: u64,
        stage_dir: PathBuf,
        complete: bool,
    },
}

pub struct Scanner {
    store: Store,
    config: IngestConfig,
}

impl Scanner {
    pub fn new(store: Store, config: &IngestConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    /// Scans `input_path` into `project`.
    pub fn scan(&self, project: &Project, input_path: &Path) -> Result<ScanSummary, ScanError> {
        let span = info_span!("scan", project_id = project.id, input = %input_path.display());
        let _guard = span.enter();

        if !input_path.exists() {
            return Err(ScanError::InputNotFound(input_path.to_path_buf()));
        }

        let layout = ProjectLayout::new(&project.root_path);
        layout.create_dirs()?;
        let staging = tempfile::Builder::new()
            .prefix("bulkingest-stage-")
            .tempdir()
            .map_err(ScanError::Staging)?;

        let mut run = ScanRun {
            scanner: self,
            project,
            layout: &layout,
            staging: staging.path(),
            next_stage: 0,
            summary: ScanSummary::default(),
        };

        let walker = WalkDir::new(input_path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| input_path.display().to_string());
                    run.warn(ScanWarning::UnreadableFile {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            run.process(Item {
                path: entry.path().to_path_buf(),
                source: entry.path().display().to_string(),
                depth: 0,
            })?;
        }

        let summary = run.summary;
        info!(
            created = summary.documents_created,
            duplicates = summary.duplicates,
            skipped = summary.skipped_unsupported,
            archives = summary.archives_expanded,
            warnings = summary.warnings.len(),
            "Scan finished"
        );
        Ok(summary)
    }
}

/// State of one scan invocation.
struct ScanRun<'a> {
    scanner: &'a Scanner,
    project: &'a Project,
    layout: &'a ProjectLayout,
    staging: &'a Path,
    next_stage: u64,
    summary: ScanSummary,
}

impl ScanRun<'_> {
    /// Handles one walked file and, transitively, every archive member under
    /// it. Archives are explored with an explicit stack bounded by
    /// `max_archive_depth`. An archive is recorded as expanded only when no
    /// member anywhere beneath it raised a warning.
    fn process(&mut self, root: Item) -> Result<(), ScanError> {
        let mut stack = vec![Work::File(root)];

        while let Some(work) = stack.pop() {
            match work {
                Work::File(item) => {
                    let warnings_before = self.summary.warnings.len();
                    if archive::is_archive(&item.path) {
                        self.open_archive(item, &mut stack)?;
                    } else {
                        self.register(item)?;
                    }
                    if self.summary.warnings.len() > warnings_before {
                        mark_enclosing_incomplete(&mut stack);
                    }
                }
                Work::SealArchive {
                    fingerprint,
                    source,
                    entry_count,
                    stage_dir,
                    complete,
                } => {
                    if complete {
                        archive_repo::record_expansion(
                            &self.scanner.store,
                            self.project.id,
                            &fingerprint,
                            &source,
                            entry_count,
                        )?;
                    }
                    if let Err(e) = std::fs::remove_dir_all(&stage_dir) {
                        debug!(error = %e, dir = %stage_dir.display(), "Failed to clear staging");
                    }
                }
            }
        }
        Ok(())
    }

    fn open_archive(&mut self, item: Item, stack: &mut Vec<Work>) -> Result<(), ScanError> {
        let level = item.depth + 1;
        if level > self.scanner.config.max_archive_depth {
            self.warn(ScanWarning::ArchiveTooDeep {
                path: item.source,
                depth: level,
            });
            return Ok(());
        }

        let fingerprint = match fingerprint_file(&item.path) {
            Ok((fingerprint, _)) => fingerprint,
            Err(e) => {
                self.warn(ScanWarning::UnreadableFile {
                    path: item.source,
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };
        if archive_repo::is_expanded(&self.scanner.store, self.project.id, &fingerprint)? {
            debug!(archive = %item.source, "Archive already expanded");
            self.summary.archives_skipped += 1;
            return Ok(());
        }

        let span = info_span!("expand_archive", archive = %item.source, depth = level);
        let _guard = span.enter();

        self.next_stage += 1;
        let stage_dir = self.staging.join(self.next_stage.to_string());
        let expansion = match archive::expand(&item.path, &stage_dir) {
            Ok(expansion) => expansion,
            Err(archive::ArchiveError::Staging { path, source }) => {
                return Err(ScanError::Layout(LayoutError::WriteFile { path, source }));
            }
            Err(e) => {
                self.warn(ScanWarning::CorruptArchive {
                    path: item.source,
                    reason: e.to_string(),
                });
                let _ = std::fs::remove_dir_all(&stage_dir);
                return Ok(());
            }
        };

        let complete = expansion.failures.is_empty();
        for (entry, reason) in expansion.failures {
            self.warn(ScanWarning::CorruptArchive {
                path: format!("{}!/{}", item.source, entry),
                reason,
            });
        }

        self.summary.archives_expanded += 1;
        info!(entries = expansion.entries.len(), "Expanded archive");

        stack.push(Work::SealArchive {
            fingerprint,
            source: item.source.clone(),
            entry_count: expansion.entries.len() as u64,
            stage_dir,
            complete,
        });
        for entry in expansion.entries.into_iter().rev() {
            stack.push(Work::File(Item {
                path: entry.path,
                source: format!("{}!/{}", item.source, entry.name),
                depth: level,
            }));
        }
        Ok(())
    }

    /// Fingerprints a terminal file, copies it to its canonical location and
    /// registers it.
    fn register(&mut self, item: Item) -> Result<(), ScanError> {
        self.summary.files_seen += 1;

        let extension = item
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if !self.scanner.config.accepts_extension(extension.as_deref()) {
            debug!(file = %item.source, "Skipping unsupported file");
            self.summary.skipped_unsupported += 1;
            return Ok(());
        }

        let (fingerprint, size_bytes) = match fingerprint_file(&item.path) {
            Ok(result) => result,
            Err(e) => {
                self.warn(ScanWarning::UnreadableFile {
                    path: item.source,
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        if document_repo::find_by_fingerprint(&self.scanner.store, self.project.id, &fingerprint)?
            .is_some()
        {
            debug!(file = %item.source, "Already registered");
            self.summary.duplicates += 1;
            return Ok(());
        }

        let canonical_path = self
            .layout
            .original_path(&fingerprint, extension.as_deref());
        if !self.copy_original(&item, &canonical_path)? {
            return Ok(());
        }

        let mime_type = mime_guess::from_path(&item.path)
            .first()
            .map(|m| m.essence_str().to_string());

        let outcome = document_repo::upsert_document_and_job(
            &self.scanner.store,
            &NewDocument {
                project_id: self.project.id,
                source_path: item.source.clone(),
                canonical_path,
                content_fingerprint: fingerprint,
                size_bytes,
                file_extension: extension,
                mime_type,
            },
        )?;

        if outcome.created {
            debug!(
                file = %item.source,
                document_id = outcome.document_id,
                job_id = outcome.job_id,
                "Registered document"
            );
            self.summary.documents_created += 1;
        } else {
            self.summary.duplicates += 1;
        }
        Ok(())
    }

    /// Copies the item into `originals/`. A source that can no longer be read
    /// is a warning and returns false; destination failures abort the scan.
    fn copy_original(&mut self, item: &Item, canonical_path: &Path) -> Result<bool, ScanError> {
        match copy_no_clobber(&item.path, canonical_path) {
            Ok(_) => Ok(true),
            Err(LayoutError::ReadSource { source, .. }) => {
                self.warn(ScanWarning::UnreadableFile {
                    path: item.source.clone(),
                    reason: source.to_string(),
                });
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn warn(&mut self, warning: ScanWarning) {
        warn!(project_id = self.project.id, "{}", warning);
        let line = format!("{} WARN {}", timestamp_now(), warning);
        if let Err(e) = append_line(&self.layout.scan_log(), &line) {
            warn!(error = %e, "Failed to append to scan log");
        }
        self.summary.warnings.push(warning);
    }
}

/// Every seal still on the stack belongs to an archive enclosing the item
/// just handled.
fn mark_enclosing_incomplete(stack: &mut [Work]) {
    for work in stack.iter_mut() {
        if let Work::SealArchive { complete, .. } = work {
            *complete = false;
        }
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
