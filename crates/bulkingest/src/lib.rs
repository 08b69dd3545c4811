pub mod config;
pub mod error;
pub mod ingest;
pub mod processor;
pub mod report;
pub mod scanner;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use config::{load_config, load_config_from_str, IngestConfig, OcrConfig, RetryPolicy};
pub use error::{ConfigError, IngestError, LayoutError, ProcessError, Result};
pub use ingest::{Ingest, ReportArtifact};
pub use processor::{CommandOcr, OcrOutput, OcrTransform};
pub use report::Report;
pub use scanner::{ScanError, ScanSummary, ScanWarning, Scanner};
pub use storage::{folder_structure_table, render_folder_structure_table, ProjectLayout};
pub use store::job_repo::{Job, JobState};
pub use store::project_repo::{Project, ProjectStatus};
pub use store::stats_repo::ProjectCounts;
pub use store::{Store, StoreError};
pub use worker::{WorkSummary, WorkerLoop};
