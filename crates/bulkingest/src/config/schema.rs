use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Processing attempts before a job is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,
    /// Jobs leased per store round-trip by the worker loop.
    #[serde(default = "default_lease_batch_size")]
    pub lease_batch_size: usize,
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
    #[serde(default = "default_max_archive_depth")]
    pub max_archive_depth: usize,
    /// Lowercase extensions without the dot. Empty accepts every file.
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
    #[serde(default = "default_busy_backoff_ms")]
    pub busy_backoff_ms: u64,
    #[serde(default)]
    pub ocr: OcrConfig,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("bulkingest.db")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_lease_duration_secs() -> u64 {
    600
}

fn default_lease_batch_size() -> usize {
    1
}

fn default_retry_base_delay_secs() -> u64 {
    30
}

fn default_retry_max_delay_secs() -> u64 {
    3600
}

fn default_max_archive_depth() -> usize {
    4
}

fn default_supported_extensions() -> Vec<String> {
    ["pdf", "tif", "tiff", "jpg", "jpeg", "png"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_busy_retries() -> u32 {
    5
}

fn default_busy_backoff_ms() -> u64 {
    50
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            database_path: default_database_path(),
            max_attempts: default_max_attempts(),
            lease_duration_secs: default_lease_duration_secs(),
            lease_batch_size: default_lease_batch_size(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            max_archive_depth: default_max_archive_depth(),
            supported_extensions: default_supported_extensions(),
            busy_retries: default_busy_retries(),
            busy_backoff_ms: default_busy_backoff_ms(),
            ocr: OcrConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
        }
    }

    /// Case-insensitive check against `supported_extensions`.
    pub fn accepts_extension(&self, extension: Option<&str>) -> bool {
        if self.supported_extensions.is_empty() {
            return true;
        }
        match extension {
            Some(ext) => self
                .supported_extensions
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_tesseract_command")]
    pub tesseract_command: String,
    #[serde(default = "default_pdftoppm_command")]
    pub pdftoppm_command: String,
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

fn default_tesseract_command() -> String {
    "tesseract".to_string()
}

fn default_pdftoppm_command() -> String {
    "pdftoppm".to_string()
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            dpi: default_dpi(),
            tesseract_command: default_tesseract_command(),
            pdftoppm_command: default_pdftoppm_command(),
        }
    }
}

/// Bounded retry with exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempt_count` failures.
    pub fn delay_after(&self, attempt_count: u32) -> Duration {
        if attempt_count == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt_count - 1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        IngestConfig::default().retry_policy()
    }
}
