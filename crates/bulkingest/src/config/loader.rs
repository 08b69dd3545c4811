use std::path::Path;

use crate::config::schema::IngestConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngestConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<IngestConfig, ConfigError> {
    let mut config: IngestConfig = serde_json::from_str(content)?;

    config.supported_extensions = config
        .supported_extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .collect();

    validate_config(&config)?;

    Ok(config)
}

pub(crate) fn validate_config(config: &IngestConfig) -> Result<(), ConfigError> {
    if config.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "max_attempts must be at least 1".to_string(),
        });
    }

    if config.lease_duration_secs == 0 {
        return Err(ConfigError::Validation {
            message: "lease_duration_secs must be at least 1".to_string(),
        });
    }

    if config.lease_batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "lease_batch_size must be at least 1".to_string(),
        });
    }

    if config.retry_max_delay_secs < config.retry_base_delay_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "retry_max_delay_secs ({}) must not be below retry_base_delay_secs ({})",
                config.retry_max_delay_secs, config.retry_base_delay_secs
            ),
        });
    }

    if config.max_archive_depth == 0 {
        return Err(ConfigError::Validation {
            message: "max_archive_depth must be at least 1".to_string(),
        });
    }

    if let Some(ext) = config.supported_extensions.iter().find(|e| e.is_empty()) {
        return Err(ConfigError::Validation {
            message: format!("Invalid supported extension: '{}'", ext),
        });
    }

    if config.ocr.dpi == 0 {
        return Err(ConfigError::Validation {
            message: "ocr.dpi must be positive".to_string(),
        });
    }

    Ok(())
}
