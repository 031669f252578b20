//! Flat pipeline configuration.
//!
//! Read from `config.toml`; every field is typed at load time and has a
//! default, so a missing file yields a fully usable configuration. Provider
//! API keys are never stored in the file; they come from the environment
//! (`ACERVO_CLOUD_OCR_KEY`, `ACERVO_VISION_KEY`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Error type for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Worker parallelism
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Poll interval between empty queue claims, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Attempts per job before it stays failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Mean page confidence required to stop at the local OCR tier
    #[serde(default = "default_min_confidence_local")]
    pub min_confidence_local: f64,

    /// Mean page confidence required to stop at the cloud OCR tier
    #[serde(default = "default_min_confidence_cloud")]
    pub min_confidence_cloud: f64,

    /// Image preprocessing (deskew, contrast, denoise) before local OCR
    #[serde(default = "default_true")]
    pub enable_preprocessing: bool,

    /// Allow escalation to the cloud OCR tier
    #[serde(default = "default_true")]
    pub enable_cloud_ocr: bool,

    /// Allow escalation to the vision AI tier
    #[serde(default = "default_true")]
    pub enable_vision: bool,

    /// Minimum keyword similarity for a service to qualify for a requirement
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,

    /// Minimum shared keywords between requirement and service
    #[serde(default = "default_min_common_words")]
    pub min_common_words: usize,

    /// Relaxed keyword minimum for requirements with tiny keyword sets
    #[serde(default = "default_min_common_words_short")]
    pub min_common_words_short: usize,

    /// Upload size cap in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Directory uploads are copied into
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Cloud OCR endpoint; the tier is skipped when unset
    #[serde(default)]
    pub cloud_ocr_endpoint: Option<String>,

    /// Vision/LLM endpoint; structured extraction falls back to tables-only
    /// merging when unset
    #[serde(default)]
    pub vision_endpoint: Option<String>,

    /// Vision/LLM model identifier
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
}

fn default_max_concurrent() -> usize {
    3
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_attempts() -> i32 {
    3
}
fn default_min_confidence_local() -> f64 {
    0.70
}
fn default_min_confidence_cloud() -> f64 {
    0.85
}
fn default_true() -> bool {
    true
}
fn default_min_similarity() -> f64 {
    0.35
}
fn default_min_common_words() -> usize {
    2
}
fn default_min_common_words_short() -> usize {
    1
}
fn default_max_upload_bytes() -> u64 {
    crate::defaults::DEFAULT_MAX_UPLOAD_BYTES
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_vision_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // serde fills every field from its default fn
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load configuration from a file, defaulting when the file is absent.
pub fn load_config(config_path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !config_path.exists() {
        return Ok(PipelineConfig::default());
    }

    let content = std::fs::read_to_string(config_path)?;
    let config: PipelineConfig = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_attempts, 3);
        assert!((config.min_confidence_local - 0.70).abs() < f64::EPSILON);
        assert!((config.min_confidence_cloud - 0.85).abs() < f64::EPSILON);
        assert!(config.enable_preprocessing);
        assert!(config.enable_cloud_ocr);
        assert!(config.enable_vision);
        assert!((config.min_similarity - 0.35).abs() < f64::EPSILON);
        assert_eq!(config.min_common_words, 2);
        assert_eq!(config.min_common_words_short, 1);
        assert_eq!(config.max_upload_bytes, 10_485_760);
        assert!(config.cloud_ocr_endpoint.is_none());
    }

    #[test]
    fn test_nonexistent_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join("missing.toml")).unwrap();
        assert_eq!(config.max_concurrent, 3);
    }

    #[test]
    fn test_partial_file_overrides() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            max_concurrent = 8
            min_similarity = 0.5
            enable_vision = false
            upload_dir = "/var/acervo/uploads"
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.max_concurrent, 8);
        assert!((config.min_similarity - 0.5).abs() < f64::EPSILON);
        assert!(!config.enable_vision);
        assert_eq!(config.upload_dir, PathBuf::from("/var/acervo/uploads"));
        // untouched fields keep defaults
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "max_werkers = 5\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
