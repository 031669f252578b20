//! Upload validation and staging.
//!
//! Bad inputs are rejected here, before a job is ever enqueued. Accepted
//! files are copied into the upload directory under a collision-free name;
//! the original file is left where it was.

use std::path::{Path, PathBuf};

use acervo_protocol::defaults::ALLOWED_EXTENSIONS;
use acervo_protocol::PipelineConfig;
use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported file type .{extension}; accepted: pdf, png, jpg, jpeg, webp")]
    UnsupportedType { extension: String },

    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate an upload and copy it into the configured upload directory.
/// Returns the staged path.
pub fn validate_and_stage_upload(
    source: &Path,
    config: &PipelineConfig,
) -> Result<PathBuf, UploadError> {
    if !source.exists() {
        return Err(UploadError::NotFound(source.to_path_buf()));
    }

    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(UploadError::UnsupportedType { extension });
    }

    let size = std::fs::metadata(source)?.len();
    if size > config.max_upload_bytes {
        return Err(UploadError::TooLarge {
            size,
            limit: config.max_upload_bytes,
        });
    }

    std::fs::create_dir_all(&config.upload_dir)?;
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");
    let staged = config.upload_dir.join(format!(
        "{}_{}.{}",
        Utc::now().format("%Y%m%d%H%M%S%f"),
        sanitize(stem),
        extension
    ));
    std::fs::copy(source, &staged)?;
    Ok(staged)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(upload_dir: &Path, max_bytes: u64) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.upload_dir = upload_dir.to_path_buf();
        config.max_upload_bytes = max_bytes;
        config
    }

    #[test]
    fn test_accepts_and_stages_pdf() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("atestado.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();
        let uploads = temp.path().join("uploads");

        let staged = validate_and_stage_upload(&source, &config(&uploads, 1024)).unwrap();
        assert!(staged.exists());
        assert!(staged.starts_with(&uploads));
        assert_eq!(staged.extension().unwrap(), "pdf");
        // original untouched
        assert!(source.exists());
    }

    #[test]
    fn test_rejects_wrong_type() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("notes.docx");
        std::fs::write(&source, b"zip").unwrap();

        let err =
            validate_and_stage_upload(&source, &config(temp.path(), 1024)).unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedType { .. }));
    }

    #[test]
    fn test_rejects_oversize() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("big.pdf");
        std::fs::write(&source, vec![0u8; 2048]).unwrap();

        let err = validate_and_stage_upload(&source, &config(temp.path(), 1024)).unwrap_err();
        assert!(matches!(
            err,
            UploadError::TooLarge { size: 2048, limit: 1024 }
        ));
    }

    #[test]
    fn test_rejects_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = validate_and_stage_upload(
            &temp.path().join("nao-existe.pdf"),
            &config(temp.path(), 1024),
        )
        .unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }
}
