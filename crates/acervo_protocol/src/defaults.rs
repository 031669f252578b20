//! Shared constants used across the workspace.

/// Upload extensions accepted at the API boundary.
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "webp"];

/// Default upload size cap (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Provider error messages are trimmed to this many characters before they
/// are surfaced to users.
pub const MAX_PROVIDER_MESSAGE_LEN: usize = 500;

/// Confidence floor a native text layer must reach to be treated as present.
pub const MIN_CONFIDENCE_NATIVE: f64 = 0.98;
