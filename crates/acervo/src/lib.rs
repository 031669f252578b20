//! Acervo: attestation extraction pipeline and tender matcher.
//!
//! Library surface of the binary: upload validation and system wiring,
//! reused by the CLI and by integration tests.

pub mod upload;
pub mod wiring;

pub use upload::{validate_and_stage_upload, UploadError};
pub use wiring::{build_cascade, open_store};
