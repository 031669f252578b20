//! Shared logging bootstrap for Acervo binaries.
//!
//! Writes to a size-rotated file under the app home directory and mirrors
//! to stderr. Filters come from `RUST_LOG` when set, otherwise from a
//! default that names the workspace crates.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "acervo=info,acervo_queue=info,acervo_extract=info,acervo_store=info";
const MAX_ROTATED_FILES: usize = 3;
const MAX_LOG_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// Logging options for a binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a rotating file writer plus stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let writer = RotatingWriter::create(log_dir, config.app_name)
        .context("Failed to open log file")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// App home directory: `~/.acervo`, overridable via `ACERVO_HOME`.
pub fn acervo_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("ACERVO_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".acervo")
}

/// Logs directory: `~/.acervo/logs`.
pub fn logs_dir() -> PathBuf {
    acervo_home().join("logs")
}

fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Size-based rotation: `<app>.log` is renamed to `<app>.log.1` (shifting
/// older files up to `MAX_ROTATED_FILES`) when it outgrows the cap.
struct RotatingFile {
    dir: PathBuf,
    base: String,
    file: File,
    written: u64,
}

impl RotatingFile {
    fn open(dir: PathBuf, base: String) -> io::Result<Self> {
        let path = dir.join(format!("{base}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir,
            base,
            file,
            written,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let oldest = self.rotated(MAX_ROTATED_FILES);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for idx in (1..MAX_ROTATED_FILES).rev() {
            let src = self.rotated(idx);
            if src.exists() {
                fs::rename(&src, self.rotated(idx + 1))?;
            }
        }
        let current = self.dir.join(format!("{}.log", self.base));
        if current.exists() {
            fs::rename(&current, self.rotated(1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(format!("{}.log", self.base)))?;
        self.written = 0;
        Ok(())
    }

    fn rotated(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.base, index))
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingWriter {
    fn create(dir: PathBuf, app_name: &str) -> Result<Self> {
        let base = sanitize_name(app_name);
        let file = RotatingFile::open(dir, base).context("open rotating log file")?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct RotatingWriterGuard {
    inner: Arc<Mutex<RotatingFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for RotatingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
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

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("acervo"), "acervo");
        assert_eq!(sanitize_name("a b/c"), "a_b_c");
    }

    #[test]
    fn test_rotation_shifts_files() {
        let temp = TempDir::new().unwrap();
        let mut file =
            RotatingFile::open(temp.path().to_path_buf(), "test".to_string()).unwrap();
        file.write_all(b"first generation\n").unwrap();
        file.rotate().unwrap();
        file.write_all(b"second generation\n").unwrap();

        assert!(temp.path().join("test.log").exists());
        assert!(temp.path().join("test.log.1").exists());
        let rotated = fs::read_to_string(temp.path().join("test.log.1")).unwrap();
        assert!(rotated.contains("first generation"));
    }
}
