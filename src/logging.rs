//! Console and file logging for the `mailkit` binary.
//!
//! A [`LogSession`] installs a `tracing-subscriber` registry as the default
//! subscriber for as long as it lives: a colorized console layer plus, unless
//! disabled, a plain-text layer writing to a file named after the start time
//! (`<log-dir>/%Y-%m-%d-%H-%M-%S.log`).

use chrono::Local;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "mailkit=info";

/// Default directory for log files.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// An installed logging setup. Dropping it uninstalls the subscriber.
#[derive(Debug)]
pub struct LogSession {
    file: Option<PathBuf>,
    _guard: DefaultGuard,
}

impl LogSession {
    /// Logs to the console only.
    #[must_use]
    pub fn console() -> Self {
        let guard = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_target(true))
            .set_default();
        Self {
            file: None,
            _guard: guard,
        }
    }

    /// Logs to the console and to a new timestamped file in `log_dir`,
    /// creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Fails if the directory or the file cannot be created.
    pub fn with_file(log_dir: impl AsRef<Path>) -> io::Result<Self> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{}.log", Local::now().format("%Y-%m-%d-%H-%M-%S")));
        let file = Arc::new(File::create(&path)?);

        let guard = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_target(true))
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(file),
            )
            .set_default();

        Ok(Self {
            file: Some(path),
            _guard: guard,
        })
    }

    /// Path of the log file, if file logging is on.
    #[must_use]
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
