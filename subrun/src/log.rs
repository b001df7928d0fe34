//! Run transcript.
//!
//! `RunLog` is the append-only record of a run: every command the pipeline
//! executes (echoed as `+ program args`, like a shell in trace mode), the
//! combined output of that command, and `WARNING:` / `ERROR:` markers. Each
//! record goes to the working log file and, unless disabled, to stdout.
//! Operational diagnostics stay on `tracing`.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::command::CommandSpec;

#[derive(Debug)]
struct LogInner {
    file: File,
    echo: bool,
}

/// Shared handle to the run transcript. Cloning shares the same file.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    inner: Arc<Mutex<LogInner>>,
}

impl RunLog {
    /// Create (or truncate) the log file at `path`, creating parent
    /// directories as needed.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: Arc::new(Mutex::new(LogInner { file, echo: true })),
        })
    }

    /// Toggle echoing records to stdout.
    pub fn with_echo(self, echo: bool) -> Self {
        self.lock().echo = echo;
        self
    }

    /// Location of the working log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Trace line for a command about to run.
    pub fn command(&self, spec: &CommandSpec) {
        self.record(&format!("+ {spec}"));
    }

    /// One line of child process output.
    pub fn output(&self, line: &str) {
        self.record(line);
    }

    /// Plain transcript line.
    pub fn info(&self, message: &str) {
        self.record(message);
    }

    /// `WARNING:` line.
    pub fn warning(&self, message: &str) {
        self.record(&format!("WARNING: {message}"));
    }

    /// `ERROR:` line.
    pub fn error(&self, message: &str) {
        self.record(&format!("ERROR: {message}"));
    }

    /// Flush buffered records to disk.
    pub fn flush(&self) -> io::Result<()> {
        let mut inner = self.lock();
        inner.file.flush()?;
        inner.file.sync_data()
    }

    /// Flush, then copy the working log to `dest`. Returns bytes copied.
    pub fn mirror_to(&self, dest: &Path) -> io::Result<u64> {
        self.flush()?;
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.path, dest)
    }

    fn record(&self, line: &str) {
        let mut inner = self.lock();
        if inner.echo {
            println!("{line}");
        }
        if let Err(err) = writeln!(inner.file, "{line}") {
            tracing::error!(
                log_file = %self.path.display(),
                error = %err,
                "failed to append to run log"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
