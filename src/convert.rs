//! Format Conversion Adapters
//!
//! - Flattening strips the `fields`/`items` wrappers for spreadsheet
//!   substitution.
//! - Fixed-layout conversion drives a headless browser over an HTML
//!   intermediate. The browser process and its scratch directory are released
//!   on every exit path.

use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::BrowserConfig;
use crate::engine::EngineError;
use crate::print::PrintSpec;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long to wait for a killed browser to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Trailing bytes of browser stderr kept for error reports.
const MAX_LOG_TAIL: usize = 2048;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {status}: {stderr}")]
    ProcessFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{program} exited without producing output")]
    MissingOutput { program: String },

    #[error("Conversion I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Spreadsheet substitution failed: {0}")]
    Spreadsheet(#[source] EngineError),

    #[error("Markup extraction failed: {0}")]
    Markup(#[source] EngineError),
}

// --- Flattening ---

/// Replace `{"items": [...]}` with the bare array and `{"fields": {...}}`
/// with the inner map, recursively.
pub fn flatten_for_substitution(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(flatten_for_substitution).collect()),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("items") {
                return Value::Array(items.iter().map(flatten_for_substitution).collect());
            }
            if let Some(fields @ Value::Object(_)) = map.get("fields") {
                return flatten_for_substitution(fields);
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), flatten_for_substitution(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        other => other.clone(),
    }
}

// --- Collaborator seams ---

/// Turns a rendered word-processing document into HTML.
pub trait MarkupExtractor: Send + Sync {
    fn to_html(&self, document: &[u8]) -> Result<String, EngineError>;
}

/// Substitutes flattened data into one sheet of a spreadsheet template.
pub trait SpreadsheetEngine: Send + Sync {
    /// `sheet` is 1-based.
    fn substitute(&self, template: &[u8], sheet: usize, data: &Value) -> Result<Vec<u8>, EngineError>;
}

// --- Fixed-layout conversion ---

/// Owns the browser's process group. Dropping the guard kills every process
/// in the group and reaps the leader.
struct ChildGuard {
    child: Child,
}

impl ChildGuard {
    fn spawn(command: &mut Command) -> io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command.spawn().map(|child| Self { child })
    }

    /// Helpers started by the browser share its group and are killed with it.
    fn kill_group(&mut self) {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            #[allow(clippy::cast_possible_wrap)]
            let group = Pid::from_raw(self.child.id() as i32);
            match killpg(group, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(errno) => warn!(pid = self.child.id(), %errno, "failed to kill browser process group"),
            }
        }
        let _ = self.child.kill();
    }

    fn wait_until(&mut self, deadline: Instant) -> io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let exited = matches!(self.child.try_wait(), Ok(Some(_)));
        self.kill_group();
        if exited {
            return;
        }

        let deadline = Instant::now() + REAP_TIMEOUT;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) | Err(_) => return,
                Ok(None) if Instant::now() >= deadline => {
                    warn!(pid = self.child.id(), "browser process not reaped after kill");
                    return;
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }
}

/// Prints HTML to PDF with a headless Chromium-compatible browser.
#[derive(Debug, Clone)]
pub struct FixedLayoutConverter {
    browser: BrowserConfig,
    print: PrintSpec,
    scratch_root: Option<PathBuf>,
}

impl FixedLayoutConverter {
    pub fn new(browser: BrowserConfig, print: PrintSpec) -> Self {
        Self {
            browser,
            print,
            scratch_root: None,
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// The full page handed to the browser.
    pub fn wrap_html(&self, body: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n{}\
             body {{ font-family: Arial, sans-serif; margin: 40px; }}\n\
             img {{ max-width: 100%; }}\n</style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
            self.print.page_css(),
            body
        )
    }

    pub fn convert(&self, html: &str) -> Result<Vec<u8>, ConvertError> {
        let program = self.browser.program.clone();
        let mut builder = tempfile::Builder::new();
        builder.prefix("docforge-");
        let workdir = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let input = workdir.path().join("document.html");
        let output = workdir.path().join("document.pdf");
        let log_path = workdir.path().join("browser.log");
        fs::write(&input, self.wrap_html(html))?;
        let log = File::create(&log_path)?;
        let input_url = file_url(&input)?;

        let mut command = Command::new(&program);
        command
            .args(&self.browser.extra_args)
            .args(["--headless", "--disable-gpu", "--no-sandbox", "--no-pdf-header-footer"])
            .arg(format!("--print-to-pdf={}", output.display()))
            .arg(input_url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));

        debug!(%program, workdir = %workdir.path().display(), "starting fixed-layout conversion");
        let mut guard = ChildGuard::spawn(&mut command).map_err(|source| ConvertError::Spawn {
            program: program.clone(),
            source,
        })?;

        let timeout = self.browser.timeout();
        let Some(status) = guard.wait_until(Instant::now() + timeout)? else {
            warn!(%program, ?timeout, "conversion timed out, killing browser");
            return Err(ConvertError::Timeout { program, timeout });
        };

        if !status.success() {
            return Err(ConvertError::ProcessFailed {
                program,
                status,
                stderr: log_tail(&log_path),
            });
        }

        match fs::read(&output) {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            Ok(_) => Err(ConvertError::MissingOutput { program }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ConvertError::MissingOutput { program }),
            Err(e) => Err(e.into()),
        }
    }
}

fn file_url(path: &Path) -> io::Result<Url> {
    let absolute = fs::canonicalize(path)?;
    Url::from_file_path(&absolute).map_err(|()| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot express {} as a file URL", absolute.display()),
        )
    })
}

fn log_tail(path: &Path) -> String {
    let Ok(bytes) = fs::read(path) else {
        return String::new();
    };
    let start = bytes.len().saturating_sub(MAX_LOG_TAIL);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}
