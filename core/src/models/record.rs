//! Record data model.
//!
//! A `Record` carries everything known about one logging call: where it was
//! made, when, at which level, on which thread and process, the message, the
//! contextual `extra` fields and an optional attached error.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Level of a record: name, severity number and icon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordLevel {
    /// Level name.
    pub name: String,
    /// Severity number.
    pub no: u32,
    /// Level icon.
    pub icon: String,
}

impl fmt::Display for RecordLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Source file of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFile {
    /// File name without directories.
    pub name: String,
    /// Path as seen by the compiler.
    pub path: String,
}

impl RecordFile {
    /// Builds the file descriptor from a source path.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let name = Path::new(path)
            .file_name()
            .map_or_else(|| path.to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            name,
            path: path.to_string(),
        }
    }
}

impl fmt::Display for RecordFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Thread a record was emitted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordThread {
    /// Process-unique thread number, assigned on first use.
    pub id: u64,
    /// Thread name, `<unnamed>` for anonymous threads.
    pub name: String,
}

impl RecordThread {
    /// Describes the calling thread.
    #[must_use]
    pub fn current() -> Self {
        let thread = std::thread::current();
        Self {
            id: THREAD_ID.with(|id| *id),
            name: thread.name().unwrap_or("<unnamed>").to_string(),
        }
    }
}

impl fmt::Display for RecordThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Process a record was emitted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordProcess {
    /// Operating system process id.
    pub id: u32,
    /// Executable name.
    pub name: String,
}

impl RecordProcess {
    /// Describes the current process.
    #[must_use]
    pub fn current() -> Self {
        static NAME: OnceLock<String> = OnceLock::new();
        let name = NAME.get_or_init(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "main".to_string())
        });
        Self {
            id: std::process::id(),
            name: name.clone(),
        }
    }
}

impl fmt::Display for RecordProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// An error attached to a record.
///
/// Errors are captured eagerly into text so the record stays `Clone + Send`.
///
/// # Example
///
/// ```
/// use logbook::models::RecordException;
///
/// let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
/// let exception = RecordException::new(&err);
/// assert_eq!(exception.type_name, "Error");
/// assert_eq!(exception.value, "disk full");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordException {
    /// Short type name of the error (`"panic"` for panics).
    pub type_name: String,
    /// Display text of the error.
    pub value: String,
    /// Display text of each error in the `source()` chain.
    pub chain: Vec<String>,
    /// Captured backtrace, when backtraces are enabled for the process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl RecordException {
    /// Captures an error and its source chain.
    #[must_use]
    pub fn new<E: Error + ?Sized>(error: &E) -> Self {
        let mut exception = Self::from_dyn(error);
        exception.type_name = short_type_name(std::any::type_name::<E>());
        exception
    }

    /// Captures a type-erased error; the type name falls back to `"Error"`.
    #[must_use]
    pub fn from_dyn<E: Error + ?Sized>(error: &E) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            type_name: "Error".to_string(),
            value: error.to_string(),
            chain,
            backtrace: capture_backtrace(),
        }
    }

    /// Captures a panic payload as returned by `std::panic::catch_unwind`.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let value = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self {
            type_name: "panic".to_string(),
            value,
            chain: Vec::new(),
            backtrace: capture_backtrace(),
        }
    }

    /// Renders the error, its causes and optionally the backtrace.
    #[must_use]
    pub fn render(&self, with_backtrace: bool) -> String {
        let mut out = format!("{}: {}", self.type_name, self.value);
        for cause in &self.chain {
            out.push_str("\nCaused by: ");
            out.push_str(cause);
        }
        if with_backtrace {
            if let Some(backtrace) = &self.backtrace {
                out.push_str("\nStack backtrace:\n");
                out.push_str(backtrace.trim_end());
            }
        }
        out
    }
}

impl fmt::Display for RecordException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

fn capture_backtrace() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Where a logging call was made.
///
/// Built by the logging macros through [`callsite!`](crate::callsite); direct
/// method calls only know the file and line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Callsite {
    /// Module path (`module_path!()`), if known.
    pub module_path: Option<&'static str>,
    /// Source file (`file!()`).
    pub file: &'static str,
    /// Source line.
    pub line: u32,
    /// Enclosing function name, if known.
    pub function: Option<&'static str>,
}

impl Callsite {
    /// Captures the caller location through `#[track_caller]`.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        let location = std::panic::Location::caller();
        Self {
            module_path: None,
            file: location.file(),
            line: location.line(),
            function: None,
        }
    }
}

/// One logging event.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    /// Time elapsed since the logger was created.
    pub elapsed: Duration,
    /// Error attached to the record.
    pub exception: Option<RecordException>,
    /// Contextual key-value pairs.
    pub extra: Map<String, Value>,
    /// Source file.
    pub file: RecordFile,
    /// Enclosing function, `<unknown>` when not captured.
    pub function: String,
    /// Severity level.
    pub level: RecordLevel,
    /// Source line.
    pub line: u32,
    /// Formatted message.
    pub message: String,
    /// File stem of the source file.
    pub module: String,
    /// Module path of the call site, if known.
    pub name: Option<String>,
    /// Emitting process.
    pub process: RecordProcess,
    /// Emitting thread.
    pub thread: RecordThread,
    /// Local time of the call.
    pub time: DateTime<Local>,
}

impl Record {
    /// Builds a record for `callsite` with the current time, thread and process.
    #[must_use]
    pub fn new(
        callsite: &Callsite,
        level: RecordLevel,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        let file = RecordFile::from_path(callsite.file);
        let module = Path::new(callsite.file)
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
        Self {
            elapsed,
            exception: None,
            extra: Map::new(),
            file,
            function: callsite.function.unwrap_or("<unknown>").to_string(),
            level,
            line: callsite.line,
            message: message.into(),
            module,
            name: callsite.module_path.map(str::to_string),
            process: RecordProcess::current(),
            thread: RecordThread::current(),
            time: Local::now(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{level: {}, name: {:?}, function: {}, line: {}, message: {:?}, extra: {}}}",
            self.level,
            self.name,
            self.function,
            self.line,
            self.message,
            Value::Object(self.extra.clone())
        )
    }
}

/// A formatted record as handed to a sink.
#[derive(Debug, Clone)]
pub struct Message {
    /// Text produced by the handler's format.
    pub text: String,
    /// Record the text was formatted from.
    pub record: Record,
}

impl Message {
    /// Returns the formatted text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
