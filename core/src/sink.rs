//! Sink trait and built-in implementations.
//!
//! A sink receives each formatted [`Message`] accepted by its handler. The
//! handler serializes calls, so implementations only need `Send`.

use crate::models::{Message, Record};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Destination of formatted log messages.
pub trait Sink: Send {
    /// Writes one formatted message.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the handler either reports it or
    /// propagates it depending on its `catch` option.
    fn write(&mut self, message: &Message) -> io::Result<()>;

    /// Flushes buffered output. Called by `Logger::complete`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Releases resources. Called once when the handler is removed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn stop(&mut self) -> io::Result<()> {
        self.flush()
    }

    /// Whether the sink writes to a terminal, used to decide colorization.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Short human-readable description.
    fn describe(&self) -> String;
}

// ============================================================================
// Streams
// ============================================================================

/// Writes to stderr, stdout or any `Write` implementation.
pub struct StreamSink {
    writer: Box<dyn Write + Send>,
    name: String,
    terminal: bool,
}

impl StreamSink {
    /// Sink writing to the process stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            terminal: io::stderr().is_terminal(),
            writer: Box::new(io::stderr()),
            name: "<stderr>".to_string(),
        }
    }

    /// Sink writing to the process stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self {
            terminal: io::stdout().is_terminal(),
            writer: Box::new(io::stdout()),
            name: "<stdout>".to_string(),
        }
    }

    /// Sink writing to an arbitrary writer, never treated as a terminal.
    #[must_use]
    pub fn new(writer: impl Write + Send + 'static, name: impl Into<String>) -> Self {
        Self {
            writer: Box::new(writer),
            name: name.into(),
            terminal: false,
        }
    }
}

impl Sink for StreamSink {
    fn write(&mut self, message: &Message) -> io::Result<()> {
        self.writer.write_all(message.text.as_bytes())?;
        self.writer.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("name", &self.name)
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Files
// ============================================================================

/// Appends to a file, creating it and its parent directories.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    /// Opens `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory or the file cannot be created.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with(path, true)
    }

    /// Opens `path`, truncating it first when `append` is false.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory or the file cannot be created.
    pub fn open_with(path: impl AsRef<Path>, append: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other(format!("file sink '{}' is closed", self.path.display())))
    }
}

impl Sink for FileSink {
    fn write(&mut self, message: &Message) -> io::Result<()> {
        self.file()?.write_all(message.text.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    fn stop(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("'{}'", self.path.display())
    }
}

// ============================================================================
// Closures
// ============================================================================

/// Calls a closure with every message.
pub struct CallableSink<F> {
    callback: F,
}

impl<F> CallableSink<F>
where
    F: FnMut(&Message) -> io::Result<()> + Send,
{
    /// Wraps a closure.
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Sink for CallableSink<F>
where
    F: FnMut(&Message) -> io::Result<()> + Send,
{
    fn write(&mut self, message: &Message) -> io::Result<()> {
        (self.callback)(message)
    }

    fn describe(&self) -> String {
        "<callable>".to_string()
    }
}

// ============================================================================
// Tracing
// ============================================================================

/// Forwards messages to the `tracing` ecosystem.
///
/// Severities map onto `tracing` levels by range: below 10 is `TRACE`,
/// below 20 `DEBUG`, below 30 `INFO`, below 40 `WARN`, everything else
/// `ERROR`. The record's `extra` travels as a JSON `extra` field and an
/// attached error as an `error` field holding its cause chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    /// Creates the sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Sink for TracingSink {
    fn write(&mut self, message: &Message) -> io::Result<()> {
        let record = &message.record;
        let logger = record.name.as_deref().unwrap_or(&record.module);
        let text = message.text.trim_end_matches('\n');
        let extra = Value::Object(record.extra.clone());
        let error = record.exception.as_ref().map(|e| e.render(false));
        let error = error.as_deref();

        macro_rules! forward {
            ($macro:ident) => {
                tracing::$macro!(
                    logger = logger,
                    function = %record.function,
                    line = record.line,
                    level_name = %record.level.name,
                    extra = %extra,
                    error = error,
                    "{text}"
                )
            };
        }

        match record.level.no {
            0..=9 => forward!(trace),
            10..=19 => forward!(debug),
            20..=29 => forward!(info),
            30..=39 => forward!(warn),
            _ => forward!(error),
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "<tracing>".to_string()
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Keeps every message in a shared buffer.
///
/// Clones share the buffer, so a clone kept by the caller sees what the
/// handler wrote.
///
/// # Example
///
/// ```
/// use logbook::sink::MemorySink;
/// use logbook::handler::HandlerOptions;
/// use logbook::Logger;
///
/// let logger = Logger::new();
/// let sink = MemorySink::new();
/// logger.add(sink.clone(), HandlerOptions::default().with_format("{level} {message}")).unwrap();
/// logger.info("hello");
/// assert_eq!(sink.messages(), vec!["INFO hello\n".to_string()]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MemorySink {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Formatted texts written so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|m| m.text.clone()).collect()
    }

    /// Records written so far.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.lock().iter().map(|m| m.record.clone()).collect()
    }

    /// Empties the buffer.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for MemorySink {
    fn write(&mut self, message: &Message) -> io::Result<()> {
        self.lock().push(message.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}
