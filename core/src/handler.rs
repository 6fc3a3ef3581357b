//! Handlers: a sink plus the level, filter and format deciding what it gets.

use crate::config::Defaults;
use crate::error::LoggerError;
use crate::filter::{CompiledFilter, Filter};
use crate::format::formatter::RenderContext;
use crate::format::markup::Painter;
use crate::format::{FormatError, Formatter, MarkupToken, DEFAULT_FORMAT};
use crate::models::{LevelRef, Message, Record};
use crate::sink::Sink;
use serde::Serialize;
use std::cell::RefCell;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Identifier returned by [`Logger::add`](crate::Logger::add).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandlerId(pub(crate) usize);

impl HandlerId {
    /// Numeric value of the id.
    #[must_use]
    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a handler turns records into text.
#[derive(Clone)]
pub enum Format {
    /// A format compiled once; a newline and the attached error are appended.
    Template(String),
    /// A function returning the format to use for each record, used as is.
    Callable(Arc<dyn Fn(&Record) -> String + Send + Sync>),
}

impl Default for Format {
    fn default() -> Self {
        Self::Template(DEFAULT_FORMAT.to_string())
    }
}

impl From<&str> for Format {
    fn from(format: &str) -> Self {
        Self::Template(format.to_string())
    }
}

impl From<String> for Format {
    fn from(format: String) -> Self {
        Self::Template(format)
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(format) => f.debug_tuple("Template").field(format).finish(),
            Self::Callable(_) => f.write_str("Callable(<fn>)"),
        }
    }
}

/// Options of a handler.
///
/// # Example
///
/// ```
/// use logbook::handler::HandlerOptions;
///
/// let options = HandlerOptions::default()
///     .with_level("WARNING")
///     .with_format("{level} | {message}")
///     .with_colorize(false);
/// assert_eq!(options.colorize, Some(false));
/// ```
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Minimum severity.
    pub level: LevelRef,
    /// Output format.
    pub format: Format,
    /// Additional record filter.
    pub filter: Filter,
    /// Force colors on or off; `None` colorizes terminals, honoring
    /// `NO_COLOR`, `FORCE_COLOR` and `TERM=dumb`.
    pub colorize: Option<bool>,
    /// Include captured backtraces with attached errors.
    pub backtrace: bool,
    /// Report sink errors on stderr instead of returning them.
    pub catch: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            level: LevelRef::default(),
            format: Format::default(),
            filter: Filter::All,
            colorize: None,
            backtrace: true,
            catch: true,
        }
    }
}

impl HandlerOptions {
    /// Options taken from environment defaults.
    #[must_use]
    pub fn from_defaults(defaults: &Defaults) -> Self {
        Self {
            level: LevelRef::Name(defaults.level.clone()),
            format: Format::Template(defaults.format.clone()),
            filter: defaults
                .filter
                .as_ref()
                .map_or(Filter::All, |f| Filter::Module(f.clone())),
            colorize: defaults.colorize,
            backtrace: defaults.backtrace,
            catch: defaults.catch,
        }
    }

    /// Sets the minimum level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<LevelRef>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets a static format.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Format::Template(format.into());
        self
    }

    /// Sets a per-record format function.
    #[must_use]
    pub fn with_format_fn<F>(mut self, format: F) -> Self
    where
        F: Fn(&Record) -> String + Send + Sync + 'static,
    {
        self.format = Format::Callable(Arc::new(format));
        self
    }

    /// Sets the record filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Forces colors on or off.
    #[must_use]
    pub fn with_colorize(mut self, colorize: bool) -> Self {
        self.colorize = Some(colorize);
        self
    }

    /// Enables or disables backtraces.
    #[must_use]
    pub fn with_backtrace(mut self, backtrace: bool) -> Self {
        self.backtrace = backtrace;
        self
    }

    /// Enables or disables error interception.
    #[must_use]
    pub fn with_catch(mut self, catch: bool) -> Self {
        self.catch = catch;
        self
    }
}

enum CompiledFormat {
    Static(Formatter),
    Dynamic(Arc<dyn Fn(&Record) -> String + Send + Sync>),
}

/// Per-call rendering inputs coming from the logger.
pub(crate) struct Emit<'a> {
    pub level_ansi: &'a str,
    pub raw: bool,
    pub message_markup: Option<&'a [MarkupToken]>,
}

/// Prints sink failures to stderr instead of propagating them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ErrorInterceptor {
    should_catch: bool,
    handler_id: HandlerId,
}

impl ErrorInterceptor {
    pub(crate) fn new(should_catch: bool, handler_id: HandlerId) -> Self {
        Self {
            should_catch,
            handler_id,
        }
    }

    pub(crate) fn should_catch(self) -> bool {
        self.should_catch
    }

    pub(crate) fn print(self, record: Option<&Record>, error: &LoggerError) {
        // Nowhere left to report a failing stderr.
        let _ = self.report(&mut std::io::stderr().lock(), record, error);
    }

    fn report(
        self,
        out: &mut impl Write,
        record: Option<&Record>,
        error: &LoggerError,
    ) -> io::Result<()> {
        writeln!(
            out,
            "--- Logging error in Logbook Handler #{} ---",
            self.handler_id
        )?;
        match record {
            Some(record) => writeln!(out, "Record was: {record}")?,
            None => writeln!(out, "Record was: None")?,
        }
        writeln!(out, "{error}")?;
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            writeln!(out, "Caused by: {cause}")?;
            source = cause.source();
        }
        writeln!(out, "--- End of logging error ---")?;
        out.flush()
    }
}

thread_local! {
    /// Handlers whose sink is in use on this thread.
    static IN_USE: RefCell<Vec<HandlerId>> = const { RefCell::new(Vec::new()) };
}

/// Marks a handler's sink as in use on the current thread until dropped.
struct ReentryGuard(HandlerId);

impl ReentryGuard {
    fn enter(id: HandlerId) -> Result<Self, LoggerError> {
        IN_USE.with(|ids| {
            let mut ids = ids.borrow_mut();
            if ids.contains(&id) {
                return Err(LoggerError::Deadlock(id));
            }
            ids.push(id);
            Ok(Self(id))
        })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        let _ = IN_USE.try_with(|ids| ids.borrow_mut().retain(|id| *id != self.0));
    }
}

/// A registered sink and the options deciding what it receives.
pub(crate) struct Handler {
    id: HandlerId,
    levelno: u32,
    format: CompiledFormat,
    filter: CompiledFilter,
    colorize: bool,
    backtrace: bool,
    interceptor: ErrorInterceptor,
    description: String,
    sink: Mutex<Box<dyn Sink>>,
}

/// Decides colors for a handler without an explicit `colorize`.
///
/// A non-empty `NO_COLOR` disables colors and a non-empty `FORCE_COLOR`
/// enables them. Otherwise terminals are colorized unless `TERM` is `dumb`.
fn should_colorize<F>(is_terminal: bool, var: F) -> bool
where
    F: Fn(&str) -> Option<OsString>,
{
    let set = |name: &str| var(name).is_some_and(|value| !value.is_empty());
    if set("NO_COLOR") {
        return false;
    }
    if set("FORCE_COLOR") {
        return true;
    }
    is_terminal && var("TERM").is_none_or(|term| term != "dumb")
}

impl Handler {
    pub(crate) fn new(
        id: HandlerId,
        sink: Box<dyn Sink>,
        options: &HandlerOptions,
        levelno: u32,
        filter: CompiledFilter,
    ) -> Result<Self, LoggerError> {
        let format = match &options.format {
            Format::Template(format) => CompiledFormat::Static(Formatter::compile(format)?),
            Format::Callable(format) => CompiledFormat::Dynamic(Arc::clone(format)),
        };
        let colorize = options
            .colorize
            .unwrap_or_else(|| should_colorize(sink.is_terminal(), |name| std::env::var_os(name)));

        Ok(Self {
            id,
            levelno,
            format,
            filter,
            colorize,
            backtrace: options.backtrace,
            interceptor: ErrorInterceptor::new(options.catch, id),
            description: sink.describe(),
            sink: Mutex::new(sink),
        })
    }

    pub(crate) fn id(&self) -> HandlerId {
        self.id
    }

    pub(crate) fn levelno(&self) -> u32 {
        self.levelno
    }

    pub(crate) fn description(&self) -> &str {
        &self.description
    }

    /// Formats and writes `record` if the level and filter accept it.
    pub(crate) fn emit(&self, record: &Record, emit: &Emit<'_>) -> Result<(), LoggerError> {
        if record.level.no < self.levelno || !self.filter.accepts(record) {
            return Ok(());
        }
        match self.write(record, emit) {
            Err(err) if self.interceptor.should_catch() => {
                self.interceptor.print(Some(record), &err);
                Ok(())
            }
            result => result,
        }
    }

    fn write(&self, record: &Record, emit: &Emit<'_>) -> Result<(), LoggerError> {
        let text = self.format_record(record, emit)?;
        let message = Message {
            text,
            record: record.clone(),
        };
        self.with_sink(|sink| sink.write(&message))
    }

    /// Runs `f` on the locked sink, refusing re-entry from the same thread.
    fn with_sink<T>(
        &self,
        f: impl FnOnce(&mut dyn Sink) -> io::Result<T>,
    ) -> Result<T, LoggerError> {
        let _guard = ReentryGuard::enter(self.id)?;
        let mut sink = self.sink.lock().map_err(|_| LoggerError::LockError)?;
        f(&mut **sink).map_err(|source| LoggerError::Sink {
            id: self.id,
            source,
        })
    }

    fn format_record(&self, record: &Record, emit: &Emit<'_>) -> Result<String, FormatError> {
        let ctx = RenderContext {
            colorize: self.colorize,
            level_ansi: emit.level_ansi,
            message_markup: emit.message_markup,
            backtrace: self.backtrace,
        };

        if emit.raw {
            return Ok(match emit.message_markup {
                Some(markup) => {
                    let mut painter = Painter::new(self.colorize, emit.level_ansi);
                    painter.tokens(markup);
                    painter.finish()
                }
                None => record.message.clone(),
            });
        }

        match &self.format {
            CompiledFormat::Static(formatter) => {
                let mut text = formatter.render_with(record, &ctx)?;
                text.push('\n');
                if let Some(exception) = &record.exception {
                    text.push_str(&exception.render(self.backtrace));
                    text.push('\n');
                }
                Ok(text)
            }
            CompiledFormat::Dynamic(format) => {
                Formatter::compile(&format(record))?.render_with(record, &ctx)
            }
        }
    }

    pub(crate) fn flush(&self) -> Result<(), LoggerError> {
        let result = self.with_sink(|sink| sink.flush());
        self.intercept(result)
    }

    pub(crate) fn stop(&self) -> Result<(), LoggerError> {
        let result = self.with_sink(|sink| sink.stop());
        self.intercept(result)
    }

    fn intercept(&self, result: Result<(), LoggerError>) -> Result<(), LoggerError> {
        match result {
            Err(err) if self.interceptor.should_catch() => {
                self.interceptor.print(None, &err);
                Ok(())
            }
            result => result,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("sink", &self.description)
            .field("levelno", &self.levelno)
            .field("colorize", &self.colorize)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Callsite, RecordException, RecordLevel};
    use crate::sink::MemorySink;
    use std::io;
    use std::time::Duration;

    fn record(no: u32, message: &str) -> Record {
        let callsite = Callsite {
            module_path: Some("app::db"),
            file: "src/db.rs",
            line: 12,
            function: Some("connect"),
        };
        let level = RecordLevel {
            name: "INFO".to_string(),
            no,
            icon: "i".to_string(),
        };
        Record::new(&callsite, level, message, Duration::ZERO)
    }

    fn plain() -> Emit<'static> {
        Emit {
            level_ansi: "",
            raw: false,
            message_markup: None,
        }
    }

    fn handler(sink: impl Sink + 'static, options: &HandlerOptions, levelno: u32) -> Handler {
        Handler::new(
            HandlerId(0),
            Box::new(sink),
            options,
            levelno,
            CompiledFilter::All,
        )
        .unwrap()
    }

    struct FailingSink;

    impl Sink for FailingSink {
        fn write(&mut self, _message: &Message) -> io::Result<()> {
            Err(io::Error::other("boom"))
        }

        fn describe(&self) -> String {
            "<failing>".to_string()
        }
    }

    #[test]
    fn test_static_format_appends_newline() {
        let sink = MemorySink::new();
        let options = HandlerOptions::default().with_format("{level.no} {name}:{function}:{line} {message}");
        let h = handler(sink.clone(), &options, 0);
        h.emit(&record(20, "hi"), &plain()).unwrap();
        assert_eq!(sink.messages(), vec!["20 app::db:connect:12 hi\n".to_string()]);
    }

    #[test]
    fn test_level_threshold() {
        let sink = MemorySink::new();
        let h = handler(sink.clone(), &HandlerOptions::default().with_format("{message}"), 30);
        h.emit(&record(20, "dropped"), &plain()).unwrap();
        h.emit(&record(30, "kept"), &plain()).unwrap();
        assert_eq!(sink.messages(), vec!["kept\n".to_string()]);
    }

    #[test]
    fn test_exception_appended_after_message() {
        let sink = MemorySink::new();
        let h = handler(
            sink.clone(),
            &HandlerOptions::default().with_format("{message}").with_backtrace(false),
            0,
        );
        let mut rec = record(40, "failed");
        rec.exception = Some(RecordException::new(&io::Error::other("disk full")));
        h.emit(&rec, &plain()).unwrap();
        assert_eq!(sink.messages(), vec!["failed\nError: disk full\n".to_string()]);
    }

    #[test]
    fn test_dynamic_format_used_verbatim() {
        let sink = MemorySink::new();
        let options = HandlerOptions::default()
            .with_format_fn(|r| if r.level.no >= 30 { "!! {message}\n".into() } else { "{message}\n".into() });
        let h = handler(sink.clone(), &options, 0);
        h.emit(&record(20, "calm"), &plain()).unwrap();
        h.emit(&record(30, "loud"), &plain()).unwrap();
        assert_eq!(sink.messages(), vec!["calm\n".to_string(), "!! loud\n".to_string()]);
    }

    #[test]
    fn test_raw_message_skips_format() {
        let sink = MemorySink::new();
        let h = handler(sink.clone(), &HandlerOptions::default(), 0);
        let emit = Emit {
            level_ansi: "",
            raw: true,
            message_markup: None,
        };
        h.emit(&record(20, "bare"), &emit).unwrap();
        assert_eq!(sink.messages(), vec!["bare".to_string()]);
    }

    #[test]
    fn test_forced_colors() {
        let sink = MemorySink::new();
        let options = HandlerOptions::default()
            .with_format("<red>{message}</red>")
            .with_colorize(true);
        let h = handler(sink.clone(), &options, 0);
        h.emit(&record(20, "hot"), &plain()).unwrap();
        assert_eq!(sink.messages(), vec!["\x1b[31mhot\x1b[0m\n".to_string()]);
    }

    #[test]
    fn test_memory_sink_not_colorized_by_default() {
        let sink = MemorySink::new();
        let h = handler(sink.clone(), &HandlerOptions::default().with_format("<red>{message}</red>"), 0);
        h.emit(&record(20, "plain"), &plain()).unwrap();
        assert_eq!(sink.messages(), vec!["plain\n".to_string()]);
    }

    #[test]
    fn test_invalid_format_rejected() {
        let result = Handler::new(
            HandlerId(0),
            Box::new(MemorySink::new()),
            &HandlerOptions::default().with_format("<red>{message}"),
            0,
            CompiledFilter::All,
        );
        assert!(matches!(result, Err(LoggerError::Format(_))));
    }

    #[test]
    fn test_caught_error_is_swallowed() {
        let h = handler(FailingSink, &HandlerOptions::default(), 0);
        assert!(h.emit(&record(20, "x"), &plain()).is_ok());
    }

    #[test]
    fn test_uncaught_error_propagates() {
        let h = handler(FailingSink, &HandlerOptions::default().with_catch(false), 0);
        let err = h.emit(&record(20, "x"), &plain()).unwrap_err();
        assert!(matches!(err, LoggerError::Sink { id, .. } if id == HandlerId(0)));
    }

    #[test]
    fn test_error_report_layout() {
        let interceptor = ErrorInterceptor::new(true, HandlerId(3));
        let error = LoggerError::Sink {
            id: HandlerId(3),
            source: io::Error::other("boom"),
        };
        let mut out = Vec::new();
        interceptor
            .report(&mut out, Some(&record(20, "lost")), &error)
            .unwrap();

        let report = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "--- Logging error in Logbook Handler #3 ---");
        assert!(lines[1].starts_with("Record was: {level: INFO, name: Some(\"app::db\")"));
        assert!(lines[1].contains("message: \"lost\""));
        assert_eq!(lines[2], "Handler #3 failed: boom");
        assert_eq!(lines[3], "Caused by: boom");
        assert_eq!(lines[4], "--- End of logging error ---");
    }

    #[test]
    fn test_error_report_without_record() {
        let mut out = Vec::new();
        ErrorInterceptor::new(true, HandlerId(1))
            .report(&mut out, None, &LoggerError::Deadlock(HandlerId(1)))
            .unwrap();
        let report = String::from_utf8(out).unwrap();
        assert!(report.contains("Record was: None\n"));
        assert!(report.contains("deadlock avoided"));
    }

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<OsString> {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| OsString::from(*value))
        }
    }

    #[test]
    fn test_color_environment() {
        assert!(should_colorize(true, env(&[])));
        assert!(!should_colorize(false, env(&[])));
        assert!(!should_colorize(true, env(&[("NO_COLOR", "1")])));
        assert!(!should_colorize(true, env(&[("NO_COLOR", "1"), ("FORCE_COLOR", "1")])));
        assert!(should_colorize(false, env(&[("FORCE_COLOR", "1")])));
        assert!(should_colorize(true, env(&[("NO_COLOR", "")])));
        assert!(!should_colorize(true, env(&[("TERM", "dumb")])));
        assert!(should_colorize(true, env(&[("TERM", "xterm-256color")])));
        assert!(should_colorize(false, env(&[("TERM", "dumb"), ("FORCE_COLOR", "1")])));
    }

    #[test]
    fn test_options_from_defaults() {
        let defaults = Defaults {
            filter: Some("app".to_string()),
            level: "INFO".to_string(),
            catch: false,
            ..Defaults::default()
        };
        let options = HandlerOptions::from_defaults(&defaults);
        assert_eq!(options.level, LevelRef::Name("INFO".to_string()));
        assert!(matches!(options.filter, Filter::Module(ref m) if m == "app"));
        assert!(!options.catch);
    }
}
