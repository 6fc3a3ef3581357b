//! The logging facade.
//!
//! A [`Logger`] is a cheap, clonable view over shared state (handlers,
//! levels, activation list, logger-wide extra and patcher). Methods such as
//! [`Logger::bind`] or [`Logger::opt`] return a new view carrying extra
//! per-call options while sharing everything else.

use crate::catch::Catcher;
use crate::config::{Config, Defaults};
use crate::context::{self, ContextGuard};
use crate::error::LoggerError;
use crate::format::formatter::render_message;
use crate::format::markup::{level_ansi, Painter, TagChecker};
use crate::format::{parse_markup, MarkupToken};
use crate::handler::{Emit, Handler, HandlerId, HandlerOptions};
use crate::models::level::{CRITICAL, DEBUG, ERROR, INFO, SUCCESS, TRACE, WARNING};
use crate::models::{
    Callsite, Level, LevelRef, LevelUpdate, Record, RecordException, RecordLevel,
};
use crate::parse::{Cast, ParseIter};
use crate::sink::{Sink, StreamSink};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Function mutating records before they reach handlers.
pub type Patcher = Arc<dyn Fn(&mut Record) + Send + Sync>;

// ============================================================================
// Call options
// ============================================================================

/// A named message argument.
#[derive(Clone)]
pub enum Arg {
    /// An already computed value.
    Value(Value),
    /// A value computed on demand, see [`Opt::with_lazy`].
    Lazy(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl Arg {
    fn force(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Lazy(f) => f(),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Lazy(_) => f.write_str("Lazy(<fn>)"),
        }
    }
}

/// Named arguments substituted into `{name}` placeholders of a message.
///
/// # Example
///
/// ```
/// use logbook::logger::Args;
///
/// let args = Args::new().arg("user", "alice").arg("attempts", 3);
/// assert!(!args.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Args {
    items: Vec<(String, Arg)>,
}

impl Args {
    /// Creates an empty argument list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value argument; values that fail to serialize become `null`.
    #[must_use]
    pub fn arg(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.items.push((key.into(), Arg::Value(value)));
        self
    }

    /// Adds an argument computed by `f`.
    #[must_use]
    pub fn lazy<F, T>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Serialize,
    {
        let f = move || serde_json::to_value(f()).unwrap_or(Value::Null);
        self.items.push((key.into(), Arg::Lazy(Arc::new(f))));
        self
    }

    /// Whether no argument was given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn force(self) -> Self {
        Self {
            items: self
                .items
                .into_iter()
                .map(|(key, arg)| (key, Arg::Value(arg.force())))
                .collect(),
        }
    }

    fn into_map(self) -> Map<String, Value> {
        self.items
            .into_iter()
            .map(|(key, arg)| (key, arg.force()))
            .collect()
    }
}

/// Per-call options set through [`Logger::opt`].
#[derive(Debug, Clone)]
pub struct Opt {
    /// Error attached to the records.
    pub exception: Option<RecordException>,
    /// Allow `{record[...]}` placeholders in messages.
    pub record: bool,
    /// Evaluate [`Arg::Lazy`] only for records that pass the level checks.
    pub lazy: bool,
    /// Parse color markup in messages.
    pub colors: bool,
    /// Bypass the handler format and the trailing newline.
    pub raw: bool,
    /// Copy named arguments into `extra`.
    pub capture: bool,
}

impl Default for Opt {
    fn default() -> Self {
        Self {
            exception: None,
            record: false,
            lazy: false,
            colors: false,
            raw: false,
            capture: true,
        }
    }
}

impl Opt {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an error and its source chain.
    #[must_use]
    pub fn with_exception<E: Error + ?Sized>(mut self, error: &E) -> Self {
        self.exception = Some(RecordException::new(error));
        self
    }

    /// Attaches an already captured error.
    #[must_use]
    pub fn with_exception_record(mut self, exception: RecordException) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Sets [`Opt::record`].
    #[must_use]
    pub fn with_record(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    /// Sets [`Opt::lazy`].
    #[must_use]
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Sets [`Opt::colors`].
    #[must_use]
    pub fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }

    /// Sets [`Opt::raw`].
    #[must_use]
    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Sets [`Opt::capture`].
    #[must_use]
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct LevelEntry {
    level: Level,
    ansi: String,
}

impl LevelEntry {
    fn new(level: Level) -> Result<Self, LoggerError> {
        let ansi = level_ansi(&level.color)?;
        Ok(Self { level, ansi })
    }
}

struct Core {
    handlers: RwLock<Vec<Arc<Handler>>>,
    next_id: AtomicUsize,
    min_level: AtomicU32,
    levels: RwLock<HashMap<String, LevelEntry>>,
    /// `(prefix, enabled)` sorted deepest first; prefixes end with `::`
    /// except the root `""`.
    activation: RwLock<Vec<(String, bool)>>,
    extra: RwLock<Map<String, Value>>,
    patcher: RwLock<Option<Patcher>>,
    started: Instant,
}

fn lock_error<T>(_: T) -> LoggerError {
    LoggerError::LockError
}

impl Core {
    fn new(levels: Vec<Level>) -> Result<Self, LoggerError> {
        let levels = levels
            .into_iter()
            .map(|level| Ok((level.name.clone(), LevelEntry::new(level)?)))
            .collect::<Result<HashMap<_, _>, LoggerError>>()?;
        Ok(Self::from_entries(levels))
    }

    fn from_entries(levels: HashMap<String, LevelEntry>) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            min_level: AtomicU32::new(u32::MAX),
            levels: RwLock::new(levels),
            activation: RwLock::new(Vec::new()),
            extra: RwLock::new(Map::new()),
            patcher: RwLock::new(None),
            started: Instant::now(),
        }
    }

    fn level_no(&self, level: &LevelRef) -> Result<u32, LoggerError> {
        match level {
            LevelRef::No(no) => Ok(*no),
            LevelRef::Name(name) => self
                .levels
                .read()
                .map_err(lock_error)?
                .get(name)
                .map(|entry| entry.level.no)
                .ok_or_else(|| LoggerError::UnknownLevel(name.clone())),
        }
    }

    fn resolve_level(&self, level: &LevelRef) -> Result<(RecordLevel, String), LoggerError> {
        match level {
            LevelRef::No(no) => {
                let level = Level::anonymous(*no);
                Ok((
                    RecordLevel {
                        name: level.name,
                        no: level.no,
                        icon: level.icon,
                    },
                    String::new(),
                ))
            }
            LevelRef::Name(name) => {
                let levels = self.levels.read().map_err(lock_error)?;
                let entry = levels
                    .get(name)
                    .ok_or_else(|| LoggerError::UnknownLevel(name.clone()))?;
                Ok((
                    RecordLevel {
                        name: entry.level.name.clone(),
                        no: entry.level.no,
                        icon: entry.level.icon.clone(),
                    },
                    entry.ansi.clone(),
                ))
            }
        }
    }

    fn update_min_level(&self, handlers: &[Arc<Handler>]) {
        let min = handlers.iter().map(|h| h.levelno()).min().unwrap_or(u32::MAX);
        self.min_level.store(min, Ordering::Release);
    }

    fn is_enabled(&self, name: Option<&str>) -> Result<bool, LoggerError> {
        let activation = self.activation.read().map_err(lock_error)?;
        let status = match name {
            None => activation
                .iter()
                .find(|(prefix, _)| prefix.is_empty())
                .map(|(_, status)| *status),
            Some(name) => {
                let dotted = format!("{name}::");
                activation
                    .iter()
                    .find(|(prefix, _)| dotted.starts_with(prefix.as_str()))
                    .map(|(_, status)| *status)
            }
        };
        Ok(status.unwrap_or(true))
    }

    fn change_activation(&self, name: &str, status: bool) -> Result<(), LoggerError> {
        let prefix = if name.is_empty() {
            String::new()
        } else {
            format!("{name}::")
        };
        let mut activation = self.activation.write().map_err(lock_error)?;
        activation.retain(|(existing, _)| !existing.starts_with(prefix.as_str()));

        let parent = activation
            .iter()
            .find(|(existing, _)| prefix.starts_with(existing.as_str()))
            .map(|(_, status)| *status);

        if parent != Some(status) && !(name.is_empty() && status) {
            activation.push((prefix, status));
            activation.sort_by_key(|(existing, _)| Reverse(existing.matches("::").count()));
        }
        Ok(())
    }
}

// ============================================================================
// Logger
// ============================================================================

/// The logging facade.
///
/// # Example
///
/// ```
/// use logbook::handler::HandlerOptions;
/// use logbook::sink::MemorySink;
/// use logbook::Logger;
///
/// let logger = Logger::new();
/// let sink = MemorySink::new();
/// logger
///     .add(sink.clone(), HandlerOptions::default().with_level("INFO").with_format("{level} {extra[user]} {message}"))
///     .unwrap();
///
/// let logger = logger.bind("user", "alice");
/// logger.debug("hidden");
/// logger.info("visible");
/// assert_eq!(sink.messages(), vec!["INFO alice visible\n".to_string()]);
/// ```
#[derive(Clone)]
pub struct Logger {
    core: Arc<Core>,
    opt: Opt,
    extra: Map<String, Value>,
    patchers: Vec<Patcher>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self
            .core
            .handlers
            .read()
            .map(|handlers| handlers.iter().map(|h| h.id()).collect::<Vec<_>>())
            .unwrap_or_default();
        f.debug_struct("Logger")
            .field("handlers", &handlers)
            .field("opt", &self.opt)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Creates a logger with the built-in levels and no handler.
    #[must_use]
    pub fn new() -> Self {
        let levels = Level::builtins()
            .into_iter()
            .map(|level| {
                let ansi = level_ansi(&level.color).unwrap_or_default();
                (level.name.clone(), LevelEntry { level, ansi })
            })
            .collect();
        Self::from_core(Core::from_entries(levels))
    }

    /// Creates a logger from environment defaults, adding a stderr handler
    /// when `defaults.autoinit` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if a level color, the default level, filter or
    /// format is invalid.
    pub fn from_defaults(defaults: &Defaults) -> Result<Self, LoggerError> {
        let logger = Self::from_core(Core::new(defaults.levels.clone())?);
        if defaults.autoinit {
            logger.add(StreamSink::stderr(), HandlerOptions::from_defaults(defaults))?;
        }
        Ok(logger)
    }

    /// Creates a logger from the `LOGBOOK_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self, LoggerError> {
        let defaults = Defaults::from_env()?;
        Self::from_defaults(&defaults)
    }

    fn from_core(core: Core) -> Self {
        Self {
            core: Arc::new(core),
            opt: Opt::default(),
            extra: Map::new(),
            patchers: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    /// Adds a handler and returns its id.
    ///
    /// # Arguments
    ///
    /// * `sink` - Destination of formatted messages
    /// * `options` - Level, format, filter and error handling of the handler
    ///
    /// # Errors
    ///
    /// Returns an error if the level is unknown or the format is invalid.
    pub fn add(
        &self,
        sink: impl Sink + 'static,
        options: HandlerOptions,
    ) -> Result<HandlerId, LoggerError> {
        self.add_boxed(Box::new(sink), &options)
    }

    /// Adds a handler from a boxed sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the level is unknown or the format is invalid.
    pub fn add_boxed(
        &self,
        sink: Box<dyn Sink>,
        options: &HandlerOptions,
    ) -> Result<HandlerId, LoggerError> {
        let levelno = self.core.level_no(&options.level)?;
        let filter = options.filter.compile(|level| self.core.level_no(level))?;
        let id = HandlerId(self.core.next_id.fetch_add(1, Ordering::SeqCst));
        let handler = Arc::new(Handler::new(id, sink, options, levelno, filter)?);

        let mut handlers = self.core.handlers.write().map_err(lock_error)?;
        handlers.push(Arc::clone(&handler));
        self.core.update_min_level(&handlers);

        tracing::debug!(
            handler = %id,
            sink = handler.description(),
            level = levelno,
            "Handler added"
        );
        Ok(id)
    }

    /// Removes a handler and stops its sink.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::UnknownHandler`] if no handler has this id, or
    /// the sink's error when stopping fails and the handler does not catch.
    pub fn remove(&self, id: HandlerId) -> Result<(), LoggerError> {
        let handler = {
            let mut handlers = self.core.handlers.write().map_err(lock_error)?;
            let position = handlers
                .iter()
                .position(|h| h.id() == id)
                .ok_or(LoggerError::UnknownHandler(id))?;
            let handler = handlers.remove(position);
            self.core.update_min_level(&handlers);
            handler
        };
        tracing::debug!(handler = %id, sink = handler.description(), "Handler removed");
        handler.stop()
    }

    /// Removes every handler, stopping all sinks.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while stopping a sink.
    pub fn remove_all(&self) -> Result<(), LoggerError> {
        let removed = {
            let mut handlers = self.core.handlers.write().map_err(lock_error)?;
            let removed = std::mem::take(&mut *handlers);
            self.core.update_min_level(&handlers);
            removed
        };
        tracing::debug!(count = removed.len(), "All handlers removed");
        removed
            .iter()
            .map(|handler| handler.stop())
            .fold(Ok(()), Result::and)
    }

    /// Flushes every sink.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while flushing a sink.
    pub fn complete(&self) -> Result<(), LoggerError> {
        let handlers = self.core.handlers.read().map_err(lock_error)?.clone();
        handlers
            .iter()
            .map(|handler| handler.flush())
            .fold(Ok(()), Result::and)
    }

    // ------------------------------------------------------------------------
    // Derived loggers
    // ------------------------------------------------------------------------

    /// Returns a logger applying `opt` to its calls.
    #[must_use]
    pub fn opt(&self, opt: Opt) -> Self {
        Self {
            opt,
            ..self.clone()
        }
    }

    /// Options applied by this logger.
    #[must_use]
    pub fn options(&self) -> &Opt {
        &self.opt
    }

    /// Returns a logger adding `key` to the `extra` of its records.
    ///
    /// # Example
    ///
    /// ```
    /// use logbook::Logger;
    ///
    /// let logger = Logger::new().bind("request_id", "r-42").bind("attempt", 2);
    /// # let _ = logger;
    /// ```
    #[must_use]
    pub fn bind(&self, key: impl Into<String>, value: impl Serialize) -> Self {
        let mut logger = self.clone();
        logger.extra.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        logger
    }

    /// Returns a logger adding every pair of `extra` to its records.
    #[must_use]
    pub fn bind_map(&self, extra: Map<String, Value>) -> Self {
        let mut logger = self.clone();
        logger.extra.extend(extra);
        logger
    }

    /// Adds `key` to the `extra` of every record logged from this thread
    /// while the returned guard lives.
    pub fn contextualize(&self, key: impl Into<String>, value: impl Serialize) -> ContextGuard {
        let mut values = Map::new();
        values.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        context::push(values)
    }

    /// Adds several pairs to the thread context, see [`Logger::contextualize`].
    pub fn contextualize_map(&self, values: Map<String, Value>) -> ContextGuard {
        context::push(values)
    }

    /// Returns a logger applying `patcher` to its records before dispatch.
    #[must_use]
    pub fn patch<F>(&self, patcher: F) -> Self
    where
        F: Fn(&mut Record) + Send + Sync + 'static,
    {
        let mut logger = self.clone();
        logger.patchers.push(Arc::new(patcher));
        logger
    }

    /// Returns a [`Catcher`] logging errors and panics through this logger.
    #[must_use]
    pub fn catch(&self) -> Catcher {
        Catcher::new(self.clone())
    }

    // ------------------------------------------------------------------------
    // Levels and activation
    // ------------------------------------------------------------------------

    /// Looks up a level by name.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::UnknownLevel`] if the level does not exist.
    pub fn level(&self, name: &str) -> Result<Level, LoggerError> {
        self.core
            .levels
            .read()
            .map_err(lock_error)?
            .get(name)
            .map(|entry| entry.level.clone())
            .ok_or_else(|| LoggerError::UnknownLevel(name.to_string()))
    }

    /// Registered levels ordered by severity.
    ///
    /// # Errors
    ///
    /// Returns an error if the level table lock is poisoned.
    pub fn levels(&self) -> Result<Vec<Level>, LoggerError> {
        let mut levels: Vec<Level> = self
            .core
            .levels
            .read()
            .map_err(lock_error)?
            .values()
            .map(|entry| entry.level.clone())
            .collect();
        levels.sort_by(|a, b| a.no.cmp(&b.no).then_with(|| a.name.cmp(&b.name)));
        Ok(levels)
    }

    /// Creates a level or updates the color and icon of an existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, a new level has no number, an
    /// existing level would change number, or the color is invalid.
    ///
    /// # Example
    ///
    /// ```
    /// use logbook::models::LevelUpdate;
    /// use logbook::Logger;
    ///
    /// let logger = Logger::new();
    /// let notice = logger.set_level("NOTICE", LevelUpdate::new().with_no(25).with_icon("!")).unwrap();
    /// assert_eq!(notice.no, 25);
    /// assert!(logger.set_level("NOTICE", LevelUpdate::new().with_no(26)).is_err());
    /// ```
    pub fn set_level(&self, name: &str, update: LevelUpdate) -> Result<Level, LoggerError> {
        if name.is_empty() {
            return Err(LoggerError::EmptyLevelName);
        }
        let mut levels = self.core.levels.write().map_err(lock_error)?;

        let level = match levels.get_mut(name) {
            Some(entry) => {
                if update.no.is_some_and(|no| no != entry.level.no) {
                    return Err(LoggerError::LevelSeverityChange(name.to_string()));
                }
                if let Some(color) = update.color {
                    entry.ansi = level_ansi(&color)?;
                    entry.level.color = color;
                }
                if let Some(icon) = update.icon {
                    entry.level.icon = icon;
                }
                entry.level.clone()
            }
            None => {
                let no = update
                    .no
                    .ok_or_else(|| LoggerError::MissingLevelNo(name.to_string()))?;
                let level = Level::new(
                    name,
                    no,
                    update.color.unwrap_or_default(),
                    update.icon.unwrap_or_else(|| " ".to_string()),
                );
                levels.insert(name.to_string(), LevelEntry::new(level.clone())?);
                level
            }
        };

        tracing::debug!(level = %level.name, no = level.no, "Level registered");
        Ok(level)
    }

    /// Enables records from `name` and its submodules (`""` for all).
    ///
    /// # Errors
    ///
    /// Returns an error if the activation lock is poisoned.
    pub fn enable(&self, name: &str) -> Result<(), LoggerError> {
        self.core.change_activation(name, true)
    }

    /// Disables records from `name` and its submodules (`""` for all).
    ///
    /// # Errors
    ///
    /// Returns an error if the activation lock is poisoned.
    pub fn disable(&self, name: &str) -> Result<(), LoggerError> {
        self.core.change_activation(name, false)
    }

    /// Applies a configuration and returns the ids of the added handlers.
    ///
    /// Levels, extra, patcher and activation are applied first; handlers,
    /// when given, replace all existing ones.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a level update or handler addition.
    pub fn configure(&self, config: Config) -> Result<Vec<HandlerId>, LoggerError> {
        for (name, update) in config.levels {
            self.set_level(&name, update)?;
        }
        if let Some(extra) = config.extra {
            *self.core.extra.write().map_err(lock_error)? = extra;
        }
        if let Some(patcher) = config.patcher {
            *self.core.patcher.write().map_err(lock_error)? = Some(patcher);
        }
        for (name, enabled) in config.activation {
            self.core.change_activation(&name, enabled)?;
        }
        match config.handlers {
            None => Ok(Vec::new()),
            Some(handlers) => {
                self.remove_all()?;
                handlers
                    .into_iter()
                    .map(|handler| self.add_boxed(handler.sink, &handler.options))
                    .collect()
            }
        }
    }

    /// Iterates over the regex matches found in `reader`.
    ///
    /// `chunk` is the number of bytes read at once (zero for the default).
    #[must_use]
    pub fn parse<R: Read>(reader: R, pattern: Regex, cast: Cast, chunk: usize) -> ParseIter<R> {
        ParseIter::new(reader, pattern, cast, chunk)
    }

    // ------------------------------------------------------------------------
    // Logging
    // ------------------------------------------------------------------------

    /// Logs at `TRACE`.
    #[track_caller]
    pub fn trace(&self, message: impl fmt::Display) {
        self.emit(Callsite::caller(), TRACE, &message);
    }

    /// Logs at `DEBUG`.
    #[track_caller]
    pub fn debug(&self, message: impl fmt::Display) {
        self.emit(Callsite::caller(), DEBUG, &message);
    }

    /// Logs at `INFO`.
    #[track_caller]
    pub fn info(&self, message: impl fmt::Display) {
        self.emit(Callsite::caller(), INFO, &message);
    }

    /// Logs at `SUCCESS`.
    #[track_caller]
    pub fn success(&self, message: impl fmt::Display) {
        self.emit(Callsite::caller(), SUCCESS, &message);
    }

    /// Logs at `WARNING`.
    #[track_caller]
    pub fn warning(&self, message: impl fmt::Display) {
        self.emit(Callsite::caller(), WARNING, &message);
    }

    /// Logs at `ERROR`.
    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.emit(Callsite::caller(), ERROR, &message);
    }

    /// Logs at `CRITICAL`.
    #[track_caller]
    pub fn critical(&self, message: impl fmt::Display) {
        self.emit(Callsite::caller(), CRITICAL, &message);
    }

    /// Logs at `ERROR` with `error` attached.
    #[track_caller]
    pub fn exception<E: Error + ?Sized>(&self, message: impl fmt::Display, error: &E) {
        let callsite = Callsite::caller();
        self.opt(self.opt.clone().with_exception(error))
            .emit(callsite, ERROR, &message);
    }

    /// Logs at any level, by name or number.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::UnknownLevel`] for an unregistered name, or a
    /// sink error from a handler that does not catch.
    #[track_caller]
    pub fn log(
        &self,
        level: impl Into<LevelRef>,
        message: impl fmt::Display,
    ) -> Result<(), LoggerError> {
        self.dispatch(Callsite::caller(), &level.into(), &message, Args::new())
    }

    /// Logs a message template with named arguments.
    ///
    /// # Errors
    ///
    /// See [`Logger::log`].
    ///
    /// # Example
    ///
    /// ```
    /// use logbook::logger::Args;
    /// use logbook::handler::HandlerOptions;
    /// use logbook::sink::MemorySink;
    /// use logbook::Logger;
    ///
    /// let logger = Logger::new();
    /// let sink = MemorySink::new();
    /// logger.add(sink.clone(), HandlerOptions::default().with_format("{message} {extra[user]}")).unwrap();
    /// logger.log_args("INFO", "hello {user:>6}", Args::new().arg("user", "bob")).unwrap();
    /// assert_eq!(sink.messages(), vec!["hello    bob bob\n".to_string()]);
    /// ```
    #[track_caller]
    pub fn log_args(
        &self,
        level: impl Into<LevelRef>,
        template: &str,
        args: Args,
    ) -> Result<(), LoggerError> {
        self.dispatch(Callsite::caller(), &level.into(), &template, args)
    }

    /// Logs with an explicit call site, as the macros do.
    ///
    /// # Errors
    ///
    /// See [`Logger::log`].
    pub fn log_at(
        &self,
        callsite: Callsite,
        level: impl Into<LevelRef>,
        message: &dyn fmt::Display,
        args: Args,
    ) -> Result<(), LoggerError> {
        self.dispatch(callsite, &level.into(), message, args)
    }

    /// Logs with an explicit call site, panicking on failure like the
    /// leveled methods.
    ///
    /// # Panics
    ///
    /// Panics if the level is unknown or a handler added with
    /// `catch(false)` fails.
    pub fn emit(&self, callsite: Callsite, level: impl Into<LevelRef>, message: &dyn fmt::Display) {
        if let Err(err) = self.dispatch(callsite, &level.into(), message, Args::new()) {
            panic!("{err}");
        }
    }

    pub(crate) fn dispatch(
        &self,
        callsite: Callsite,
        level: &LevelRef,
        message: &dyn fmt::Display,
        args: Args,
    ) -> Result<(), LoggerError> {
        let core = &self.core;
        let args = if self.opt.lazy { args } else { args.force() };

        let (record_level, level_ansi) = core.resolve_level(level)?;
        if record_level.no < core.min_level.load(Ordering::Acquire) {
            return Ok(());
        }
        if !core.is_enabled(callsite.module_path)? {
            return Ok(());
        }

        let args = args.into_map();
        let mut record = Record::new(
            &callsite,
            record_level,
            String::new(),
            core.started.elapsed(),
        );
        record.exception.clone_from(&self.opt.exception);

        let mut extra = core.extra.read().map_err(lock_error)?.clone();
        extra.extend(context::current().iter().map(|(k, v)| (k.clone(), v.clone())));
        extra.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        if self.opt.capture {
            extra.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        record.extra = extra;

        let template = message.to_string();
        let substitute = !args.is_empty() || self.opt.record;
        let fill = |text: &str| {
            if substitute {
                render_message(text, &args, self.opt.record.then_some(&record))
            } else {
                text.to_string()
            }
        };

        // Markup comes from the template only; argument values stay plain text.
        let markup = if self.opt.colors {
            checked_markup(&template).map(|tokens| {
                tokens
                    .into_iter()
                    .map(|token| match token {
                        MarkupToken::Text(text) => MarkupToken::Text(fill(&text)),
                        other => other,
                    })
                    .collect::<Vec<_>>()
            })
        } else {
            None
        };
        let text = match &markup {
            Some(tokens) => {
                let mut painter = Painter::new(false, "");
                painter.tokens(tokens);
                painter.finish()
            }
            None => fill(&template),
        };
        record.message = text;

        let patcher = core.patcher.read().map_err(lock_error)?.clone();
        if let Some(patcher) = patcher {
            patcher(&mut record);
        }
        for patcher in &self.patchers {
            patcher(&mut record);
        }

        let handlers = core.handlers.read().map_err(lock_error)?.clone();
        let emit = Emit {
            level_ansi: &level_ansi,
            raw: self.opt.raw,
            message_markup: markup.as_deref(),
        };
        for handler in &handlers {
            handler.emit(&record, &emit)?;
        }
        Ok(())
    }
}

/// Parses message markup, or `None` when it is not well formed.
fn checked_markup(text: &str) -> Option<Vec<MarkupToken>> {
    let tokens = parse_markup(text).ok()?;
    let mut checker = TagChecker::new();
    for token in &tokens {
        checker.feed(token).ok()?;
    }
    checker.finish().ok()?;
    Some(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, LevelFilter};
    use crate::sink::{CallableSink, MemorySink};
    use serde_json::json;
    use std::io;
    use std::sync::atomic::AtomicBool;

    fn setup(format: &str) -> (Logger, MemorySink) {
        let logger = Logger::new();
        let sink = MemorySink::new();
        logger
            .add(
                sink.clone(),
                HandlerOptions::default().with_level(TRACE).with_format(format),
            )
            .unwrap();
        (logger, sink)
    }

    fn at(module: &'static str) -> Callsite {
        Callsite {
            module_path: Some(module),
            file: "src/lib.rs",
            line: 1,
            function: Some("run"),
        }
    }

    struct FailingSink;

    impl Sink for FailingSink {
        fn write(&mut self, _message: &crate::models::Message) -> io::Result<()> {
            Err(io::Error::other("broken pipe"))
        }

        fn describe(&self) -> String {
            "<failing>".to_string()
        }
    }

    #[test]
    fn test_leveled_calls() {
        let (logger, sink) = setup("{level}|{message}");
        logger.trace("t");
        logger.debug("d");
        logger.info("i");
        logger.success("s");
        logger.warning("w");
        logger.error("e");
        logger.critical("c");
        assert_eq!(
            sink.messages(),
            vec![
                "TRACE|t\n",
                "DEBUG|d\n",
                "INFO|i\n",
                "SUCCESS|s\n",
                "WARNING|w\n",
                "ERROR|e\n",
                "CRITICAL|c\n"
            ]
        );
    }

    #[test]
    fn test_callsite_from_track_caller() {
        let (logger, sink) = setup("{file}:{line} {function}");
        let line = line!() + 1;
        logger.info("here");
        assert_eq!(sink.messages(), vec![format!("logger.rs:{line} <unknown>\n")]);
    }

    #[test]
    fn test_handler_ids_increase() {
        let logger = Logger::new();
        let a = logger.add(MemorySink::new(), HandlerOptions::default()).unwrap();
        let b = logger.add(MemorySink::new(), HandlerOptions::default()).unwrap();
        logger.remove(a).unwrap();
        let c = logger.add(MemorySink::new(), HandlerOptions::default()).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_remove_unknown_handler() {
        let logger = Logger::new();
        let id = logger.add(MemorySink::new(), HandlerOptions::default()).unwrap();
        logger.remove(id).unwrap();
        let err = logger.remove(id).unwrap_err();
        assert_eq!(err.to_string(), format!("There is no existing handler with id {id}"));
    }

    #[test]
    fn test_removed_handler_stops_receiving() {
        let logger = Logger::new();
        let sink = MemorySink::new();
        let id = logger
            .add(sink.clone(), HandlerOptions::default().with_format("{message}"))
            .unwrap();
        logger.info("one");
        logger.remove(id).unwrap();
        logger.info("two");
        assert_eq!(sink.messages(), vec!["one\n"]);
    }

    #[test]
    fn test_unknown_handler_level() {
        let logger = Logger::new();
        let err = logger
            .add(MemorySink::new(), HandlerOptions::default().with_level("LOUD"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Level 'LOUD' does not exist");
    }

    #[test]
    fn test_log_by_number_and_unknown_name() {
        let (logger, sink) = setup("{level.name}:{level.no}:{message}");
        logger.log(17u32, "custom").unwrap();
        assert!(matches!(logger.log("NOPE", "x"), Err(LoggerError::UnknownLevel(_))));
        assert_eq!(sink.messages(), vec!["Level 17:17:custom\n"]);
    }

    #[test]
    fn test_custom_level() {
        let (logger, sink) = setup("{level.icon} {level} {message}");
        logger
            .set_level("NOTICE", LevelUpdate::new().with_no(22).with_icon("*"))
            .unwrap();
        logger.log("NOTICE", "note").unwrap();
        assert_eq!(sink.messages(), vec!["* NOTICE note\n"]);
        assert_eq!(logger.level("NOTICE").unwrap().no, 22);
    }

    #[test]
    fn test_level_updates() {
        let logger = Logger::new();
        assert!(matches!(
            logger.set_level("NEW", LevelUpdate::new()),
            Err(LoggerError::MissingLevelNo(_))
        ));
        assert!(matches!(
            logger.set_level("INFO", LevelUpdate::new().with_no(21)),
            Err(LoggerError::LevelSeverityChange(_))
        ));
        assert!(matches!(
            logger.set_level("", LevelUpdate::new().with_no(1)),
            Err(LoggerError::EmptyLevelName)
        ));
        assert!(matches!(
            logger.set_level("INFO", LevelUpdate::new().with_color("<nope>")),
            Err(LoggerError::Format(_))
        ));

        let info = logger
            .set_level("INFO", LevelUpdate::new().with_color("<white>").with_icon("i"))
            .unwrap();
        assert_eq!(info.no, 20);
        assert_eq!(info.color, "<white>");
        assert_eq!(info.icon, "i");
    }

    #[test]
    fn test_levels_sorted() {
        let logger = Logger::new();
        let names: Vec<String> = logger.levels().unwrap().into_iter().map(|l| l.name).collect();
        assert_eq!(
            names,
            vec!["TRACE", "DEBUG", "INFO", "SUCCESS", "WARNING", "ERROR", "CRITICAL"]
        );
    }

    #[test]
    fn test_extra_precedence() {
        let (logger, sink) = setup("{extra[k]}");
        let mut core_extra = Map::new();
        core_extra.insert("k".into(), json!("core"));
        logger.configure(Config::new().with_extra(core_extra)).unwrap();

        logger.info("");
        let _guard = logger.contextualize("k", "context");
        logger.info("");
        let bound = logger.bind("k", "bound");
        bound.info("");
        bound
            .log_args(INFO, "msg", Args::new().arg("k", "arg"))
            .unwrap();

        assert_eq!(sink.messages(), vec!["core\n", "context\n", "bound\n", "arg\n"]);
    }

    #[test]
    fn test_capture_disabled() {
        let (logger, sink) = setup("{message} {extra}");
        logger
            .opt(Opt::new().with_capture(false))
            .log_args(INFO, "hi {name}", Args::new().arg("name", "x"))
            .unwrap();
        assert_eq!(sink.messages(), vec!["hi x {}\n"]);
    }

    #[test]
    fn test_message_without_args_keeps_braces() {
        let (logger, sink) = setup("{message}");
        logger.info("set {a} = {b}");
        logger.log_args(INFO, "{a} and {missing}", Args::new().arg("a", 1)).unwrap();
        assert_eq!(sink.messages(), vec!["set {a} = {b}\n", "1 and {missing}\n"]);
    }

    #[test]
    fn test_lazy_arguments() {
        let logger = Logger::new();
        let sink = MemorySink::new();
        logger
            .add(sink.clone(), HandlerOptions::default().with_level(INFO).with_format("{message}"))
            .unwrap();

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let args = Args::new().lazy("cost", move || {
            flag.store(true, Ordering::SeqCst);
            42
        });

        let lazy = logger.opt(Opt::new().with_lazy(true));
        lazy.log_args(DEBUG, "{cost}", args.clone()).unwrap();
        assert!(!called.load(Ordering::SeqCst));

        lazy.log_args(INFO, "{cost}", args.clone()).unwrap();
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(sink.messages(), vec!["42\n"]);

        called.store(false, Ordering::SeqCst);
        logger.log_args(DEBUG, "{cost}", args).unwrap();
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_record_option() {
        let (logger, sink) = setup("{message}");
        logger
            .opt(Opt::new().with_record(true))
            .info("at {record[level].no} in {record[function]}");
        assert_eq!(sink.messages(), vec!["at 20 in <unknown>\n"]);
    }

    #[test]
    fn test_raw_option() {
        let (logger, sink) = setup("{level} {message}");
        logger.opt(Opt::new().with_raw(true)).info("no newline");
        assert_eq!(sink.messages(), vec!["no newline"]);
    }

    #[test]
    fn test_colors_option_strips_markup_from_record() {
        let logger = Logger::new();
        let plain = MemorySink::new();
        let colored = MemorySink::new();
        logger
            .add(plain.clone(), HandlerOptions::default().with_format("{message}"))
            .unwrap();
        logger
            .add(
                colored.clone(),
                HandlerOptions::default().with_format("{message}").with_colorize(true),
            )
            .unwrap();

        logger.opt(Opt::new().with_colors(true)).info("<red>alert</red>");
        assert_eq!(plain.messages(), vec!["alert\n"]);
        assert_eq!(colored.messages(), vec!["\x1b[31malert\x1b[0m\n"]);
        assert_eq!(plain.records()[0].message, "alert");
    }

    #[test]
    fn test_colors_option_with_bad_markup_logs_text() {
        let (logger, sink) = setup("{message}");
        logger.opt(Opt::new().with_colors(true)).info("<red>open");
        assert_eq!(sink.messages(), vec!["<red>open\n"]);
    }

    #[test]
    fn test_colors_option_keeps_argument_values_literal() {
        let logger = Logger::new();
        let sink = MemorySink::new();
        logger
            .add(
                sink.clone(),
                HandlerOptions::default().with_format("{message}").with_colorize(true),
            )
            .unwrap();

        let colored = logger.opt(Opt::new().with_colors(true));
        colored
            .log_args(INFO, "<red>{user}</red>", Args::new().arg("user", "</b>"))
            .unwrap();
        colored
            .log_args(INFO, "<red>{user}</red>", Args::new().arg("user", "<green>"))
            .unwrap();

        assert_eq!(
            sink.messages(),
            vec!["\x1b[31m</b>\x1b[0m\n", "\x1b[31m<green>\x1b[0m\n"]
        );
        assert_eq!(sink.records()[0].message, "</b>");
    }

    #[test]
    fn test_exception_attached() {
        let (logger, sink) = setup("{level} {message}");
        let err = io::Error::other("disk full");
        logger.exception("write failed", &err);
        let messages = sink.messages();
        assert!(messages[0].starts_with("ERROR write failed\nError: disk full\n"));
        assert_eq!(sink.records()[0].exception.as_ref().unwrap().value, "disk full");
    }

    #[test]
    fn test_patch() {
        let (logger, sink) = setup("{message} {extra[patched]}");
        logger
            .configure(Config::new().with_patcher(|r| {
                r.extra.insert("patched".into(), json!("core"));
            }))
            .unwrap();
        let patched = logger.patch(|r| {
            r.message = r.message.to_uppercase();
            r.extra.insert("patched".into(), json!("local"));
        });
        logger.info("a");
        patched.info("b");
        assert_eq!(sink.messages(), vec!["a core\n", "B local\n"]);
    }

    #[test]
    fn test_enable_disable() {
        let (logger, sink) = setup("{name}");
        logger.disable("app").unwrap();
        logger.enable("app::api").unwrap();

        for module in ["app", "app::db", "app::api", "app::api::v1", "application", "other"] {
            logger.emit(at(module), INFO, &"x");
        }
        assert_eq!(
            sink.messages(),
            vec!["app::api\n", "app::api::v1\n", "application\n", "other\n"]
        );

        sink.clear();
        logger.enable("app").unwrap();
        logger.emit(at("app::db"), INFO, &"x");
        assert_eq!(sink.messages(), vec!["app::db\n"]);
    }

    #[test]
    fn test_disable_everything() {
        let (logger, sink) = setup("{message}");
        logger.disable("").unwrap();
        logger.info("unnamed");
        logger.emit(at("app"), INFO, &"named");
        assert!(sink.messages().is_empty());

        logger.enable("").unwrap();
        logger.info("back");
        assert_eq!(sink.messages(), vec!["back\n"]);
    }

    #[test]
    fn test_activation_list_pruned() {
        let logger = Logger::new();
        logger.disable("a::b").unwrap();
        logger.disable("a::c").unwrap();
        logger.disable("a").unwrap();
        assert_eq!(
            *logger.core.activation.read().unwrap(),
            vec![("a::".to_string(), false)]
        );
        logger.disable("a::b").unwrap();
        assert_eq!(logger.core.activation.read().unwrap().len(), 1);
    }

    #[test]
    fn test_filter_by_levels() {
        let logger = Logger::new();
        let sink = MemorySink::new();
        logger
            .add(
                sink.clone(),
                HandlerOptions::default()
                    .with_level(TRACE)
                    .with_format("{name} {level}")
                    .with_filter(Filter::levels([
                        ("", LevelFilter::from(WARNING)),
                        ("app", LevelFilter::from(DEBUG)),
                    ])),
            )
            .unwrap();
        logger.emit(at("app::x"), DEBUG, &"");
        logger.emit(at("lib"), INFO, &"");
        logger.emit(at("lib"), ERROR, &"");
        assert_eq!(sink.messages(), vec!["app::x DEBUG\n", "lib ERROR\n"]);
    }

    #[test]
    fn test_configure_replaces_handlers() {
        let (logger, old) = setup("{message}");
        let new = MemorySink::new();
        let ids = logger
            .configure(
                Config::new()
                    .with_level("AUDIT", LevelUpdate::new().with_no(35))
                    .with_handler(new.clone(), HandlerOptions::default().with_format("{level} {message}"))
                    .with_activation("noisy", false),
            )
            .unwrap();
        assert_eq!(ids.len(), 1);

        logger.log("AUDIT", "checked").unwrap();
        logger.emit(at("noisy::mod"), INFO, &"dropped");
        assert!(old.messages().is_empty());
        assert_eq!(new.messages(), vec!["AUDIT checked\n"]);
    }

    #[test]
    fn test_caught_sink_error_keeps_logging() {
        let (logger, sink) = setup("{message}");
        logger.add(FailingSink, HandlerOptions::default()).unwrap();
        logger.info("still logged");
        logger.info("again");
        assert_eq!(sink.messages(), vec!["still logged\n", "again\n"]);
    }

    #[test]
    fn test_uncaught_sink_error() {
        let logger = Logger::new();
        logger
            .add(FailingSink, HandlerOptions::default().with_catch(false))
            .unwrap();
        assert!(matches!(logger.log(INFO, "x"), Err(LoggerError::Sink { .. })));
        let panicked =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| logger.info("x"))).is_err();
        assert!(panicked);
    }

    fn reentrant_sink(
        logger: &Logger,
        seen: &MemorySink,
        catch: bool,
    ) -> Arc<std::sync::Mutex<Vec<bool>>> {
        let inner = logger.clone();
        let mut writer = seen.clone();
        let outcomes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&outcomes);
        logger
            .add(
                CallableSink::new(move |message: &crate::models::Message| {
                    writer.write(message)?;
                    if message.record.message == "outer" {
                        let result = inner.log(INFO, "inner");
                        recorded
                            .lock()
                            .unwrap()
                            .push(matches!(result, Err(LoggerError::Deadlock(_))));
                    }
                    Ok(())
                }),
                HandlerOptions::default().with_format("{message}").with_catch(catch),
            )
            .unwrap();
        outcomes
    }

    #[test]
    fn test_sink_logging_into_own_handler_fails_fast() {
        let logger = Logger::new();
        let seen = MemorySink::new();
        let outcomes = reentrant_sink(&logger, &seen, false);

        logger.log(INFO, "outer").unwrap();

        assert_eq!(seen.messages(), vec!["outer\n"]);
        assert_eq!(*outcomes.lock().unwrap(), vec![true]);

        logger.log(INFO, "after").unwrap();
        assert_eq!(seen.messages(), vec!["outer\n", "after\n"]);
    }

    #[test]
    fn test_sink_logging_into_own_handler_is_intercepted() {
        let logger = Logger::new();
        let seen = MemorySink::new();
        let outcomes = reentrant_sink(&logger, &seen, true);

        logger.info("outer");

        assert_eq!(seen.messages(), vec!["outer\n"]);
        assert_eq!(*outcomes.lock().unwrap(), vec![false]);
    }

    #[test]
    fn test_from_defaults_autoinit_adds_stderr_handler() {
        let defaults = Defaults {
            level: WARNING.to_string(),
            ..Defaults::default()
        };
        let logger = Logger::from_defaults(&defaults).unwrap();
        assert_eq!(logger.core.handlers.read().unwrap().len(), 1);
        assert_eq!(logger.core.min_level.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn test_from_defaults_without_autoinit() {
        let defaults = Defaults {
            autoinit: false,
            ..Defaults::default()
        };
        let logger = Logger::from_defaults(&defaults).unwrap();
        assert!(logger.core.handlers.read().unwrap().is_empty());
        assert!(logger.level(SUCCESS).is_ok());
    }

    #[test]
    fn test_min_level_skips_work() {
        let logger = Logger::new();
        logger
            .add(MemorySink::new(), HandlerOptions::default().with_level(ERROR))
            .unwrap();
        assert_eq!(logger.core.min_level.load(Ordering::SeqCst), 40);
        logger.remove_all().unwrap();
        assert_eq!(logger.core.min_level.load(Ordering::SeqCst), u32::MAX);
    }

    #[test]
    fn test_complete_flushes() {
        let (logger, _sink) = setup("{message}");
        assert!(logger.complete().is_ok());
    }
}
