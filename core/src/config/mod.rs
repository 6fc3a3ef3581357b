//! Logger configuration.
//!
//! [`Defaults`] come from `LOGBOOK_*` environment variables, [`Config`] is the
//! programmatic argument of [`Logger::configure`](crate::Logger::configure),
//! and [`FileConfig`] describes the same thing as validated JSON.

pub mod defaults;
pub mod file;

pub use defaults::{Defaults, ENV_PREFIX};
pub use file::{FileConfig, FilterEntry, HandlerEntry, LevelEntry, LevelToggle};

use crate::handler::HandlerOptions;
use crate::logger::Patcher;
use crate::models::LevelUpdate;
use crate::sink::Sink;
use serde_json::{Map, Value};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A boolean environment variable has an unrecognized value.
    #[error("Invalid environment variable '{key}' (expected a boolean): '{value}'")]
    InvalidBool {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },

    /// An integer environment variable has an unparsable value.
    #[error("Invalid environment variable '{key}' (expected an integer): '{value}'")]
    InvalidInt {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },

    /// A configuration file failed validation.
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// A configuration file or file sink could not be opened.
    #[error("Failed to open '{path}': {source}")]
    Io {
        /// Path being opened.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON.
    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// A handler to install through [`Logger::configure`](crate::Logger::configure).
pub struct HandlerConfig {
    /// Destination of formatted messages.
    pub sink: Box<dyn Sink>,
    /// Handler options.
    pub options: HandlerOptions,
}

impl HandlerConfig {
    /// Pairs a sink with its options.
    #[must_use]
    pub fn new(sink: impl Sink + 'static, options: HandlerOptions) -> Self {
        Self {
            sink: Box::new(sink),
            options,
        }
    }
}

impl std::fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("sink", &self.sink.describe())
            .field("options", &self.options)
            .finish()
    }
}

/// Arguments of [`Logger::configure`](crate::Logger::configure).
///
/// Every part is optional; `handlers: Some(..)` replaces all existing
/// handlers while `None` leaves them untouched.
#[derive(Default)]
pub struct Config {
    /// Handlers replacing the current ones.
    pub handlers: Option<Vec<HandlerConfig>>,
    /// Levels to create or update, in order.
    pub levels: Vec<(String, LevelUpdate)>,
    /// Extra dict replacing the logger-wide one.
    pub extra: Option<Map<String, Value>>,
    /// Patcher replacing the logger-wide one.
    pub patcher: Option<Patcher>,
    /// `(name, enabled)` pairs applied through `enable`/`disable`.
    pub activation: Vec<(String, bool)>,
}

impl Config {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler; the first call switches to replacing all handlers.
    #[must_use]
    pub fn with_handler(mut self, sink: impl Sink + 'static, options: HandlerOptions) -> Self {
        self.handlers
            .get_or_insert_with(Vec::new)
            .push(HandlerConfig::new(sink, options));
        self
    }

    /// Adds a level to create or update.
    #[must_use]
    pub fn with_level(mut self, name: impl Into<String>, update: LevelUpdate) -> Self {
        self.levels.push((name.into(), update));
        self
    }

    /// Replaces the logger-wide extra dict.
    #[must_use]
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Replaces the logger-wide patcher.
    #[must_use]
    pub fn with_patcher<F>(mut self, patcher: F) -> Self
    where
        F: Fn(&mut crate::models::Record) + Send + Sync + 'static,
    {
        self.patcher = Some(std::sync::Arc::new(patcher));
        self
    }

    /// Enables or disables records from `name` and its submodules.
    #[must_use]
    pub fn with_activation(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.activation.push((name.into(), enabled));
        self
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("handlers", &self.handlers)
            .field("levels", &self.levels)
            .field("extra", &self.extra)
            .field("patcher", &self.patcher.as_ref().map(|_| "<fn>"))
            .field("activation", &self.activation)
            .finish()
    }
}
