//! JSON description of a `configure()` call.
//!
//! ```json
//! {
//!   "handlers": [
//!     { "sink": "stderr", "level": "INFO", "format": "{level} {message}" },
//!     { "sink": "logs/app.log", "filter": { "": "WARNING", "app::db": false } }
//!   ],
//!   "levels": [{ "name": "AUDIT", "no": 35, "color": "<magenta>" }],
//!   "extra": { "service": "billing" },
//!   "activation": [["noisy", false]]
//! }
//! ```

use super::{Config, ConfigError, Defaults, HandlerConfig};
use crate::filter::{Filter, LevelFilter};
use crate::handler::HandlerOptions;
use crate::models::{LevelRef, LevelUpdate};
use crate::sink::{FileSink, Sink, StreamSink, TracingSink};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use validator::Validate;

/// Module filter of a handler entry: a module name or a per-module level map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FilterEntry {
    /// Accept one module and its submodules.
    Module(String),
    /// Per-module settings.
    Levels(BTreeMap<String, LevelToggle>),
}

/// Setting of one module in a level map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LevelToggle {
    /// `true` accepts everything, `false` nothing.
    Enabled(bool),
    /// Minimum level.
    Level(LevelRef),
}

impl From<FilterEntry> for Filter {
    fn from(entry: FilterEntry) -> Self {
        match entry {
            FilterEntry::Module(module) => Filter::Module(module),
            FilterEntry::Levels(levels) => Filter::levels(levels.into_iter().map(
                |(module, toggle)| {
                    let setting = match toggle {
                        LevelToggle::Enabled(enabled) => LevelFilter::from(enabled),
                        LevelToggle::Level(level) => LevelFilter::Min(level),
                    };
                    (module, setting)
                },
            )),
        }
    }
}

/// One handler of a [`FileConfig`].
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct HandlerEntry {
    /// `stderr`, `stdout`, `tracing` or a file path.
    #[validate(length(min = 1, message = "Sink cannot be empty"))]
    pub sink: String,

    /// Minimum level.
    #[serde(default)]
    pub level: Option<LevelRef>,

    /// Handler format.
    #[serde(default)]
    #[validate(length(min = 1, message = "Format cannot be empty"))]
    pub format: Option<String>,

    /// Record filter.
    #[serde(default)]
    pub filter: Option<FilterEntry>,

    /// Force colors on or off.
    #[serde(default)]
    pub colorize: Option<bool>,

    /// Include backtraces.
    #[serde(default)]
    pub backtrace: Option<bool>,

    /// Intercept sink errors.
    #[serde(default)]
    pub catch: Option<bool>,

    /// Truncate file sinks instead of appending.
    #[serde(default)]
    pub truncate: bool,
}

impl HandlerEntry {
    /// Opens the sink and merges the entry over `defaults`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if a file sink cannot be opened.
    pub fn into_handler(self, defaults: &Defaults) -> Result<HandlerConfig, ConfigError> {
        let sink: Box<dyn Sink> = match self.sink.as_str() {
            "stderr" => Box::new(StreamSink::stderr()),
            "stdout" => Box::new(StreamSink::stdout()),
            "tracing" => Box::new(TracingSink::new()),
            path => Box::new(FileSink::open_with(path, !self.truncate).map_err(|source| {
                ConfigError::Io {
                    path: path.to_string(),
                    source,
                }
            })?),
        };

        let mut options = HandlerOptions::from_defaults(defaults);
        if let Some(level) = self.level {
            options.level = level;
        }
        if let Some(format) = self.format {
            options = options.with_format(format);
        }
        if let Some(filter) = self.filter {
            options.filter = filter.into();
        }
        if self.colorize.is_some() {
            options.colorize = self.colorize;
        }
        if let Some(backtrace) = self.backtrace {
            options.backtrace = backtrace;
        }
        if let Some(catch) = self.catch {
            options.catch = catch;
        }

        Ok(HandlerConfig { sink, options })
    }
}

/// A level to create or update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LevelEntry {
    /// Level name.
    #[validate(length(min = 1, message = "Level name cannot be empty"))]
    pub name: String,
    /// Severity number, required for new levels.
    #[serde(default)]
    pub no: Option<u32>,
    /// Color markup.
    #[serde(default)]
    pub color: Option<String>,
    /// Icon.
    #[serde(default)]
    pub icon: Option<String>,
}

impl From<LevelEntry> for (String, LevelUpdate) {
    fn from(entry: LevelEntry) -> Self {
        (
            entry.name,
            LevelUpdate {
                no: entry.no,
                color: entry.color,
                icon: entry.icon,
            },
        )
    }
}

/// Logger configuration loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Handlers replacing the existing ones; absent keeps them.
    #[serde(default)]
    pub handlers: Option<Vec<HandlerEntry>>,

    /// Levels to create or update.
    #[serde(default)]
    #[validate(nested)]
    pub levels: Vec<LevelEntry>,

    /// Logger-wide extra.
    #[serde(default)]
    pub extra: Option<Map<String, Value>>,

    /// `[module, enabled]` pairs.
    #[serde(default)]
    pub activation: Vec<(String, bool)>,
}

impl FileConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or fails validation.
    ///
    /// # Examples
    ///
    /// ```
    /// use logbook::config::FileConfig;
    ///
    /// let config = FileConfig::from_json(r#"{"handlers": [{"sink": "stdout", "level": 20}]}"#).unwrap();
    /// assert_eq!(config.handlers.unwrap()[0].sink, "stdout");
    ///
    /// assert!(FileConfig::from_json(r#"{"handlers": [{"sink": ""}]}"#).is_err());
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        for handler in config.handlers.iter().flatten() {
            handler.validate()?;
        }
        Ok(config)
    }

    /// Reads and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its content is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Opens the sinks and builds the programmatic configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if a file sink cannot be opened.
    pub fn into_config(self, defaults: &Defaults) -> Result<Config, ConfigError> {
        let handlers = self
            .handlers
            .map(|handlers| {
                handlers
                    .into_iter()
                    .map(|entry| entry.into_handler(defaults))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(Config {
            handlers,
            levels: self.levels.into_iter().map(Into::into).collect(),
            extra: self.extra,
            patcher: None,
            activation: self.activation,
        })
    }
}
