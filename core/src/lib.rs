//! Logbook
//!
//! A logging library built around a single facade: add sinks, log at
//! severity levels, bind context, catch errors, and parse the logs back.
//!
//! # Modules
//!
//! - [`models`] - Levels and records
//! - [`format`] - Color markup, `{field}` templates and time formatting
//! - [`sink`] - Destinations of formatted messages
//! - [`handler`] - Sinks with their level, filter and format
//! - [`filter`] - Module and per-module level filters
//! - [`logger`] - The [`Logger`] facade
//! - [`catch`] - Logging errors and panics escaping a closure
//! - [`parse`] - Regex-driven parsing of log files
//! - [`config`] - Environment defaults and JSON configuration
//!
//! # Example
//!
//! ```
//! use logbook::handler::HandlerOptions;
//! use logbook::sink::MemorySink;
//! use logbook::{info, Logger};
//!
//! let logger = Logger::new();
//! let sink = MemorySink::new();
//! logger
//!     .add(sink.clone(), HandlerOptions::default().with_format("{level} {function} {message}"))
//!     .unwrap();
//!
//! fn work(logger: &Logger) {
//!     info!(logger: logger, "processed {} items", 3);
//! }
//! work(&logger);
//!
//! assert_eq!(sink.messages(), vec!["INFO work processed 3 items\n".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catch;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod format;
pub mod handler;
pub mod logger;
mod macros;
pub mod models;
pub mod parse;
pub mod sink;

pub use catch::Catcher;
pub use config::{Config, Defaults};
pub use context::ContextGuard;
pub use error::LoggerError;
pub use filter::{Filter, LevelFilter};
pub use handler::{HandlerId, HandlerOptions};
pub use logger::{Args, Logger, Opt};
pub use models::{Level, LevelRef, LevelUpdate, Record};

/// Re-export common dependencies for convenience.
pub use regex;
pub use serde_json;

use std::sync::OnceLock;

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// The process-wide logger used by the macros without a `logger:` argument.
///
/// Built on first use from the `LOGBOOK_*` environment variables, with a
/// stderr handler unless `LOGBOOK_AUTOINIT` is off. Invalid variables fall
/// back to the built-in defaults.
pub fn logger() -> &'static Logger {
    LOGGER.get_or_init(|| {
        Logger::from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Invalid logbook environment, using built-in defaults");
            Logger::from_defaults(&Defaults::default()).unwrap_or_default()
        })
    })
}
