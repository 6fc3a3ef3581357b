//! Error type for logger operations.

use crate::config::ConfigError;
use crate::format::FormatError;
use crate::handler::HandlerId;
use crate::parse::ParseError;
use thiserror::Error;

/// Errors that can occur while configuring or using a [`Logger`](crate::Logger).
#[derive(Debug, Error)]
pub enum LoggerError {
    /// A level name was used that has not been registered.
    #[error("Level '{0}' does not exist")]
    UnknownLevel(String),

    /// A level name is empty.
    #[error("Invalid level name, it should not be empty")]
    EmptyLevelName,

    /// An existing level was given a different severity number.
    #[error("Level '{0}' already exists, you can't update its severity no")]
    LevelSeverityChange(String),

    /// A new level was declared without a severity number.
    #[error("Level '{0}' does not exist, you have to create it by specifying a level no")]
    MissingLevelNo(String),

    /// No handler has the given id.
    #[error("There is no existing handler with id {0}")]
    UnknownHandler(HandlerId),

    /// A sink failed to write, flush or stop.
    #[error("Handler #{id} failed: {source}")]
    Sink {
        /// Failing handler.
        id: HandlerId,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A sink logged back into its own handler while writing.
    #[error(
        "Could not acquire the lock of handler #{0} because it was already in use (deadlock avoided). \
This likely happened because the logger was re-used inside a sink, a filter or a patcher"
    )]
    Deadlock(HandlerId),

    /// Failed to acquire a lock on logger state.
    #[error("Failed to acquire lock on logger state")]
    LockError,

    /// A format or color markup is invalid.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Structured log parsing failed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}
