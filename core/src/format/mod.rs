//! Message formatting.
//!
//! Handler formats combine two small languages:
//!
//! - color markup (`<red>...</red>`, `<level>...</level>`), see [`markup`];
//! - `{field:spec}` placeholders resolved against the record, see [`template`].
//!
//! [`Formatter`] compiles a format once when a handler is added and renders
//! each record with or without ANSI colors.
//!
//! # Example
//!
//! ```
//! use logbook::format::Formatter;
//!
//! let formatter = Formatter::compile("<green>{level}</green> {message}").unwrap();
//! assert!(formatter.uses_field("message"));
//! ```

pub mod formatter;
pub mod markup;
pub mod template;
pub mod time;

pub use formatter::{Formatter, DEFAULT_FORMAT};
pub use markup::{parse_markup, MarkupToken, Style};
pub use template::{parse_template, Accessor, FieldPath, Spec, TemplateToken, MAX_SPEC_WIDTH};
pub use time::format_time;

use thiserror::Error;

/// Errors raised while compiling or rendering formats and markup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    /// A `<tag>` names no known color or style.
    #[error(
        "Tag '<{0}>' does not correspond to any known color directive, make sure you did not misspell it (or prepend '\\' to escape it)"
    )]
    UnknownTag(String),

    /// A closing tag appeared with nothing open.
    #[error("Closing tag '</{0}>' has no corresponding opening tag")]
    UnexpectedClosingTag(String),

    /// A closing tag does not match the most recent opening tag.
    #[error("Closing tag '</{found}>' violates nesting rules, expected '</{expected}>'")]
    MismatchedClosingTag {
        /// Tag that should have been closed.
        expected: String,
        /// Tag that was closed instead.
        found: String,
    },

    /// An opening tag is never closed.
    #[error("Tag '<{0}>' has no corresponding closing tag")]
    UnclosedTag(String),

    /// A level color contains something other than opening tags.
    #[error("Invalid level color '{0}': only opening color tags are allowed")]
    InvalidLevelColor(String),

    /// The `{}` placeholder syntax is broken.
    #[error("Invalid format string: {0}")]
    InvalidTemplate(String),

    /// A placeholder names a field records do not have.
    #[error("Unknown field '{0}' in format string")]
    UnknownField(String),

    /// `{extra[key]}` refers to a key missing from the record.
    #[error("Key '{0}' is missing from the record's extra")]
    MissingExtra(String),

    /// The `:spec` part of a placeholder cannot be parsed.
    #[error("Invalid format spec '{0}'")]
    InvalidSpec(String),

    /// A spec asks for a width or precision larger than allowed.
    #[error("Width or precision in format spec '{spec}' exceeds {max}")]
    SpecTooWide {
        /// Offending spec.
        spec: String,
        /// Largest accepted value.
        max: usize,
    },

    /// A spec sets a precision on an integer field.
    #[error("Precision not allowed in integer format specifier for field '{0}'")]
    IntegerPrecision(String),
}
