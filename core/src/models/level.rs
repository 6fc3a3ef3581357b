//! Severity level model.
//!
//! Defines the `Level` descriptor registered on a logger and the `LevelRef`
//! used by callers to point at one.

use serde::{Deserialize, Serialize};

/// Name of the built-in `TRACE` level.
pub const TRACE: &str = "TRACE";
/// Name of the built-in `DEBUG` level.
pub const DEBUG: &str = "DEBUG";
/// Name of the built-in `INFO` level.
pub const INFO: &str = "INFO";
/// Name of the built-in `SUCCESS` level.
pub const SUCCESS: &str = "SUCCESS";
/// Name of the built-in `WARNING` level.
pub const WARNING: &str = "WARNING";
/// Name of the built-in `ERROR` level.
pub const ERROR: &str = "ERROR";
/// Name of the built-in `CRITICAL` level.
pub const CRITICAL: &str = "CRITICAL";

/// A severity level known to a logger.
///
/// # Example
///
/// ```
/// use logbook::models::Level;
///
/// let notice = Level::new("NOTICE", 25, "<yellow>", "!");
/// assert_eq!(notice.no, 25);
/// assert_eq!(notice.to_string(), "NOTICE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Level {
    /// Unique level name.
    pub name: String,

    /// Severity number; higher is more severe.
    pub no: u32,

    /// Color markup applied by the `<level>` tag, e.g. `<red><bold>`.
    #[serde(default)]
    pub color: String,

    /// Icon available to formats as `{level.icon}`.
    #[serde(default)]
    pub icon: String,
}

impl Level {
    /// Creates a new level descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        no: u32,
        color: impl Into<String>,
        icon: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            no,
            color: color.into(),
            icon: icon.into(),
        }
    }

    /// Returns the seven built-in levels with their stock severity, color and icon.
    ///
    /// # Example
    ///
    /// ```
    /// use logbook::models::Level;
    ///
    /// let levels = Level::builtins();
    /// assert_eq!(levels.len(), 7);
    /// assert_eq!(levels[0].name, "TRACE");
    /// assert_eq!(levels[6].no, 50);
    /// ```
    #[must_use]
    pub fn builtins() -> Vec<Self> {
        vec![
            Self::new(TRACE, 5, "<cyan><bold>", "\u{270F}\u{FE0F}"),
            Self::new(DEBUG, 10, "<blue><bold>", "\u{1F41E}"),
            Self::new(INFO, 20, "<bold>", "\u{2139}\u{FE0F}"),
            Self::new(SUCCESS, 25, "<green><bold>", "\u{2705}"),
            Self::new(WARNING, 30, "<yellow><bold>", "\u{26A0}\u{FE0F}"),
            Self::new(ERROR, 40, "<red><bold>", "\u{274C}"),
            Self::new(CRITICAL, 50, "<RED><bold>", "\u{2620}\u{FE0F}"),
        ]
    }

    /// Describes an anonymous severity used when logging with a raw number.
    #[must_use]
    pub fn anonymous(no: u32) -> Self {
        Self::new(format!("Level {no}"), no, "", " ")
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Reference to a level, either by registered name or by raw severity number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelRef {
    /// A registered level name such as `"INFO"`.
    Name(String),
    /// A raw severity number.
    No(u32),
}

impl Default for LevelRef {
    fn default() -> Self {
        Self::Name(DEBUG.to_string())
    }
}

impl std::fmt::Display for LevelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::No(no) => write!(f, "{no}"),
        }
    }
}

impl From<&str> for LevelRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for LevelRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<u32> for LevelRef {
    fn from(no: u32) -> Self {
        Self::No(no)
    }
}

impl From<&Level> for LevelRef {
    fn from(level: &Level) -> Self {
        Self::Name(level.name.clone())
    }
}

/// Changes requested for a level through `Logger::set_level`.
///
/// A new level needs `no`; an existing level only accepts `color` and `icon`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelUpdate {
    /// Severity number (mandatory when creating a level).
    pub no: Option<u32>,
    /// New color markup.
    pub color: Option<String>,
    /// New icon.
    pub icon: Option<String>,
}

impl LevelUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the severity number.
    #[must_use]
    pub fn with_no(mut self, no: u32) -> Self {
        self.no = Some(no);
        self
    }

    /// Sets the color markup.
    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Sets the icon.
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}
