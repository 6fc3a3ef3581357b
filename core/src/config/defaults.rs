//! Environment-driven defaults.
//!
//! Values can be set via environment variables:
//! - `LOGBOOK_AUTOINIT`: add a stderr handler to the global logger (default: true)
//! - `LOGBOOK_FORMAT`: default handler format
//! - `LOGBOOK_FILTER`: default module filter
//! - `LOGBOOK_LEVEL`: default handler level (default: "DEBUG")
//! - `LOGBOOK_COLORIZE`: force colors on or off (default: auto)
//! - `LOGBOOK_BACKTRACE`: print captured backtraces (default: true)
//! - `LOGBOOK_CATCH`: intercept sink errors (default: true)
//! - `LOGBOOK_<LEVEL>_NO`, `LOGBOOK_<LEVEL>_COLOR`, `LOGBOOK_<LEVEL>_ICON` for
//!   each built-in level

use super::ConfigError;
use crate::format::DEFAULT_FORMAT;
use crate::models::level::DEBUG;
use crate::models::Level;

/// Prefix shared by every environment variable read here.
pub const ENV_PREFIX: &str = "LOGBOOK_";

const TRUTHY: [&str; 6] = ["1", "true", "yes", "y", "ok", "on"];
const FALSY: [&str; 6] = ["0", "false", "no", "n", "nok", "off"];

/// Defaults applied to new loggers and handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    /// Add a stderr handler when the global logger is first used.
    pub autoinit: bool,
    /// Handler format.
    pub format: String,
    /// Handler module filter.
    pub filter: Option<String>,
    /// Handler minimum level name.
    pub level: String,
    /// Forced colorization; `None` detects terminals.
    pub colorize: Option<bool>,
    /// Print captured backtraces with attached errors.
    pub backtrace: bool,
    /// Intercept sink errors instead of propagating them.
    pub catch: bool,
    /// Built-in levels.
    pub levels: Vec<Level>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            autoinit: true,
            format: DEFAULT_FORMAT.to_string(),
            filter: None,
            level: DEBUG.to_string(),
            colorize: None,
            backtrace: true,
            catch: true,
            levels: Level::builtins(),
        }
    }
}

impl Defaults {
    /// Reads defaults from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a boolean or integer variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads defaults through an arbitrary lookup function.
    ///
    /// # Errors
    ///
    /// Returns an error if a boolean or integer variable holds an invalid value.
    ///
    /// # Examples
    ///
    /// ```
    /// use logbook::config::Defaults;
    ///
    /// let defaults = Defaults::from_lookup(|key| match key {
    ///     "LOGBOOK_LEVEL" => Some("INFO".to_string()),
    ///     "LOGBOOK_COLORIZE" => Some("off".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(defaults.level, "INFO");
    /// assert_eq!(defaults.colorize, Some(false));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let levels = base
            .levels
            .into_iter()
            .map(|level| {
                let prefix = level.name.clone();
                Ok(Level {
                    no: env_int(&var, &format!("{prefix}_NO"))?.unwrap_or(level.no),
                    color: var(&format!("{prefix}_COLOR")).unwrap_or(level.color),
                    icon: var(&format!("{prefix}_ICON")).unwrap_or(level.icon),
                    name: level.name,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            autoinit: env_bool(&var, "AUTOINIT")?.unwrap_or(base.autoinit),
            format: var("FORMAT").unwrap_or(base.format),
            filter: var("FILTER").or(base.filter),
            level: var("LEVEL").unwrap_or(base.level),
            colorize: env_bool(&var, "COLORIZE")?.or(base.colorize),
            backtrace: env_bool(&var, "BACKTRACE")?.unwrap_or(base.backtrace),
            catch: env_bool(&var, "CATCH")?.unwrap_or(base.catch),
            levels,
        })
    }
}

fn env_bool<F>(var: &F, name: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = var(name) else {
        return Ok(None);
    };
    let lowered = value.to_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        Ok(Some(true))
    } else if FALSY.contains(&lowered.as_str()) {
        Ok(Some(false))
    } else {
        Err(ConfigError::InvalidBool {
            key: format!("{ENV_PREFIX}{name}"),
            value,
        })
    }
}

fn env_int<F>(var: &F, name: &str) -> Result<Option<u32>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|value| {
            value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidInt {
                key: format!("{ENV_PREFIX}{name}"),
                value,
            })
        })
        .transpose()
}
