//! Record filters attached to handlers.

use crate::error::LoggerError;
use crate::models::{LevelRef, Record};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Per-module setting of a [`Filter::Levels`] map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelFilter {
    /// Accept every record of the module.
    On,
    /// Reject every record of the module.
    Off,
    /// Accept records at or above the level.
    Min(LevelRef),
}

impl From<bool> for LevelFilter {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::On
        } else {
            Self::Off
        }
    }
}

impl From<&str> for LevelFilter {
    fn from(level: &str) -> Self {
        Self::Min(level.into())
    }
}

impl From<u32> for LevelFilter {
    fn from(no: u32) -> Self {
        Self::Min(no.into())
    }
}

/// Selects which records a handler accepts, on top of its minimum level.
///
/// Module names use `::` separators, as produced by `module_path!()`.
///
/// # Example
///
/// ```
/// use logbook::filter::{Filter, LevelFilter};
///
/// let by_module = Filter::from("app::db");
/// let by_level = Filter::levels([("", LevelFilter::from("INFO")), ("app::db", LevelFilter::Off)]);
/// # let _ = (by_module, by_level);
/// ```
#[derive(Clone, Default)]
pub enum Filter {
    /// Accept everything.
    #[default]
    All,
    /// Accept records whose name is the module or one of its submodules.
    Module(String),
    /// Per-module minimum levels; `""` is the root and the most specific
    /// module wins.
    Levels(Vec<(String, LevelFilter)>),
    /// Arbitrary predicate.
    Callable(Arc<dyn Fn(&Record) -> bool + Send + Sync>),
}

impl Filter {
    /// Builds a [`Filter::Levels`] from `(module, setting)` pairs.
    #[must_use]
    pub fn levels<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, LevelFilter)>,
        K: Into<String>,
    {
        Self::Levels(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds a [`Filter::Callable`].
    #[must_use]
    pub fn callable<F>(predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self::Callable(Arc::new(predicate))
    }

    /// Resolves level names so the filter can run without the logger.
    pub(crate) fn compile<F>(&self, resolve: F) -> Result<CompiledFilter, LoggerError>
    where
        F: Fn(&LevelRef) -> Result<u32, LoggerError>,
    {
        Ok(match self {
            Self::All => CompiledFilter::All,
            Self::Module(name) if name.is_empty() => CompiledFilter::All,
            Self::Module(name) => CompiledFilter::Module {
                name: name.clone(),
                prefix: format!("{name}::"),
            },
            Self::Levels(entries) if entries.is_empty() => CompiledFilter::All,
            Self::Levels(entries) => {
                let mut levels = HashMap::with_capacity(entries.len());
                for (module, setting) in entries {
                    let min = match setting {
                        LevelFilter::On => Some(0),
                        LevelFilter::Off => None,
                        LevelFilter::Min(level) => Some(resolve(level)?),
                    };
                    levels.insert(module.clone(), min);
                }
                CompiledFilter::Levels(levels)
            }
            Self::Callable(predicate) => CompiledFilter::Callable(Arc::clone(predicate)),
        })
    }
}

impl From<&str> for Filter {
    fn from(module: &str) -> Self {
        Self::Module(module.to_string())
    }
}

impl From<String> for Filter {
    fn from(module: String) -> Self {
        Self::Module(module)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Module(name) => f.debug_tuple("Module").field(name).finish(),
            Self::Levels(entries) => f.debug_tuple("Levels").field(entries).finish(),
            Self::Callable(_) => f.write_str("Callable(<fn>)"),
        }
    }
}

/// A filter with level names resolved to severity numbers.
#[derive(Clone)]
pub(crate) enum CompiledFilter {
    All,
    Module { name: String, prefix: String },
    /// `None` disables the module.
    Levels(HashMap<String, Option<u32>>),
    Callable(Arc<dyn Fn(&Record) -> bool + Send + Sync>),
}

impl CompiledFilter {
    pub(crate) fn accepts(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::Module { name, prefix } => record
                .name
                .as_deref()
                .is_some_and(|n| n == name || n.starts_with(prefix.as_str())),
            Self::Levels(levels) => accepts_level(levels, record),
            Self::Callable(predicate) => predicate(record),
        }
    }
}

fn accepts_level(levels: &HashMap<String, Option<u32>>, record: &Record) -> bool {
    let mut module = record.name.as_deref().unwrap_or("");
    loop {
        if let Some(min) = levels.get(module) {
            return min.is_some_and(|no| record.level.no >= no);
        }
        if module.is_empty() {
            return true;
        }
        module = module.rfind("::").map_or("", |i| &module[..i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Callsite, RecordLevel};
    use std::time::Duration;

    fn record(name: Option<&'static str>, no: u32) -> Record {
        let callsite = Callsite {
            module_path: name,
            file: "src/lib.rs",
            line: 1,
            function: None,
        };
        let level = RecordLevel {
            name: format!("Level {no}"),
            no,
            icon: " ".to_string(),
        };
        Record::new(&callsite, level, "msg", Duration::ZERO)
    }

    fn resolve(level: &LevelRef) -> Result<u32, LoggerError> {
        match level {
            LevelRef::No(no) => Ok(*no),
            LevelRef::Name(name) if name == "INFO" => Ok(20),
            LevelRef::Name(name) if name == "WARNING" => Ok(30),
            LevelRef::Name(name) => Err(LoggerError::UnknownLevel(name.clone())),
        }
    }

    #[test]
    fn test_module_filter() {
        let filter = Filter::from("app::db").compile(resolve).unwrap();
        assert!(filter.accepts(&record(Some("app::db"), 10)));
        assert!(filter.accepts(&record(Some("app::db::pool"), 10)));
        assert!(!filter.accepts(&record(Some("app::dbx"), 10)));
        assert!(!filter.accepts(&record(Some("app"), 10)));
        assert!(!filter.accepts(&record(None, 10)));
    }

    #[test]
    fn test_empty_module_accepts_all() {
        let filter = Filter::from("").compile(resolve).unwrap();
        assert!(filter.accepts(&record(None, 10)));
        assert!(filter.accepts(&record(Some("anything"), 10)));
    }

    #[test]
    fn test_levels_most_specific_wins() {
        let filter = Filter::levels([
            ("", LevelFilter::from("WARNING")),
            ("app", LevelFilter::from("INFO")),
            ("app::noisy", LevelFilter::Off),
            ("app::debug", LevelFilter::On),
        ])
        .compile(resolve)
        .unwrap();

        assert!(!filter.accepts(&record(Some("other"), 20)));
        assert!(filter.accepts(&record(Some("other"), 30)));
        assert!(filter.accepts(&record(Some("app::api"), 20)));
        assert!(!filter.accepts(&record(Some("app::api"), 10)));
        assert!(!filter.accepts(&record(Some("app::noisy::inner"), 50)));
        assert!(filter.accepts(&record(Some("app::debug"), 1)));
        assert!(!filter.accepts(&record(None, 20)));
        assert!(filter.accepts(&record(None, 40)));
    }

    #[test]
    fn test_levels_without_root_accept_unmatched() {
        let filter = Filter::levels([("app", LevelFilter::Off)])
            .compile(resolve)
            .unwrap();
        assert!(filter.accepts(&record(Some("lib"), 5)));
        assert!(!filter.accepts(&record(Some("app::x"), 50)));
    }

    #[test]
    fn test_levels_unknown_level_name() {
        let result = Filter::levels([("app", LevelFilter::from("LOUD"))]).compile(resolve);
        assert!(matches!(result, Err(LoggerError::UnknownLevel(name)) if name == "LOUD"));
    }

    #[test]
    fn test_callable_filter() {
        let filter = Filter::callable(|r| r.level.no % 2 == 0)
            .compile(resolve)
            .unwrap();
        assert!(filter.accepts(&record(None, 20)));
        assert!(!filter.accepts(&record(None, 21)));
    }
}
