//! Logbook CLI
//!
//! Command-line interface for parsing log files, emitting records through a
//! configured logger and checking handler formats.
//!
//! # Usage
//!
//! ```bash
//! logbook --help
//! logbook parse app.log --pattern '(?P<no>\d+) \| (?P<message>.*)' --cast no=int
//! logbook emit --config logbook.json --level WARNING --message "disk almost full"
//! logbook levels --json
//! logbook format "<green>{time:HH:mm:ss}</green> <level>{level}</level> {message}"
//! ```

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logbook::config::{Defaults, FileConfig};
use logbook::format::markup::level_ansi;
use logbook::format::Formatter;
use logbook::models::RecordLevel;
use logbook::parse::{casters, Cast, Caster, DEFAULT_CHUNK};
use logbook::{Args, Logger, Record};
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logbook CLI - parse, emit and format logs
#[derive(Parser)]
#[command(name = "logbook")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the named groups of every regex match in a file as JSON lines
    Parse {
        /// Log file to read
        file: PathBuf,

        /// Regular expression with named groups
        #[arg(short, long)]
        pattern: String,

        /// Group conversion: NAME=int|float|bool|datetime:FORMAT
        #[arg(short, long = "cast", value_parser = parse_cast)]
        casts: Vec<(String, CastKind)>,

        /// Number of bytes read at once
        #[arg(long, default_value_t = DEFAULT_CHUNK)]
        chunk: usize,
    },

    /// Log one message through a logger built from the environment
    Emit {
        /// JSON configuration applied to the logger
        #[arg(short, long, env = "LOGBOOK_CONFIG")]
        config: Option<PathBuf>,

        /// Level name or severity number
        #[arg(short, long, default_value = "INFO")]
        level: String,

        /// Message text
        #[arg(short, long)]
        message: String,

        /// KEY=VALUE pair bound to the record's extra
        #[arg(short, long = "extra", value_parser = parse_key_value)]
        extra: Vec<(String, String)>,
    },

    /// List the registered levels
    Levels {
        /// JSON configuration declaring additional levels
        #[arg(short, long, env = "LOGBOOK_CONFIG")]
        config: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Validate a handler format and render a sample record with it
    Format {
        /// Handler format
        format: String,

        /// Level of the sample record
        #[arg(short, long, default_value = "INFO")]
        level: String,

        /// Emit ANSI colors
        #[arg(long)]
        colorize: bool,
    },
}

/// Conversion requested with `--cast`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CastKind {
    Integer,
    Float,
    Boolean,
    Datetime(String),
}

impl CastKind {
    fn caster(&self) -> Caster {
        match self {
            Self::Integer => casters::integer(),
            Self::Float => casters::float(),
            Self::Boolean => casters::boolean(),
            Self::Datetime(format) => casters::datetime(format),
        }
    }
}

fn parse_cast(s: &str) -> Result<(String, CastKind), String> {
    let (name, kind) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=TYPE, got '{s}'"))?;
    if name.is_empty() {
        return Err(format!("missing group name in '{s}'"));
    }
    let kind = match kind {
        "int" | "integer" => CastKind::Integer,
        "float" => CastKind::Float,
        "bool" | "boolean" => CastKind::Boolean,
        other => match other.strip_prefix("datetime:") {
            Some(format) if !format.is_empty() => CastKind::Datetime(format.to_string()),
            _ => return Err(format!("unknown cast type '{other}'")),
        },
    };
    Ok((name.to_string(), kind))
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Builds a logger from `LOGBOOK_*` defaults and an optional JSON file.
fn build_logger(config: Option<&Path>) -> Result<Logger> {
    let defaults = Defaults::from_env().context("Invalid LOGBOOK_* environment")?;
    let logger = Logger::from_defaults(&defaults)?;
    if let Some(path) = config {
        let file = FileConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?;
        let ids = logger.configure(file.into_config(&defaults)?)?;
        tracing::debug!(config = %path.display(), handlers = ids.len(), "Configuration applied");
    }
    Ok(logger)
}

fn level_ref(level: &str) -> logbook::LevelRef {
    level
        .parse::<u32>()
        .map_or_else(|_| logbook::LevelRef::from(level), logbook::LevelRef::from)
}

fn run_parse(file: &Path, pattern: &str, casts: Vec<(String, CastKind)>, chunk: usize) -> Result<()> {
    let pattern = Regex::new(pattern).context("Invalid pattern")?;
    let cast = if casts.is_empty() {
        Cast::None
    } else {
        Cast::fields(casts.into_iter().map(|(name, kind)| (name, kind.caster())))
    };
    let reader = std::fs::File::open(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut count = 0usize;
    for row in Logger::parse(reader, pattern, cast, chunk) {
        writeln!(out, "{}", serde_json::to_string(&row?)?)?;
        count += 1;
    }
    tracing::debug!(file = %file.display(), matches = count, "Parsed log file");
    Ok(())
}

fn run_emit(config: Option<&Path>, level: &str, message: &str, extra: Vec<(String, String)>) -> Result<()> {
    let logger = extra
        .into_iter()
        .fold(build_logger(config)?, |logger, (key, value)| logger.bind(key, value));
    logger.log_at(logbook::callsite!(), level_ref(level), &message, Args::new())?;
    logger.complete()?;
    Ok(())
}

fn run_levels(config: Option<&Path>, json: bool) -> Result<()> {
    let logger = build_logger(config)?;
    let levels = logger.levels()?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&levels)?)?;
    } else {
        for level in levels {
            writeln!(out, "{:>3}  {:<10} {:<16} {}", level.no, level.name, level.color, level.icon)?;
        }
    }
    Ok(())
}

fn run_format(format: &str, level: &str, colorize: bool) -> Result<()> {
    let formatter = Formatter::compile(format).context("Invalid format")?;
    let logger = Logger::new();
    let level = logger.level(level)?;
    let ansi = level_ansi(&level.color)?;

    let mut record = Record::new(
        &logbook::callsite!(),
        RecordLevel {
            name: level.name,
            no: level.no,
            icon: level.icon,
        },
        "Sample message",
        Duration::from_millis(1234),
    );
    record
        .extra
        .insert("user".to_string(), serde_json::Value::from("alice"));

    let rendered = formatter
        .render(&record, colorize, &ansi)
        .context("Failed to render sample record")?;
    println!("{rendered}");
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Parse {
            file,
            pattern,
            casts,
            chunk,
        }) => run_parse(&file, &pattern, casts, chunk),
        Some(Commands::Emit {
            config,
            level,
            message,
            extra,
        }) => run_emit(config.as_deref(), &level, &message, extra),
        Some(Commands::Levels { config, json }) => run_levels(config.as_deref(), json),
        Some(Commands::Format {
            format,
            level,
            colorize,
        }) => run_format(&format, &level, colorize),
        None => {
            println!("Logbook CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["logbook"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_parse_command_with_casts() {
        let cli = Cli::try_parse_from([
            "logbook",
            "parse",
            "app.log",
            "--pattern",
            r"(?P<no>\d+)",
            "--cast",
            "no=int",
            "-c",
            "at=datetime:%Y-%m-%d",
            "--chunk",
            "128",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Parse { file, casts, chunk, .. }) => {
                assert_eq!(file, PathBuf::from("app.log"));
                assert_eq!(chunk, 128);
                assert_eq!(
                    casts,
                    vec![
                        ("no".to_string(), CastKind::Integer),
                        ("at".to_string(), CastKind::Datetime("%Y-%m-%d".to_string())),
                    ]
                );
            }
            _ => panic!("expected parse command"),
        }
    }

    #[test]
    fn test_invalid_cast_rejected() {
        assert!(parse_cast("no").is_err());
        assert!(parse_cast("=int").is_err());
        assert!(parse_cast("no=decimal").is_err());
        assert!(parse_cast("at=datetime:").is_err());
        assert_eq!(parse_cast("ok=bool"), Ok(("ok".to_string(), CastKind::Boolean)));
    }

    #[test]
    fn test_emit_command() {
        let cli = Cli::try_parse_from([
            "logbook", "emit", "--level", "WARNING", "--message", "hello", "-e", "user=bob",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Emit { level, message, extra, .. }) => {
                assert_eq!(level, "WARNING");
                assert_eq!(message, "hello");
                assert_eq!(extra, vec![("user".to_string(), "bob".to_string())]);
            }
            _ => panic!("expected emit command"),
        }
    }

    #[test]
    fn test_emit_requires_message() {
        assert!(Cli::try_parse_from(["logbook", "emit"]).is_err());
    }

    #[test]
    fn test_key_value_parser() {
        assert_eq!(
            parse_key_value("a=b=c"),
            Ok(("a".to_string(), "b=c".to_string()))
        );
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_level_ref_from_argument() {
        assert_eq!(level_ref("25"), logbook::LevelRef::No(25));
        assert_eq!(level_ref("INFO"), logbook::LevelRef::Name("INFO".to_string()));
    }

    #[test]
    fn test_run_parse_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "1 | start\n2 | stop\n").unwrap();
        let casts = vec![("no".to_string(), CastKind::Integer)];
        assert!(run_parse(&path, r"(?P<no>\d+) \| (?P<message>\w+)", casts, 4).is_ok());
    }

    #[test]
    fn test_run_format_rejects_bad_format() {
        assert!(run_format("{message", "INFO", false).is_err());
        assert!(run_format("<red>{message}", "INFO", false).is_err());
        assert!(run_format("{level} {extra[user]} {message}", "INFO", false).is_ok());
    }
}
