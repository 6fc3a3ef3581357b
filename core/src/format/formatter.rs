//! Compiled handler formats.

use super::markup::{parse_markup, MarkupToken, Painter, Style, TagChecker};
use super::template::{parse_template, Accessor, FieldPath, FieldValue, Spec, TemplateToken};
use super::time::{format_time, DEFAULT_TIME_FORMAT};
use super::FormatError;
use crate::models::Record;
use serde_json::{Map, Value};
use std::time::Duration;

/// Format used by handlers that do not set one.
pub const DEFAULT_FORMAT: &str = "<green>{time:YYYY-MM-DD HH:mm:ss.SSS}</green> | \
<level>{level: <8}</level> | \
<cyan>{name}</cyan>:<cyan>{function}</cyan>:<cyan>{line}</cyan> - <level>{message}</level>";

const RECORD_FIELDS: [&str; 13] = [
    "elapsed",
    "exception",
    "extra",
    "file",
    "function",
    "level",
    "line",
    "message",
    "module",
    "name",
    "process",
    "thread",
    "time",
];

#[derive(Debug, Clone)]
enum FieldSpec {
    Plain,
    Time(String),
    Padded(Spec),
}

#[derive(Debug, Clone)]
enum Piece {
    Text(String),
    Open(Style),
    Close,
    Field { path: FieldPath, spec: FieldSpec },
}

/// Options for one rendering pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderContext<'a> {
    /// Emit ANSI codes instead of stripping markup.
    pub colorize: bool,
    /// ANSI sequence for `<level>`.
    pub level_ansi: &'a str,
    /// Markup of the message when the caller opted into message colors.
    pub message_markup: Option<&'a [MarkupToken]>,
    /// Include captured backtraces in `{exception}`.
    pub backtrace: bool,
}

/// A validated handler format.
///
/// # Example
///
/// ```
/// use logbook::format::Formatter;
///
/// assert!(Formatter::compile("{level.no} {extra[user]}").is_ok());
/// assert!(Formatter::compile("{unknown}").is_err());
/// assert!(Formatter::compile("<red>{message}").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Formatter {
    pieces: Vec<Piece>,
}

impl Formatter {
    /// Compiles a format, checking markup nesting, field names and specs.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] describing the first problem found.
    pub fn compile(format: &str) -> Result<Self, FormatError> {
        let mut pieces = Vec::new();
        let mut checker = TagChecker::new();

        for token in parse_template(format)? {
            match token {
                TemplateToken::Literal(text) => {
                    for markup in parse_markup(&text)? {
                        checker.feed(&markup)?;
                        pieces.push(match markup {
                            MarkupToken::Text(text) => Piece::Text(text),
                            MarkupToken::Open { style, .. } => Piece::Open(style),
                            MarkupToken::Close { .. } => Piece::Close,
                        });
                    }
                }
                TemplateToken::Field { path, spec } => {
                    validate_path(&path)?;
                    let spec = match (path.name.as_str(), spec) {
                        ("time", spec) => FieldSpec::Time(
                            spec.filter(|spec| !spec.is_empty())
                                .unwrap_or_else(|| DEFAULT_TIME_FORMAT.to_string()),
                        ),
                        (_, Some(spec)) => {
                            let spec = Spec::parse(&spec)?;
                            if spec.precision.is_some() && is_integer_field(&path) {
                                return Err(FormatError::IntegerPrecision(path.to_string()));
                            }
                            FieldSpec::Padded(spec)
                        }
                        (_, None) => FieldSpec::Plain,
                    };
                    pieces.push(Piece::Field { path, spec });
                }
            }
        }

        checker.finish()?;
        Ok(Self { pieces })
    }

    /// Returns whether the format references the top-level field `name`.
    #[must_use]
    pub fn uses_field(&self, name: &str) -> bool {
        self.pieces
            .iter()
            .any(|p| matches!(p, Piece::Field { path, .. } if path.name == name))
    }

    /// Renders a record.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::MissingExtra`] when an `{extra[key]}` is absent.
    pub fn render(
        &self,
        record: &Record,
        colorize: bool,
        level_ansi: &str,
    ) -> Result<String, FormatError> {
        self.render_with(
            record,
            &RenderContext {
                colorize,
                level_ansi,
                message_markup: None,
                backtrace: false,
            },
        )
    }

    pub(crate) fn render_with(
        &self,
        record: &Record,
        ctx: &RenderContext<'_>,
    ) -> Result<String, FormatError> {
        let mut painter = Painter::new(ctx.colorize, ctx.level_ansi);

        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => painter.text(text),
                Piece::Open(style) => painter.open(style),
                Piece::Close => painter.close(),
                Piece::Field { path, spec } => {
                    if let (Some(markup), "message", FieldSpec::Plain) =
                        (ctx.message_markup, path.name.as_str(), spec)
                    {
                        painter.tokens(markup);
                        continue;
                    }
                    let text = match spec {
                        FieldSpec::Time(format) => format_time(&record.time, format),
                        FieldSpec::Plain => {
                            plain(&resolve(record, &path.name, &path.accessors, ctx.backtrace)?)
                        }
                        FieldSpec::Padded(spec) => {
                            spec.apply(&resolve(record, &path.name, &path.accessors, ctx.backtrace)?)
                        }
                    };
                    painter.text(&text);
                }
            }
        }

        Ok(painter.finish())
    }
}

/// Formats a message template against named arguments and, optionally, the record.
///
/// Placeholders that cannot be resolved are kept verbatim.
pub(crate) fn render_message(
    template: &str,
    args: &Map<String, Value>,
    record: Option<&Record>,
) -> String {
    let Ok(tokens) = parse_template(template) else {
        return template.to_string();
    };

    let mut out = String::with_capacity(template.len());
    for token in tokens {
        match token {
            TemplateToken::Literal(text) => out.push_str(&text),
            TemplateToken::Field { path, spec } => {
                match resolve_argument(&path, spec.as_deref(), args, record) {
                    Some(text) => out.push_str(&text),
                    None => {
                        out.push('{');
                        out.push_str(&path.to_string());
                        if let Some(spec) = spec {
                            out.push(':');
                            out.push_str(&spec);
                        }
                        out.push('}');
                    }
                }
            }
        }
    }
    out
}

fn resolve_argument(
    path: &FieldPath,
    spec: Option<&str>,
    args: &Map<String, Value>,
    record: Option<&Record>,
) -> Option<String> {
    let value = if let Some(arg) = args.get(&path.name) {
        json_field(lookup_json(arg, &path.accessors)?)
    } else if let (Some(record), "record") = (record, path.name.as_str()) {
        let (first, rest) = path.accessors.split_first()?;
        let name = match first {
            Accessor::Key(name) | Accessor::Attr(name) => name,
        };
        if let ("time", Some(format)) = (name.as_str(), spec) {
            let format = if format.is_empty() { DEFAULT_TIME_FORMAT } else { format };
            return Some(format_time(&record.time, format));
        }
        resolve(record, name, rest, false).ok()?
    } else {
        return None;
    };

    match spec {
        Some(spec) => {
            let spec = Spec::parse(spec).ok()?;
            if spec.precision.is_some() && matches!(value, FieldValue::Int(_)) {
                return None;
            }
            Some(spec.apply(&value))
        }
        None => Some(plain(&value)),
    }
}

/// Fields rendered as integers, which take no precision.
fn is_integer_field(path: &FieldPath) -> bool {
    match (path.name.as_str(), path.accessors.as_slice()) {
        ("line", []) | ("thread" | "process", []) => true,
        ("level", [Accessor::Attr(attr)]) => attr == "no",
        ("thread" | "process", [Accessor::Attr(attr)]) => attr == "id",
        _ => false,
    }
}

fn validate_path(path: &FieldPath) -> Result<(), FormatError> {
    let unknown = || FormatError::UnknownField(path.to_string());
    if !RECORD_FIELDS.contains(&path.name.as_str()) {
        return Err(unknown());
    }
    match (path.name.as_str(), path.accessors.as_slice()) {
        (_, []) | ("extra", [Accessor::Key(_), ..]) => Ok(()),
        ("level", [Accessor::Attr(a)]) if matches!(a.as_str(), "name" | "no" | "icon") => Ok(()),
        ("file", [Accessor::Attr(a)]) if matches!(a.as_str(), "name" | "path") => Ok(()),
        ("thread" | "process", [Accessor::Attr(a)]) if matches!(a.as_str(), "id" | "name") => {
            Ok(())
        }
        _ => Err(unknown()),
    }
}

fn resolve(
    record: &Record,
    name: &str,
    accessors: &[Accessor],
    backtrace: bool,
) -> Result<FieldValue, FormatError> {
    let attr = match accessors {
        [] => None,
        [Accessor::Attr(a)] => Some(a.as_str()),
        _ if name == "extra" => None,
        _ => return Err(unknown_field(name, accessors)),
    };

    let value = match (name, attr) {
        ("time", None) => FieldValue::Str(format_time(&record.time, DEFAULT_TIME_FORMAT)),
        ("elapsed", None) => FieldValue::Str(format_elapsed(record.elapsed)),
        ("exception", None) => FieldValue::Str(
            record
                .exception
                .as_ref()
                .map(|e| e.render(backtrace))
                .unwrap_or_default(),
        ),
        ("extra", None) if accessors.is_empty() => {
            FieldValue::Str(Value::Object(record.extra.clone()).to_string())
        }
        ("extra", None) => {
            let value = lookup_json_map(&record.extra, accessors).ok_or_else(|| {
                FormatError::MissingExtra(
                    accessors
                        .iter()
                        .map(|a| match a {
                            Accessor::Key(k) | Accessor::Attr(k) => k.as_str(),
                        })
                        .collect::<Vec<_>>()
                        .join("."),
                )
            })?;
            json_field(value)
        }
        ("file", None | Some("name")) => FieldValue::Str(record.file.name.clone()),
        ("file", Some("path")) => FieldValue::Str(record.file.path.clone()),
        ("function", None) => FieldValue::Str(record.function.clone()),
        ("level", None | Some("name")) => FieldValue::Str(record.level.name.clone()),
        ("level", Some("no")) => FieldValue::Int(i64::from(record.level.no)),
        ("level", Some("icon")) => FieldValue::Str(record.level.icon.clone()),
        ("line", None) => FieldValue::Int(i64::from(record.line)),
        ("message", None) => FieldValue::Str(record.message.clone()),
        ("module", None) => FieldValue::Str(record.module.clone()),
        ("name", None) => FieldValue::Str(
            record
                .name
                .clone()
                .unwrap_or_else(|| record.module.clone()),
        ),
        ("thread", None | Some("id")) => {
            FieldValue::Int(i64::try_from(record.thread.id).unwrap_or(i64::MAX))
        }
        ("thread", Some("name")) => FieldValue::Str(record.thread.name.clone()),
        ("process", None | Some("id")) => FieldValue::Int(i64::from(record.process.id)),
        ("process", Some("name")) => FieldValue::Str(record.process.name.clone()),
        _ => return Err(unknown_field(name, accessors)),
    };
    Ok(value)
}

fn unknown_field(name: &str, accessors: &[Accessor]) -> FormatError {
    FormatError::UnknownField(
        FieldPath {
            name: name.to_string(),
            accessors: accessors.to_vec(),
        }
        .to_string(),
    )
}

fn lookup_json_map<'a>(map: &'a Map<String, Value>, accessors: &[Accessor]) -> Option<&'a Value> {
    match accessors.split_first() {
        None => None,
        Some((Accessor::Key(key) | Accessor::Attr(key), rest)) => {
            lookup_json(map.get(key)?, rest)
        }
    }
}

fn lookup_json<'a>(value: &'a Value, accessors: &[Accessor]) -> Option<&'a Value> {
    accessors.iter().try_fold(value, |current, accessor| match accessor {
        Accessor::Key(key) | Accessor::Attr(key) => match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => items.get(key.parse::<usize>().ok()?),
            _ => None,
        },
    })
}

fn json_field(value: &Value) -> FieldValue {
    match value {
        Value::String(s) => FieldValue::Str(s.clone()),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => FieldValue::Int(i),
            (None, Some(f)) => FieldValue::Float(f),
            (None, None) => FieldValue::Str(n.to_string()),
        },
        other => FieldValue::Str(other.to_string()),
    }
}

fn plain(value: &FieldValue) -> String {
    match value {
        FieldValue::Str(s) => s.clone(),
        FieldValue::Int(i) => i.to_string(),
        FieldValue::Float(f) => f.to_string(),
    }
}

/// Formats a duration as `H:MM:SS[.ffffff]`.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let micros = elapsed.subsec_micros();
    let base = format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60);
    if micros == 0 {
        base
    } else {
        format!("{base}.{micros:06}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Callsite, RecordException, RecordLevel};
    use serde_json::json;

    fn record() -> Record {
        let callsite = Callsite {
            module_path: Some("app::db"),
            file: "src/db.rs",
            line: 7,
            function: Some("connect"),
        };
        let level = RecordLevel {
            name: "INFO".to_string(),
            no: 20,
            icon: "i".to_string(),
        };
        let mut record = Record::new(&callsite, level, "connected", Duration::from_millis(1500));
        record.extra.insert("user".to_string(), json!("alice"));
        record.extra.insert("attempts".to_string(), json!(3));
        record
            .extra
            .insert("peer".to_string(), json!({"host": "db1", "port": 5432}));
        record
    }

    #[test]
    fn test_render_plain_fields() {
        let formatter =
            Formatter::compile("{level} {name}:{function}:{line} {module} {file} - {message}")
                .unwrap();
        let out = formatter.render(&record(), false, "").unwrap();
        assert_eq!(out, "INFO app::db:connect:7 db db.rs - connected");
    }

    #[test]
    fn test_render_attributes() {
        let formatter = Formatter::compile("{level.no} {level.icon} {file.path}").unwrap();
        let out = formatter.render(&record(), false, "").unwrap();
        assert_eq!(out, "20 i src/db.rs");
    }

    #[test]
    fn test_render_extra() {
        let formatter =
            Formatter::compile("{extra[user]} {extra[attempts]:03} {extra[peer][host]}").unwrap();
        let out = formatter.render(&record(), false, "").unwrap();
        assert_eq!(out, "alice 003 db1");
    }

    #[test]
    fn test_render_whole_extra_as_json() {
        let mut record = record();
        record.extra.remove("peer");
        let formatter = Formatter::compile("{extra}").unwrap();
        let out = formatter.render(&record, false, "").unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, json!({"user": "alice", "attempts": 3}));
    }

    #[test]
    fn test_render_missing_extra() {
        let formatter = Formatter::compile("{extra[nope]}").unwrap();
        let err = formatter.render(&record(), false, "").unwrap_err();
        assert_eq!(err, FormatError::MissingExtra("nope".to_string()));
    }

    #[test]
    fn test_render_padding() {
        let formatter = Formatter::compile("[{level: <8}]").unwrap();
        assert_eq!(formatter.render(&record(), false, "").unwrap(), "[INFO    ]");
    }

    #[test]
    fn test_render_colors() {
        let formatter = Formatter::compile("<level>{level}</level> <red>{line}</red>").unwrap();
        let colored = formatter.render(&record(), true, "\x1b[1m").unwrap();
        assert_eq!(colored, "\x1b[1mINFO\x1b[0m \x1b[31m7\x1b[0m");

        let stripped = formatter.render(&record(), false, "\x1b[1m").unwrap();
        assert_eq!(stripped, "INFO 7");
    }

    #[test]
    fn test_field_values_are_not_markup() {
        let mut record = record();
        record.message = "<red>literal</red>".to_string();
        let formatter = Formatter::compile("{message}").unwrap();
        assert_eq!(
            formatter.render(&record, true, "").unwrap(),
            "<red>literal</red>"
        );
    }

    #[test]
    fn test_message_markup_is_painted_inline() {
        let formatter = Formatter::compile("<bold>{message}</bold>").unwrap();
        let markup = parse_markup("<red>hi</red>").unwrap();
        let ctx = RenderContext {
            colorize: true,
            level_ansi: "",
            message_markup: Some(&markup),
            backtrace: false,
        };
        let out = formatter.render_with(&record(), &ctx).unwrap();
        assert_eq!(out, "\x1b[1m\x1b[31mhi\x1b[0m\x1b[1m\x1b[0m");
    }

    #[test]
    fn test_render_exception_and_elapsed() {
        let mut record = record();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "refused");
        record.exception = Some(RecordException::new(&err));
        let formatter = Formatter::compile("{elapsed} {exception}").unwrap();
        assert_eq!(
            formatter.render(&record, false, "").unwrap(),
            "0:00:01.500000 Error: refused"
        );
    }

    #[test]
    fn test_compile_rejects_bad_formats() {
        assert_eq!(
            Formatter::compile("{levle}").unwrap_err(),
            FormatError::UnknownField("levle".to_string())
        );
        assert_eq!(
            Formatter::compile("{level.color}").unwrap_err(),
            FormatError::UnknownField("level.color".to_string())
        );
        assert!(matches!(
            Formatter::compile("<red>{message}</green>").unwrap_err(),
            FormatError::MismatchedClosingTag { .. }
        ));
        assert!(matches!(
            Formatter::compile("{line:?}").unwrap_err(),
            FormatError::InvalidSpec(_)
        ));
    }

    #[test]
    fn test_empty_time_spec_uses_default_format() {
        let record = record();
        let bare = Formatter::compile("{time}").unwrap();
        let empty = Formatter::compile("{time:}").unwrap();
        let expected = format_time(&record.time, DEFAULT_TIME_FORMAT);
        assert_eq!(empty.render(&record, false, "").unwrap(), expected);
        assert_eq!(bare.render(&record, false, "").unwrap(), expected);
        assert_eq!(
            render_message("{record[time]:}", &Map::new(), Some(&record)),
            expected
        );
    }

    #[test]
    fn test_precision_rejected_on_integer_fields() {
        for format in ["{line:.2}", "{level.no:5.1}", "{thread.id:.3}", "{process:.1}"] {
            assert!(
                matches!(
                    Formatter::compile(format),
                    Err(FormatError::IntegerPrecision(_))
                ),
                "{format} should be rejected"
            );
        }
        assert_eq!(
            Formatter::compile("{line:.2}").unwrap_err().to_string(),
            "Precision not allowed in integer format specifier for field 'line'"
        );
        assert!(Formatter::compile("{message:.2}").is_ok());
        assert!(Formatter::compile("{extra[ratio]:.2}").is_ok());

        let mut args = Map::new();
        args.insert("n".to_string(), json!(2));
        assert_eq!(render_message("{n:.2}", &args, None), "{n:.2}");
    }

    #[test]
    fn test_compile_rejects_huge_width() {
        assert!(matches!(
            Formatter::compile("{message:>999999999999}"),
            Err(FormatError::SpecTooWide { .. })
        ));
    }

    #[test]
    fn test_default_format_compiles() {
        let formatter = Formatter::compile(DEFAULT_FORMAT).unwrap();
        let out = formatter.render(&record(), false, "").unwrap();
        assert!(out.ends_with(" | INFO     | app::db:connect:7 - connected"));
    }

    #[test]
    fn test_render_message_arguments() {
        let mut args = Map::new();
        args.insert("user".to_string(), json!("bob"));
        args.insert("n".to_string(), json!(2));
        assert_eq!(
            render_message("{user} logged in {n:>3} times", &args, None),
            "bob logged in   2 times"
        );
        assert_eq!(render_message("{missing} stays", &args, None), "{missing} stays");
        assert_eq!(render_message("broken {", &args, None), "broken {");
    }

    #[test]
    fn test_render_message_record_fields() {
        let record = record();
        let args = Map::new();
        assert_eq!(
            render_message("in {record[function]} at {record[line]}", &args, Some(&record)),
            "in connect at 7"
        );
        assert_eq!(
            render_message("{record[level].no}", &args, Some(&record)),
            "20"
        );
        assert_eq!(
            render_message("{record[function]}", &args, None),
            "{record[function]}"
        );
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_elapsed(Duration::from_micros(1)), "0:00:00.000001");
    }
}
