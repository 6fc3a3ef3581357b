//! Structured parsing of log files.
//!
//! [`ParseIter`] reads any [`Read`] chunk by chunk and yields the named
//! groups of every regex match as a JSON map. A match spanning two chunks is
//! found because the tail of the buffer after the second-to-last match is
//! kept for the next round; the last match of a round is only reported once
//! more input confirms it cannot grow.

use chrono::{DateTime, NaiveDateTime};
use regex::{Captures, Regex};
use serde_json::{Map, Number, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use thiserror::Error;

/// Default number of bytes read at once.
pub const DEFAULT_CHUNK: usize = 1 << 16;

/// Converts one captured string.
pub type Caster = Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;

/// Converts the whole map of captured groups in place.
pub type CastFn = Arc<dyn Fn(&mut Map<String, Value>) -> Result<(), String> + Send + Sync>;

/// Errors raised while parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Reading the input failed.
    #[error("Failed to read input: {0}")]
    Io(#[from] io::Error),

    /// The input is not valid UTF-8.
    #[error("Invalid UTF-8 in input at byte {0}")]
    InvalidUtf8(usize),

    /// A field caster rejected its value.
    #[error("Failed to cast field '{field}': {reason}")]
    Cast {
        /// Group name.
        field: String,
        /// Caster message.
        reason: String,
    },

    /// A whole-map cast function failed.
    #[error("Cast function failed: {0}")]
    CastFunction(String),
}

/// Conversion applied to each match.
#[derive(Clone, Default)]
pub enum Cast {
    /// Keep captured strings.
    #[default]
    None,
    /// Convert the named groups present in the map.
    Fields(HashMap<String, Caster>),
    /// Convert the whole map.
    Function(CastFn),
}

impl Cast {
    /// Per-field casters from `(group, caster)` pairs.
    #[must_use]
    pub fn fields<I, K>(casters: I) -> Self
    where
        I: IntoIterator<Item = (K, Caster)>,
        K: Into<String>,
    {
        Self::Fields(casters.into_iter().map(|(k, c)| (k.into(), c)).collect())
    }

    /// Whole-map cast function.
    #[must_use]
    pub fn function<F>(cast: F) -> Self
    where
        F: Fn(&mut Map<String, Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(cast))
    }

    fn apply(&self, groups: &mut Map<String, Value>) -> Result<(), ParseError> {
        match self {
            Self::None => Ok(()),
            Self::Fields(casters) => {
                for (field, caster) in casters {
                    let Some(Value::String(raw)) = groups.get(field) else {
                        continue;
                    };
                    let value = caster(raw).map_err(|reason| ParseError::Cast {
                        field: field.clone(),
                        reason,
                    })?;
                    groups.insert(field.clone(), value);
                }
                Ok(())
            }
            Self::Function(cast) => cast(groups).map_err(ParseError::CastFunction),
        }
    }
}

impl fmt::Debug for Cast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Fields(casters) => {
                let mut names: Vec<&String> = casters.keys().collect();
                names.sort();
                f.debug_tuple("Fields").field(&names).finish()
            }
            Self::Function(_) => f.write_str("Function(<fn>)"),
        }
    }
}

/// Ready-made casters.
pub mod casters {
    use super::{Caster, DateTime, NaiveDateTime, Number, Value};
    use std::sync::Arc;

    /// Parses a signed integer.
    #[must_use]
    pub fn integer() -> Caster {
        Arc::new(|raw| {
            raw.trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| format!("invalid integer '{raw}': {e}"))
        })
    }

    /// Parses a finite float.
    #[must_use]
    pub fn float() -> Caster {
        Arc::new(|raw| {
            let value = raw
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid float '{raw}': {e}"))?;
            Number::from_f64(value)
                .map(Value::Number)
                .ok_or_else(|| format!("float '{raw}' is not finite"))
        })
    }

    /// Parses `true/false`, `1/0`, `yes/no`, `on/off`.
    #[must_use]
    pub fn boolean() -> Caster {
        Arc::new(|raw| match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "n" | "off" => Ok(Value::Bool(false)),
            _ => Err(format!("invalid boolean '{raw}'")),
        })
    }

    /// Parses a timestamp with a `chrono` strftime format and renders it as
    /// RFC 3339 (or ISO 8601 without offset for naive formats).
    #[must_use]
    pub fn datetime(format: &str) -> Caster {
        let format = format.to_string();
        Arc::new(move |raw| {
            if let Ok(dt) = DateTime::parse_from_str(raw, &format) {
                return Ok(Value::String(dt.to_rfc3339()));
            }
            NaiveDateTime::parse_from_str(raw, &format)
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
                .map_err(|e| format!("invalid datetime '{raw}' for format '{format}': {e}"))
        })
    }
}

/// Iterator over the matches of a regex in a stream.
///
/// # Example
///
/// ```
/// use logbook::parse::{Cast, ParseIter, casters};
/// use regex::Regex;
/// use serde_json::json;
///
/// let input = "a=1\nb=2\n".as_bytes();
/// let pattern = Regex::new(r"(?P<key>\w)=(?P<value>\d)").unwrap();
/// let cast = Cast::fields([("value", casters::integer())]);
///
/// let rows: Vec<_> = ParseIter::new(input, pattern, cast, 4).collect::<Result<_, _>>().unwrap();
/// assert_eq!(rows[1]["value"], json!(2));
/// ```
pub struct ParseIter<R> {
    reader: R,
    pattern: Regex,
    cast: Cast,
    read_buf: Vec<u8>,
    buffer: String,
    pending: Vec<u8>,
    consumed: usize,
    ready: VecDeque<Map<String, Value>>,
    done: bool,
}

impl<R: Read> ParseIter<R> {
    /// Creates the iterator; a `chunk` of zero uses [`DEFAULT_CHUNK`].
    #[must_use]
    pub fn new(reader: R, pattern: Regex, cast: Cast, chunk: usize) -> Self {
        Self {
            reader,
            pattern,
            cast,
            read_buf: vec![0; if chunk == 0 { DEFAULT_CHUNK } else { chunk }],
            buffer: String::new(),
            pending: Vec::new(),
            consumed: 0,
            ready: VecDeque::new(),
            done: false,
        }
    }

    fn fill(&mut self) -> Result<(), ParseError> {
        let read = loop {
            match self.reader.read(&mut self.read_buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        };

        if read == 0 {
            self.done = true;
            if !self.pending.is_empty() {
                return Err(ParseError::InvalidUtf8(self.consumed));
            }
            let found = collect_matches(&self.pattern, &self.buffer);
            self.ready.extend(found.into_iter().map(|(_, groups)| groups));
            self.buffer.clear();
            return Ok(());
        }

        self.pending.extend_from_slice(&self.read_buf[..read]);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_some() => {
                return Err(ParseError::InvalidUtf8(self.consumed + e.valid_up_to()));
            }
            Err(e) => e.valid_up_to(),
        };
        if let Ok(text) = std::str::from_utf8(&self.pending[..valid]) {
            self.buffer.push_str(text);
        }
        self.pending.drain(..valid);
        self.consumed += valid;

        let mut found = collect_matches(&self.pattern, &self.buffer);
        if found.len() > 1 {
            found.pop();
            let end = found.last().map_or(0, |(end, _)| *end);
            self.buffer.drain(..end);
            self.ready.extend(found.into_iter().map(|(_, groups)| groups));
        }
        Ok(())
    }
}

impl<R: Read> Iterator for ParseIter<R> {
    type Item = Result<Map<String, Value>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(mut groups) = self.ready.pop_front() {
                return Some(self.cast.apply(&mut groups).map(|()| groups));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.fill() {
                self.done = true;
                self.ready.clear();
                return Some(Err(err));
            }
        }
    }
}

fn collect_matches(pattern: &Regex, text: &str) -> Vec<(usize, Map<String, Value>)> {
    pattern
        .captures_iter(text)
        .map(|caps| {
            let end = caps.get(0).map_or(0, |m| m.end());
            (end, groups(pattern, &caps))
        })
        .collect()
}

fn groups(pattern: &Regex, caps: &Captures<'_>) -> Map<String, Value> {
    pattern
        .capture_names()
        .flatten()
        .map(|name| {
            let value = caps
                .name(name)
                .map_or(Value::Null, |m| Value::String(m.as_str().to_string()));
            (name.to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LOG: &str = "2024-01-02 10:00:00 | INFO | started\n\
                       2024-01-02 10:00:01 | WARNING | slow query took 1200ms\n\
                       2024-01-02 10:00:02 | ERROR | connection lost\n";

    fn pattern() -> Regex {
        Regex::new(r"(?P<time>[\d\- :]+) \| (?P<level>\w+) \| (?P<message>[^\n]*)").unwrap()
    }

    fn parse_all(input: &str, chunk: usize, cast: Cast) -> Vec<Map<String, Value>> {
        ParseIter::new(input.as_bytes(), pattern(), cast, chunk)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_all_matches_found() {
        let rows = parse_all(LOG, DEFAULT_CHUNK, Cast::None);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["level"], json!("INFO"));
        assert_eq!(rows[2]["message"], json!("connection lost"));
    }

    #[test]
    fn test_small_chunks_match_across_boundaries() {
        for chunk in [1, 3, 7, 16, 50] {
            let rows = parse_all(LOG, chunk, Cast::None);
            assert_eq!(rows.len(), 3, "chunk size {chunk}");
            assert_eq!(rows[1]["message"], json!("slow query took 1200ms"), "chunk size {chunk}");
        }
    }

    #[test]
    fn test_multibyte_characters_split_across_chunks() {
        let input = "level=ÉLEVÉ\nlevel=ünïcode\n";
        let pattern = Regex::new(r"level=(?P<level>[^\n]+)").unwrap();
        let rows: Vec<_> = ParseIter::new(input.as_bytes(), pattern, Cast::None, 1)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows[0]["level"], json!("ÉLEVÉ"));
        assert_eq!(rows[1]["level"], json!("ünïcode"));
    }

    /// Reader remembering the address of every buffer it is handed.
    struct BufferSpy<'a> {
        data: &'a [u8],
        buffers: Vec<usize>,
    }

    impl Read for BufferSpy<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.buffers.push(buf.as_ptr() as usize);
            self.data.read(buf)
        }
    }

    #[test]
    fn test_read_buffer_reused_between_chunks() {
        let mut spy = BufferSpy {
            data: LOG.as_bytes(),
            buffers: Vec::new(),
        };
        let rows = ParseIter::new(&mut spy, pattern(), Cast::None, 8)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(spy.buffers.len() > 10);
        assert!(spy.buffers.iter().all(|addr| *addr == spy.buffers[0]));
    }

    #[test]
    fn test_invalid_utf8() {
        let bytes: &[u8] = b"ok\n\xff\xfe\n";
        let pattern = Regex::new(r"(?P<line>\w+)").unwrap();
        let mut iter = ParseIter::new(bytes, pattern, Cast::None, 4);
        let err = iter.find_map(Result::err).unwrap();
        assert!(matches!(err, ParseError::InvalidUtf8(3)));
    }

    #[test]
    fn test_field_casters() {
        let pattern = Regex::new(r"(?P<n>-?\d+) (?P<f>[\d.]+) (?P<b>\w+) (?P<t>\S+ \S+)").unwrap();
        let cast = Cast::fields([
            ("n", casters::integer()),
            ("f", casters::float()),
            ("b", casters::boolean()),
            ("t", casters::datetime("%Y-%m-%d %H:%M:%S")),
        ]);
        let rows: Vec<_> = ParseIter::new("-4 2.5 yes 2024-03-01 12:30:00".as_bytes(), pattern, cast, 0)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows[0]["n"], json!(-4));
        assert_eq!(rows[0]["f"], json!(2.5));
        assert_eq!(rows[0]["b"], json!(true));
        assert_eq!(rows[0]["t"], json!("2024-03-01T12:30:00"));
    }

    #[test]
    fn test_cast_failure_names_field() {
        let pattern = Regex::new(r"(?P<n>\w+)").unwrap();
        let cast = Cast::fields([("n", casters::integer())]);
        let err = ParseIter::new("abc".as_bytes(), pattern, cast, 0)
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ParseError::Cast { ref field, .. } if field == "n"));
    }

    #[test]
    fn test_cast_function() {
        let cast = Cast::function(|groups| {
            let level = groups
                .get("level")
                .and_then(Value::as_str)
                .map(str::to_lowercase)
                .ok_or_else(|| "missing level".to_string())?;
            groups.insert("level".to_string(), Value::String(level));
            Ok(())
        });
        let rows = parse_all(LOG, 8, cast);
        assert_eq!(rows[1]["level"], json!("warning"));
    }

    #[test]
    fn test_optional_group_is_null() {
        let pattern = Regex::new(r"(?P<key>\w+)(=(?P<value>\w+))?;").unwrap();
        let rows: Vec<_> = ParseIter::new("a=1;b;".as_bytes(), pattern, Cast::None, 0)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows[1]["value"], Value::Null);
    }
}
