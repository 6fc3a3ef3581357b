//! Placeholder template parser using nom.
//!
//! Parses templates like:
//! - `{time} | {level: <8} | {message}`
//! - `{extra[request_id]}` and `{process.name}`
//! - `{{literal braces}}`

use super::FormatError;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{anychar, char, digit1, one_of},
    combinator::{all_consuming, map, map_opt, opt, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};

/// One step into a field: `.attr` or `[key]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// Attribute access, e.g. `.name`.
    Attr(String),
    /// Key access, e.g. `[user_id]`.
    Key(String),
}

/// A field reference such as `level.no` or `extra[user]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// Top-level field name.
    pub name: String,
    /// Accessors applied in order.
    pub accessors: Vec<Accessor>,
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        for accessor in &self.accessors {
            match accessor {
                Accessor::Attr(attr) => write!(f, ".{attr}")?,
                Accessor::Key(key) => write!(f, "[{key}]")?,
            }
        }
        Ok(())
    }
}

/// A piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateToken {
    /// Text copied as is (markup included).
    Literal(String),
    /// A `{field:spec}` placeholder.
    Field {
        /// Referenced field.
        path: FieldPath,
        /// Text after `:`, if any.
        spec: Option<String>,
    },
}

/// Parses a template into literals and placeholders.
///
/// # Errors
///
/// Returns [`FormatError::InvalidTemplate`] for unbalanced braces or malformed
/// placeholders.
///
/// # Examples
///
/// ```
/// use logbook::format::{parse_template, TemplateToken};
///
/// let tokens = parse_template("{level: <8} {{x}}").unwrap();
/// assert_eq!(tokens.len(), 2);
/// assert_eq!(tokens[1], TemplateToken::Literal(" {x}".to_string()));
/// ```
pub fn parse_template(input: &str) -> Result<Vec<TemplateToken>, FormatError> {
    let (remaining, raw) = many0(token)
        .parse(input)
        .map_err(|e| FormatError::InvalidTemplate(e.to_string()))?;

    if !remaining.is_empty() {
        return Err(FormatError::InvalidTemplate(format!(
            "unexpected '{}' at position {}",
            remaining.chars().next().unwrap_or('}'),
            input.len() - remaining.len()
        )));
    }

    let mut tokens: Vec<TemplateToken> = Vec::with_capacity(raw.len());
    for token in raw {
        match (tokens.last_mut(), token) {
            (Some(TemplateToken::Literal(prev)), TemplateToken::Literal(next)) => {
                prev.push_str(&next);
            }
            (_, token) => tokens.push(token),
        }
    }
    Ok(tokens)
}

// ============================================================================
// Token parsers
// ============================================================================

fn token(input: &str) -> IResult<&str, TemplateToken> {
    alt((escaped_brace, placeholder, literal)).parse(input)
}

fn escaped_brace(input: &str) -> IResult<&str, TemplateToken> {
    map(alt((value("{", tag("{{")), value("}", tag("}}")))), |s: &str| {
        TemplateToken::Literal(s.to_string())
    })
    .parse(input)
}

fn literal(input: &str) -> IResult<&str, TemplateToken> {
    map(take_while1(|c: char| c != '{' && c != '}'), |s: &str| {
        TemplateToken::Literal(s.to_string())
    })
    .parse(input)
}

fn placeholder(input: &str) -> IResult<&str, TemplateToken> {
    let (input, _) = char('{').parse(input)?;
    let (input, path) = field_path(input)?;
    let (input, spec) = opt(preceded(char(':'), take_while(|c: char| c != '}'))).parse(input)?;
    let (input, _) = char('}').parse(input)?;

    Ok((
        input,
        TemplateToken::Field {
            path,
            spec: spec.map(str::to_string),
        },
    ))
}

fn field_path(input: &str) -> IResult<&str, FieldPath> {
    let (input, name) = identifier(input)?;
    let (input, accessors) = many0(alt((
        map(preceded(char('.'), identifier), |s: &str| {
            Accessor::Attr(s.to_string())
        }),
        map(
            delimited(char('['), take_while1(|c: char| c != ']'), char(']')),
            |s: &str| Accessor::Key(s.to_string()),
        ),
    )))
    .parse(input)?;

    Ok((
        input,
        FieldPath {
            name: name.to_string(),
            accessors,
        },
    ))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_').parse(input)
}

// ============================================================================
// Format spec
// ============================================================================

/// Alignment inside a padded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    /// `<`
    Left,
    /// `>`
    Right,
    /// `^`
    Center,
}

/// A `[[fill]align][0][width][.precision][type]` format spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    /// Padding character.
    pub fill: char,
    /// Explicit alignment.
    pub align: Option<Align>,
    /// Zero padding for numbers.
    pub zero: bool,
    /// Minimum width in characters.
    pub width: usize,
    /// Maximum characters for text, decimals for floats.
    pub precision: Option<usize>,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            zero: false,
            width: 0,
            precision: None,
        }
    }
}

/// A value ready to be padded according to a [`Spec`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
}

/// Largest width or precision a spec may request.
pub const MAX_SPEC_WIDTH: usize = 1 << 16;

fn align(input: &str) -> IResult<&str, Align> {
    map_opt(anychar, |c| match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        _ => None,
    })
    .parse(input)
}

fn fill_align(input: &str) -> IResult<&str, (Option<char>, Align)> {
    alt((
        map(pair(anychar, align), |(fill, align)| (Some(fill), align)),
        map(align, |align| (None, align)),
    ))
    .parse(input)
}

/// Raw pieces of a spec, before the numbers are checked.
type SpecParts<'a> = (
    Option<(Option<char>, Align)>,
    Option<char>,
    Option<&'a str>,
    Option<&'a str>,
    Option<char>,
);

fn spec_parts(input: &str) -> IResult<&str, SpecParts<'_>> {
    all_consuming((
        opt(fill_align),
        opt(char('0')),
        opt(digit1),
        opt(preceded(char('.'), digit1)),
        opt(one_of("sdf")),
    ))
    .parse(input)
}

impl Spec {
    /// Parses a spec.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidSpec`] when the spec has trailing garbage
    /// and [`FormatError::SpecTooWide`] when a width or precision exceeds
    /// [`MAX_SPEC_WIDTH`].
    ///
    /// # Examples
    ///
    /// ```
    /// use logbook::format::Spec;
    ///
    /// let spec = Spec::parse("*^10.3").unwrap();
    /// assert_eq!(spec.fill, '*');
    /// assert_eq!(spec.width, 10);
    /// assert_eq!(spec.precision, Some(3));
    /// ```
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        let (_, (fill_align, zero, width, precision, _kind)) =
            spec_parts(input).map_err(|_| FormatError::InvalidSpec(input.to_string()))?;

        let number = |digits: &str| match digits.parse::<usize>() {
            Ok(n) if n <= MAX_SPEC_WIDTH => Ok(n),
            _ => Err(FormatError::SpecTooWide {
                spec: input.to_string(),
                max: MAX_SPEC_WIDTH,
            }),
        };

        let (fill, align) = match fill_align {
            Some((fill, align)) => (fill.unwrap_or(' '), Some(align)),
            None => (' ', None),
        };
        Ok(Self {
            fill,
            align,
            zero: zero.is_some(),
            width: width.map(number).transpose()?.unwrap_or(0),
            precision: precision.map(number).transpose()?,
        })
    }

    pub(crate) fn apply(&self, value: &FieldValue) -> String {
        let (text, numeric) = match value {
            FieldValue::Str(s) => match self.precision {
                Some(p) => (s.chars().take(p).collect(), false),
                None => (s.clone(), false),
            },
            FieldValue::Int(n) => (n.to_string(), true),
            FieldValue::Float(x) => match self.precision {
                Some(p) => (format!("{x:.p$}"), true),
                None => (x.to_string(), true),
            },
        };

        let len = text.chars().count();
        if len >= self.width {
            return text;
        }
        let pad = self.width - len;

        if self.zero && numeric && self.align.is_none() {
            let (sign, digits) = match text.strip_prefix('-') {
                Some(rest) => ("-", rest),
                None => ("", text.as_str()),
            };
            return format!("{sign}{}{digits}", "0".repeat(pad));
        }

        let fill = if self.zero && self.align.is_none() {
            '0'
        } else {
            self.fill
        };
        let align = self
            .align
            .unwrap_or(if numeric { Align::Right } else { Align::Left });
        let repeat = |n: usize| fill.to_string().repeat(n);
        match align {
            Align::Left => format!("{text}{}", repeat(pad)),
            Align::Right => format!("{}{text}", repeat(pad)),
            Align::Center => format!("{}{text}{}", repeat(pad / 2), repeat(pad - pad / 2)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
