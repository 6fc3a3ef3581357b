//! Color markup parser using nom.
//!
//! Understands tags such as:
//! - `<red>`, `<light-green>`, `<RED>` (background), `<bold>`, `<u>`
//! - `<fg #ff8800>`, `<bg 12,34,56>`, `<fg 208>`
//! - `<level>` (the color of the record's level)
//! - `</red>` or `</>` to close, `\<` to escape

use super::FormatError;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::char,
    combinator::{opt, recognize},
    IResult, Parser,
};

const RESET: &str = "\x1b[0m";

/// How an opening tag styles the text that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Style {
    /// A fixed ANSI escape sequence.
    Ansi(String),
    /// The color of the record's level, resolved at render time.
    Level,
}

/// A piece of parsed markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupToken {
    /// Plain text.
    Text(String),
    /// An opening tag.
    Open {
        /// Tag name as written, e.g. `red` or `fg #ff0000`.
        tag: String,
        /// Resolved style.
        style: Style,
    },
    /// A closing tag; `None` for the anonymous `</>`.
    Close {
        /// Tag name as written.
        tag: Option<String>,
    },
}

/// Parses markup into tokens.
///
/// Tag nesting is not checked here; see [`TagChecker`].
///
/// # Errors
///
/// Returns [`FormatError::UnknownTag`] for a tag naming no known color or style.
///
/// # Examples
///
/// ```
/// use logbook::format::{parse_markup, MarkupToken};
///
/// let tokens = parse_markup("<red>alert</red>").unwrap();
/// assert_eq!(tokens.len(), 3);
/// assert_eq!(tokens[1], MarkupToken::Text("alert".to_string()));
/// ```
pub fn parse_markup(input: &str) -> Result<Vec<MarkupToken>, FormatError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut rest = input;

    while let Some(ch) = rest.chars().next() {
        if let Some(after) = rest.strip_prefix("\\<") {
            text.push('<');
            rest = after;
            continue;
        }
        if ch == '<' {
            if let Ok((after, raw)) = raw_tag(rest) {
                if raw.closing || !raw.body.is_empty() {
                    if !text.is_empty() {
                        tokens.push(MarkupToken::Text(std::mem::take(&mut text)));
                    }
                    tokens.push(resolve(&raw)?);
                    rest = after;
                    continue;
                }
            }
        }
        text.push(ch);
        rest = &rest[ch.len_utf8()..];
    }

    if !text.is_empty() {
        tokens.push(MarkupToken::Text(text));
    }
    Ok(tokens)
}

/// Renders markup with ANSI colors; `<level>` uses `level_ansi`.
///
/// # Errors
///
/// Returns an error for unknown tags or broken nesting.
///
/// # Examples
///
/// ```
/// use logbook::format::markup::colorize;
///
/// assert_eq!(colorize("<red>x</red>", "").unwrap(), "\x1b[31mx\x1b[0m");
/// ```
pub fn colorize(input: &str, level_ansi: &str) -> Result<String, FormatError> {
    render(input, level_ansi, true)
}

/// Removes all markup, keeping the text.
///
/// # Errors
///
/// Returns an error for unknown tags or broken nesting.
///
/// # Examples
///
/// ```
/// use logbook::format::markup::strip;
///
/// assert_eq!(strip("<bold>done</bold> \\<ok>").unwrap(), "done <ok>");
/// ```
pub fn strip(input: &str) -> Result<String, FormatError> {
    render(input, "", false)
}

fn render(input: &str, level_ansi: &str, colorize: bool) -> Result<String, FormatError> {
    let tokens = parse_markup(input)?;
    let mut checker = TagChecker::new();
    for token in &tokens {
        checker.feed(token)?;
    }
    checker.finish()?;

    let mut painter = Painter::new(colorize, level_ansi);
    painter.tokens(&tokens);
    Ok(painter.finish())
}

/// Converts a level color such as `<red><bold>` into its ANSI sequence.
///
/// # Errors
///
/// Returns an error if the markup holds anything but opening color tags.
///
/// # Examples
///
/// ```
/// use logbook::format::markup::level_ansi;
///
/// assert_eq!(level_ansi("<red><bold>").unwrap(), "\x1b[31m\x1b[1m");
/// assert_eq!(level_ansi("").unwrap(), "");
/// ```
pub fn level_ansi(color: &str) -> Result<String, FormatError> {
    let mut ansi = String::new();
    for token in parse_markup(color)? {
        match token {
            MarkupToken::Open {
                style: Style::Ansi(code),
                ..
            } => ansi.push_str(&code),
            MarkupToken::Text(text) if text.trim().is_empty() => {}
            _ => return Err(FormatError::InvalidLevelColor(color.to_string())),
        }
    }
    Ok(ansi)
}

/// Tracks open tags to validate nesting, possibly across several markup chunks.
#[derive(Debug, Default)]
pub struct TagChecker {
    open: Vec<String>,
}

impl TagChecker {
    /// Creates a checker with no open tags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts for one token.
    ///
    /// # Errors
    ///
    /// Returns an error when a closing tag does not match the open ones.
    pub fn feed(&mut self, token: &MarkupToken) -> Result<(), FormatError> {
        match token {
            MarkupToken::Text(_) => Ok(()),
            MarkupToken::Open { tag, .. } => {
                self.open.push(tag.clone());
                Ok(())
            }
            MarkupToken::Close { tag } => match (self.open.pop(), tag) {
                (None, closing) => Err(FormatError::UnexpectedClosingTag(
                    closing.clone().unwrap_or_default(),
                )),
                (Some(_), None) => Ok(()),
                (Some(expected), Some(found)) if expected == *found => Ok(()),
                (Some(expected), Some(found)) => Err(FormatError::MismatchedClosingTag {
                    expected,
                    found: found.clone(),
                }),
            },
        }
    }

    /// Checks that every tag was closed.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::UnclosedTag`] naming the innermost unclosed tag.
    pub fn finish(self) -> Result<(), FormatError> {
        match self.open.last() {
            Some(tag) => Err(FormatError::UnclosedTag(tag.clone())),
            None => Ok(()),
        }
    }
}

/// Writes text and styles, emitting ANSI codes only when colorizing.
///
/// Closing a tag resets all attributes and re-applies the ones still open.
#[derive(Debug)]
pub(crate) struct Painter<'a> {
    out: String,
    colorize: bool,
    level_ansi: &'a str,
    active: Vec<String>,
}

impl<'a> Painter<'a> {
    pub(crate) fn new(colorize: bool, level_ansi: &'a str) -> Self {
        Self {
            out: String::new(),
            colorize,
            level_ansi,
            active: Vec::new(),
        }
    }

    pub(crate) fn open(&mut self, style: &Style) {
        let code = match style {
            Style::Ansi(code) => code.clone(),
            Style::Level => self.level_ansi.to_string(),
        };
        if self.colorize {
            self.out.push_str(&code);
        }
        self.active.push(code);
    }

    pub(crate) fn close(&mut self) {
        self.active.pop();
        if self.colorize {
            self.out.push_str(RESET);
            for code in &self.active {
                self.out.push_str(code);
            }
        }
    }

    pub(crate) fn text(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub(crate) fn tokens(&mut self, tokens: &[MarkupToken]) {
        for token in tokens {
            match token {
                MarkupToken::Text(text) => self.text(text),
                MarkupToken::Open { style, .. } => self.open(style),
                MarkupToken::Close { .. } => self.close(),
            }
        }
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

// ============================================================================
// Tag parser
// ============================================================================

struct RawTag<'a> {
    closing: bool,
    body: &'a str,
}

fn raw_tag(input: &str) -> IResult<&str, RawTag<'_>> {
    let (input, _) = char('<').parse(input)?;
    let (input, closing) = opt(char('/')).parse(input)?;
    let (input, body) = recognize((
        opt(alt((tag("fg "), tag("bg ")))),
        take_while(|c: char| !c.is_whitespace() && c != '<' && c != '>'),
    ))
    .parse(input)?;
    let (input, _) = char('>').parse(input)?;

    Ok((
        input,
        RawTag {
            closing: closing.is_some(),
            body,
        },
    ))
}

fn resolve(raw: &RawTag<'_>) -> Result<MarkupToken, FormatError> {
    if raw.closing {
        let tag = (!raw.body.is_empty()).then(|| raw.body.to_string());
        return Ok(MarkupToken::Close { tag });
    }
    let style = lookup(raw.body).ok_or_else(|| FormatError::UnknownTag(raw.body.to_string()))?;
    Ok(MarkupToken::Open {
        tag: raw.body.to_string(),
        style,
    })
}

// ============================================================================
// Tag vocabulary
// ============================================================================

fn lookup(name: &str) -> Option<Style> {
    if name == "level" {
        return Some(Style::Level);
    }
    if let Some(spec) = name.strip_prefix("fg ") {
        return extended_color(spec, 38).map(Style::Ansi);
    }
    if let Some(spec) = name.strip_prefix("bg ") {
        return extended_color(spec, 48).map(Style::Ansi);
    }

    let lower = name.to_lowercase();
    let code = if name == lower {
        color_code(name).or_else(|| style_code(name))?
    } else if name == name.to_uppercase() {
        color_code(&lower)? + 10
    } else {
        return None;
    };
    Some(Style::Ansi(sgr(&code.to_string())))
}

fn color_code(name: &str) -> Option<u8> {
    let code = match name {
        "black" | "k" => 30,
        "red" | "r" => 31,
        "green" | "g" => 32,
        "yellow" | "y" => 33,
        "blue" | "e" => 34,
        "magenta" | "m" => 35,
        "cyan" | "c" => 36,
        "white" | "w" => 37,
        "light-black" | "lk" => 90,
        "light-red" | "lr" => 91,
        "light-green" | "lg" => 92,
        "light-yellow" | "ly" => 93,
        "light-blue" | "le" => 94,
        "light-magenta" | "lm" => 95,
        "light-cyan" | "lc" => 96,
        "light-white" | "lw" => 97,
        _ => return None,
    };
    Some(code)
}

fn style_code(name: &str) -> Option<u8> {
    let code = match name {
        "bold" | "b" => 1,
        "dim" | "d" => 2,
        "italic" | "i" => 3,
        "underline" | "u" => 4,
        "blink" | "l" => 5,
        "reverse" | "v" => 7,
        "hide" | "h" => 8,
        "strike" | "s" => 9,
        "normal" | "n" => 22,
        _ => return None,
    };
    Some(code)
}

fn extended_color(spec: &str, base: u8) -> Option<String> {
    if let Some(hex) = spec.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        let (r, g, b) = (channel(0)?, channel(2)?, channel(4)?);
        return Some(sgr(&format!("{base};2;{r};{g};{b}")));
    }
    if spec.contains(',') {
        let parts: Vec<u8> = spec
            .split(',')
            .map(|p| p.trim().parse::<u8>().ok())
            .collect::<Option<_>>()?;
        if let [r, g, b] = parts.as_slice() {
            return Some(sgr(&format!("{base};2;{r};{g};{b}")));
        }
        return None;
    }
    let index = spec.parse::<u8>().ok()?;
    Some(sgr(&format!("{base};5;{index}")))
}

fn sgr(code: &str) -> String {
    format!("\x1b[{code}m")
}

// ============================================================================
// Tests
// ============================================================================
