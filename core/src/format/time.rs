//! Time formatting with `YYYY-MM-DD HH:mm:ss.SSS`-style tokens.
//!
//! Square brackets escape literal text (`[at] HH:mm`), and a trailing `!UTC`
//! converts the time to UTC before formatting.

use chrono::{DateTime, Datelike, FixedOffset, Local, Offset, Timelike, Utc};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{anychar, char},
    combinator::{map, recognize, value},
    multi::many0,
    sequence::delimited,
    IResult, Parser,
};

/// Format used for `{time}` without a spec.
pub const DEFAULT_TIME_FORMAT: &str = "YYYY-MM-DDTHH:mm:ss.SSSSSSZ";

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Literal(&'a str),
    Year4,
    Year2,
    Quarter,
    MonthName,
    MonthAbbr,
    Month2,
    Month,
    DayOfYear3,
    DayOfYear,
    Day2,
    Day,
    WeekdayName,
    WeekdayAbbr,
    Weekday,
    IsoWeekday,
    Hour2,
    Hour,
    Hour12Padded,
    Hour12,
    Minute2,
    Minute,
    Second2,
    Second,
    Fraction(usize),
    Timestamp,
    TimestampMicros,
    Meridiem,
    Offset,
    OffsetCompact,
    TimezoneName,
}

/// Formats a local time with tokens.
///
/// # Examples
///
/// ```
/// use chrono::{Local, TimeZone};
/// use logbook::format::format_time;
///
/// let time = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
/// assert_eq!(format_time(&time, "YYYY-MM-DD HH:mm:ss"), "2024-03-09 14:05:07");
/// assert_eq!(format_time(&time, "[Day] D, MMMM"), "Day 9, March");
/// ```
#[must_use]
pub fn format_time(time: &DateTime<Local>, format: &str) -> String {
    let (format, time, utc) = match format.strip_suffix("!UTC") {
        Some(stripped) => (stripped, time.with_timezone(&Utc.fix()), true),
        None => (format, time.with_timezone(time.offset()), false),
    };

    let tokens = match many0(token).parse(format) {
        Ok((_, tokens)) => tokens,
        Err(_) => return format.to_string(),
    };

    let mut out = String::with_capacity(format.len() + 8);
    for token in tokens {
        render(&mut out, token, &time, utc);
    }
    out
}

fn render(out: &mut String, token: Token<'_>, t: &DateTime<FixedOffset>, utc: bool) {
    let hour12 = match t.hour() % 12 {
        0 => 12,
        h => h,
    };
    let text = match token {
        Token::Literal(s) => {
            out.push_str(s);
            return;
        }
        Token::Year4 => format!("{:04}", t.year()),
        Token::Year2 => format!("{:02}", t.year().rem_euclid(100)),
        Token::Quarter => ((t.month0() / 3) + 1).to_string(),
        Token::MonthName => MONTHS[t.month0() as usize].to_string(),
        Token::MonthAbbr => MONTHS[t.month0() as usize][..3].to_string(),
        Token::Month2 => format!("{:02}", t.month()),
        Token::Month => t.month().to_string(),
        Token::DayOfYear3 => format!("{:03}", t.ordinal()),
        Token::DayOfYear => t.ordinal().to_string(),
        Token::Day2 => format!("{:02}", t.day()),
        Token::Day => t.day().to_string(),
        Token::WeekdayName => {
            WEEKDAYS[t.weekday().num_days_from_monday() as usize].to_string()
        }
        Token::WeekdayAbbr => {
            WEEKDAYS[t.weekday().num_days_from_monday() as usize][..3].to_string()
        }
        Token::Weekday => t.weekday().num_days_from_monday().to_string(),
        Token::IsoWeekday => t.weekday().number_from_monday().to_string(),
        Token::Hour2 => format!("{:02}", t.hour()),
        Token::Hour => t.hour().to_string(),
        Token::Hour12Padded => format!("{hour12:02}"),
        Token::Hour12 => hour12.to_string(),
        Token::Minute2 => format!("{:02}", t.minute()),
        Token::Minute => t.minute().to_string(),
        Token::Second2 => format!("{:02}", t.second()),
        Token::Second => t.second().to_string(),
        Token::Fraction(digits) => {
            let micros = t.timestamp_subsec_micros().min(999_999);
            format!("{micros:06}")[..digits.min(6)].to_string()
        }
        Token::Timestamp => t.timestamp().to_string(),
        Token::TimestampMicros => t.timestamp_micros().to_string(),
        Token::Meridiem => (if t.hour() < 12 { "AM" } else { "PM" }).to_string(),
        Token::Offset => offset(t, ":"),
        Token::OffsetCompact => offset(t, ""),
        Token::TimezoneName => {
            if utc {
                "UTC".to_string()
            } else {
                offset(t, ":")
            }
        }
    };
    out.push_str(&text);
}

fn offset(t: &DateTime<FixedOffset>, separator: &str) -> String {
    let seconds = t.offset().local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let seconds = seconds.abs();
    format!(
        "{sign}{:02}{separator}{:02}",
        seconds / 3600,
        (seconds % 3600) / 60
    )
}

// ============================================================================
// Token parsers
// ============================================================================

fn token(input: &str) -> IResult<&str, Token<'_>> {
    alt((escaped, fraction, date_token, time_token, zone_token, literal)).parse(input)
}

fn escaped(input: &str) -> IResult<&str, Token<'_>> {
    map(
        delimited(char('['), take_while(|c: char| c != ']'), char(']')),
        Token::Literal,
    )
    .parse(input)
}

fn fraction(input: &str) -> IResult<&str, Token<'_>> {
    map(take_while1(|c: char| c == 'S'), |s: &str| {
        Token::Fraction(s.len())
    })
    .parse(input)
}

fn date_token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        value(Token::Year4, tag("YYYY")),
        value(Token::Year2, tag("YY")),
        value(Token::Quarter, tag("Q")),
        value(Token::MonthName, tag("MMMM")),
        value(Token::MonthAbbr, tag("MMM")),
        value(Token::Month2, tag("MM")),
        value(Token::Month, tag("M")),
        value(Token::DayOfYear3, tag("DDDD")),
        value(Token::DayOfYear, tag("DDD")),
        value(Token::Day2, tag("DD")),
        value(Token::Day, tag("D")),
        value(Token::WeekdayName, tag("dddd")),
        value(Token::WeekdayAbbr, tag("ddd")),
        value(Token::Weekday, tag("d")),
        value(Token::IsoWeekday, tag("E")),
    ))
    .parse(input)
}

fn time_token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        value(Token::Hour2, tag("HH")),
        value(Token::Hour, tag("H")),
        value(Token::Hour12Padded, tag("hh")),
        value(Token::Hour12, tag("h")),
        value(Token::Minute2, tag("mm")),
        value(Token::Minute, tag("m")),
        value(Token::Second2, tag("ss")),
        value(Token::Second, tag("s")),
        value(Token::Meridiem, tag("A")),
        value(Token::Timestamp, tag("X")),
        value(Token::TimestampMicros, tag("x")),
    ))
    .parse(input)
}

fn zone_token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        value(Token::OffsetCompact, tag("ZZ")),
        value(Token::Offset, tag("Z")),
        value(Token::TimezoneName, tag("zz")),
    ))
    .parse(input)
}

fn literal(input: &str) -> IResult<&str, Token<'_>> {
    map(recognize(anychar), Token::Literal).parse(input)
}
