//! Calendar date and period primitives.
//!
//! Dates in trigger text never fail to resolve: out of range months and days are clamped into the
//! calendar instead of raising an error, and period arithmetic saturates at the representable
//! bounds.

use std::fmt;
use std::ops::{Add, Neg};

use chrono::{Days, Months, NaiveDate};
use nom::bytes::complete::take_while_m_n;
use nom::character::complete::{char, digit1, one_of};
use nom::combinator::{map, opt};
use nom::error::ParseError;
use nom::multi::many1;
use nom::sequence::preceded;
use nom::{IResult, Parser};
use serde::Serialize;

/// The textual date format used when rendering dates back into names or arguments.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A signed calendar period. Weeks are folded into `days` when parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Period {
    pub years: i32,
    pub months: i32,
    pub days: i32,
}

impl Period {
    pub const ZERO: Period = Period {
        years: 0,
        months: 0,
        days: 0,
    };

    pub fn new(years: i32, months: i32, days: i32) -> Self {
        Self {
            years,
            months,
            days,
        }
    }

    /// A period of whole weeks, stored as days.
    pub fn weeks(weeks: i32) -> Self {
        Self::new(0, 0, weeks.saturating_mul(7))
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Add this period to `date` using ordinary calendar rules. Years and months are applied first
    /// (clamping the day to the end of a shorter month), then days. Results beyond the representable
    /// range saturate to [`NaiveDate::MIN`] or [`NaiveDate::MAX`].
    pub fn add_to(&self, date: NaiveDate) -> NaiveDate {
        let months = i64::from(self.years) * 12 + i64::from(self.months);
        let shifted = match u32::try_from(months.unsigned_abs()) {
            Ok(amount) if months >= 0 => date.checked_add_months(Months::new(amount)),
            Ok(amount) => date.checked_sub_months(Months::new(amount)),
            Err(_) => None,
        };
        let Some(shifted) = shifted else {
            return saturated(months);
        };

        let days = i64::from(self.days);
        let amount = Days::new(days.unsigned_abs());
        let result = if days >= 0 {
            shifted.checked_add_days(amount)
        } else {
            shifted.checked_sub_days(amount)
        };
        result.unwrap_or_else(|| saturated(days))
    }

    /// Render the non-zero components as separate tokens, e.g. `["2", "years", "1", "days"]`. A
    /// zero period still renders as `["0", "days"]` so the result is never empty.
    pub fn keywords(&self) -> Vec<String> {
        let mut tokens = Vec::with_capacity(6);
        for (value, unit) in [
            (self.years, "years"),
            (self.months, "months"),
            (self.days, "days"),
        ] {
            if value != 0 {
                tokens.push(value.to_string());
                tokens.push(unit.to_string());
            }
        }
        if tokens.is_empty() {
            tokens.push("0".to_string());
            tokens.push("days".to_string());
        }
        tokens
    }

    /// The keyword tokens joined by single spaces.
    pub fn keyword_text(&self) -> String {
        self.keywords().join(" ")
    }
}

impl Add for Period {
    type Output = Period;

    fn add(self, rhs: Period) -> Period {
        Period {
            years: self.years.saturating_add(rhs.years),
            months: self.months.saturating_add(rhs.months),
            days: self.days.saturating_add(rhs.days),
        }
    }
}

impl Neg for Period {
    type Output = Period;

    fn neg(self) -> Period {
        Period {
            years: self.years.saturating_neg(),
            months: self.months.saturating_neg(),
            days: self.days.saturating_neg(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keyword_text())
    }
}

fn saturated(direction: i64) -> NaiveDate {
    if direction >= 0 {
        NaiveDate::MAX
    } else {
        NaiveDate::MIN
    }
}

/// Build a date from possibly out of range components. Month and day are clamped into `1..=12` and
/// `1..=31`, then the day is moved back to the last day of the month if needed.
pub fn parse_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let month = month.clamp(1, 12);
    let mut day = day.clamp(1, 31);
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return date;
        }
        if day <= 28 {
            return saturated(i64::from(year));
        }
        day -= 1;
    }
}

/// Parse a complete `YYYY[-MM[-DD]]` string, ignoring surrounding whitespace.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    match date_literal::<nom::error::Error<&str>>(text.trim()) {
        Ok(("", date)) => Some(date),
        _ => None,
    }
}

/// Render a date the way it appears in task names.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Lex a `YYYY[-MM[-DD]]` date. Missing components default to the first month or day.
pub(crate) fn date_literal<'a, E: ParseError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, NaiveDate, E> {
    let (input, year) = fixed_digits(4).parse(input)?;
    let (input, month) = opt(preceded(char('-'), fixed_digits(2))).parse(input)?;
    let (input, day) = if month.is_some() {
        opt(preceded(char('-'), fixed_digits(2))).parse(input)?
    } else {
        (input, None)
    };
    // Four digits always fit in an i32
    let year = year as i32;
    Ok((input, parse_date(year, month.unwrap_or(1), day.unwrap_or(1))))
}

/// Lex a signed period such as `3Y2M1D` or `-2W`. The sign applies to every component.
pub(crate) fn period_literal<'a, E: ParseError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Period, E> {
    let (input, sign) = opt(one_of("+-")).parse(input)?;
    let (input, parts) = many1((map(digit1, digits_value), one_of("YMWD"))).parse(input)?;

    let period = parts
        .into_iter()
        .fold(Period::ZERO, |acc, (value, unit)| {
            let value = i32::try_from(value).unwrap_or(i32::MAX);
            acc + match unit {
                'Y' => Period::new(value, 0, 0),
                'M' => Period::new(0, value, 0),
                'W' => Period::weeks(value),
                _ => Period::new(0, 0, value),
            }
        });

    Ok((input, if sign == Some('-') { -period } else { period }))
}

pub(crate) fn fixed_digits<'a, E: ParseError<&'a str>>(
    count: usize,
) -> impl Parser<&'a str, Output = u32, Error = E> {
    map(
        take_while_m_n(count, count, |c: char| c.is_ascii_digit()),
        |digits: &str| digits_value(digits) as u32,
    )
}

fn digits_value(digits: &str) -> u64 {
    digits.bytes().fold(0u64, |acc, b| {
        acc.saturating_mul(10).saturating_add(u64::from(b - b'0'))
    })
}
