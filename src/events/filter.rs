//! Validation of year/month filters and selection of the matching events.

use super::Event;
use chrono::Datelike;
use serde::Serialize;
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Years accepted by a `MonthFilter`.
pub const YEARS: RangeInclusive<i32> = 2021..=2030;

/// Months accepted by a `MonthFilter`.
pub const MONTHS: RangeInclusive<u32> = 1..=12;

/// Reasons for rejecting a year/month filter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("`{0}` is not a number")]
    NotANumber(String),
    #[error("`{0}` is not an integer")]
    NotAnInteger(String),
    #[error("year {0} is outside of {min}..={max}", min = YEARS.start(), max = YEARS.end())]
    YearOutOfRange(f64),
    #[error("month {0} is outside of 1..=12")]
    MonthOutOfRange(f64),
}

/// A validated year/month pair used to select events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthFilter {
    year: i32,
    month: u32,
}

impl MonthFilter {
    /// Creates a filter from a year and a 1-indexed month.
    pub fn new(year: i32, month: u32) -> Result<MonthFilter, FilterError> {
        MonthFilter::from_numbers(f64::from(year), f64::from(month))
    }

    /// Validates two raw path tokens and turns them into a filter.
    ///
    /// Both tokens are coerced to numbers first; the pair is only accepted if both are integers,
    /// the year lies within [`YEARS`] and the month within [`MONTHS`].
    pub fn from_tokens(year: &str, month: &str) -> Result<MonthFilter, FilterError> {
        MonthFilter::from_numbers(coerce(year)?, coerce(month)?)
    }

    fn from_numbers(year: f64, month: f64) -> Result<MonthFilter, FilterError> {
        if year.fract() != 0.0 {
            return Err(FilterError::NotAnInteger(year.to_string()));
        }

        if month.fract() != 0.0 {
            return Err(FilterError::NotAnInteger(month.to_string()));
        }

        if year < f64::from(*YEARS.start()) || year > f64::from(*YEARS.end()) {
            return Err(FilterError::YearOutOfRange(year));
        }

        if month < f64::from(*MONTHS.start()) || month > f64::from(*MONTHS.end()) {
            return Err(FilterError::MonthOutOfRange(month));
        }

        Ok(MonthFilter {
            year: year as i32,
            month: month as u32,
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// The 1-indexed month.
    pub fn month(&self) -> u32 {
        self.month
    }

    /// Returns `true` if the event's calendar date lies within the filtered month.
    ///
    /// Events without a parseable date never match.
    pub fn matches(&self, event: &Event) -> bool {
        event
            .calendar_date()
            .map(|date| date.year() == self.year && date.month() == self.month)
            .unwrap_or(false)
    }
}

impl fmt::Display for MonthFilter {
    /// Formats the filter as `YYYY-MM`, which is the prefix of all matching `YYYY-MM-DD` dates.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// Loose numeric coercion: whitespace is ignored, an empty token counts as zero and unsigned
// `0x`, `0o` and `0b` integer literals are accepted next to decimal numbers.
fn coerce(token: &str) -> Result<f64, FilterError> {
    let trimmed = token.trim();

    if trimmed.is_empty() {
        return Ok(0.0);
    }

    let radix = match trimmed.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };

    if let Some(radix) = radix {
        // `from_str_radix` would accept a sign after the prefix.
        let digits = &trimmed[2..];
        return match u64::from_str_radix(digits, radix) {
            Ok(number) if !digits.starts_with('+') => Ok(number as f64),
            _ => Err(FilterError::NotANumber(token.to_owned())),
        };
    }

    match trimmed.parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(number),
        _ => Err(FilterError::NotANumber(token.to_owned())),
    }
}

/// Selects the events within the filtered month, keeping their order.
pub fn select(events: &[Event], filter: MonthFilter) -> Vec<Event> {
    events
        .iter()
        .filter(|event| filter.matches(event))
        .cloned()
        .collect()
}

/// The result of resolving a filtered events page.
#[derive(Debug)]
pub enum FilterOutcome {
    /// The year/month tokens were rejected.
    InvalidInput(FilterError),
    /// The events could not be retrieved.
    RetrievalFailed,
    /// The filter is valid but no event matched.
    NoResults,
    /// The matching events.
    Found(Vec<Event>),
}

impl FilterOutcome {
    /// Builds the outcome from the retrieved events of a valid filter.
    pub fn from_events<E: fmt::Display>(events: Result<Vec<Event>, E>) -> FilterOutcome {
        match events {
            Ok(events) if events.is_empty() => FilterOutcome::NoResults,
            Ok(events) => FilterOutcome::Found(events),
            Err(err) => {
                log::error!("failed to fetch filtered events: {err}");
                FilterOutcome::RetrievalFailed
            }
        }
    }

    /// Returns `true` for outcomes rendered as an invalid filter.
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            FilterOutcome::InvalidInput(_) | FilterOutcome::RetrievalFailed
        )
    }
}
