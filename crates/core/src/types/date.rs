//! Calendar date of an appointment.

use core::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`AppointmentDate`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DateError {
    /// The input string is empty (after trimming).
    #[error("date cannot be empty")]
    Empty,
    /// The input matches none of the accepted layouts.
    #[error("unrecognized date format: {0}")]
    Format(String),
    /// The input has the right shape but names a day that does not exist.
    #[error("date out of range: {0}")]
    OutOfRange(String),
}

/// A calendar day, always rendered as ISO `YYYY-MM-DD`.
///
/// Clients send dates in whatever shape their form library produces. Parsing
/// accepts:
///
/// - `YYYY-M-D` and `YYYY-MM-DD`
/// - either of the above followed by a time part (`2024-3-5T00:00:00Z`,
///   `2024-03-05 09:00`); the time and any offset are dropped without
///   timezone conversion, the calendar day as written wins
/// - `DD/MM/YYYY`
///
/// Because the rendered form is zero-padded ISO, lexical order on
/// [`AppointmentDate::to_string`] equals chronological order.
///
/// ```
/// use agenda_core::AppointmentDate;
///
/// let a = AppointmentDate::parse("2024-3-5T00:00:00Z").unwrap();
/// let b = AppointmentDate::parse("2024-03-05").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "2024-03-05");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(transparent))]
#[serde(try_from = "String", into = "String")]
pub struct AppointmentDate(NaiveDate);

impl AppointmentDate {
    /// Parse a date from any accepted input layout.
    ///
    /// # Errors
    ///
    /// Returns [`DateError`] if the input is empty, has an unknown layout, or
    /// names a non-existent day (e.g. `2024-02-30`).
    pub fn parse(input: &str) -> Result<Self, DateError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DateError::Empty);
        }

        let day_part = trimmed
            .split(|c: char| c == 'T' || c == 't' || c.is_whitespace())
            .next()
            .unwrap_or(trimmed);

        let (year, month, day) = if day_part.contains('/') {
            let [d, m, y] = split_numbers(day_part, '/')
                .ok_or_else(|| DateError::Format(trimmed.to_owned()))?;
            (y, m, d)
        } else {
            let [y, m, d] = split_numbers(day_part, '-')
                .ok_or_else(|| DateError::Format(trimmed.to_owned()))?;
            (y, m, d)
        };

        let year = i32::try_from(year).map_err(|_| DateError::OutOfRange(trimmed.to_owned()))?;
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| DateError::OutOfRange(trimmed.to_owned()))
    }

    /// Wrap an already-valid calendar day.
    #[must_use]
    pub const fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Get the underlying `NaiveDate`.
    #[must_use]
    pub const fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

/// Split `s` into exactly three unsigned numbers on `sep`.
///
/// The year (whichever position it sits in) must have four digits so that
/// `05/03/24` is rejected instead of silently landing in year 24.
fn split_numbers(s: &str, sep: char) -> Option<[u32; 3]> {
    let mut parts = s.split(sep);
    let a = parts.next()?;
    let b = parts.next()?;
    let c = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let year_field = if sep == '/' { c } else { a };
    if year_field.len() != 4 {
        return None;
    }

    let parse = |p: &str| -> Option<u32> {
        if p.is_empty() || p.len() > 4 || !p.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        p.parse().ok()
    };

    Some([parse(a)?, parse(b)?, parse(c)?])
}

impl fmt::Display for AppointmentDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl std::str::FromStr for AppointmentDate {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AppointmentDate {
    type Error = DateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AppointmentDate> for String {
    fn from(date: AppointmentDate) -> Self {
        date.to_string()
    }
}

impl From<NaiveDate> for AppointmentDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}
