//! Time and date parsing utilities.
//!
//! Timestamps are stored as RFC3339 text with microsecond precision in UTC,
//! so their lexical order matches their chronological order.

use crate::error::{IssueError, Result};
use chrono::{
    DateTime, Days, Duration, FixedOffset, Months, NaiveDate, NaiveTime, Offset, SecondsFormat,
    SubsecRound, Utc,
};
use chrono_tz::Tz;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

/// Current time, truncated to the precision the store keeps.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Format a timestamp the way the store writes it.
#[must_use]
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Format a calendar date as `YYYY-MM-DD`.
#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse an RFC3339 timestamp.
///
/// # Errors
///
/// Returns a validation error naming `field_name` if `s` is not RFC3339.
pub fn parse_timestamp(s: &str, field_name: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            IssueError::validation(field_name, format!("'{s}' is not an RFC3339 timestamp"))
        })
}

/// Parse a calendar date; an RFC3339 timestamp contributes its UTC date.
///
/// # Errors
///
/// Returns a validation error naming `field_name` if `s` is neither form.
pub fn parse_date(s: &str, field_name: &str) -> Result<NaiveDate> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .map_err(|_| IssueError::validation(field_name, format!("'{s}' is not a valid date")))
}

/// Parse a flexible time specification into a `DateTime<Utc>`.
///
/// Supports:
/// - RFC3339: `2025-01-15T12:00:00Z`, `2025-01-15T12:00:00+00:00`
/// - Simple date: `2025-01-15` (midnight UTC)
/// - Relative duration: `-7d`, `+1h`, `-30m`, `-2w`
///
/// # Errors
///
/// Returns a validation error if the format is unrecognized or a relative
/// duration has an unknown unit (only m, h, d, w are supported).
pub fn parse_flexible_timestamp(s: &str, field_name: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(start_of_day(date));
    }

    if let Some(rest) = s.strip_prefix(['+', '-']) {
        let is_negative = s.starts_with('-');
        if let Some(unit_char) = rest.chars().last() {
            let amount_str = &rest[..rest.len() - unit_char.len_utf8()];
            if let Ok(amount) = amount_str.parse::<i64>() {
                let amount = if is_negative { -amount } else { amount };
                let duration = match unit_char {
                    'm' => Duration::minutes(amount),
                    'h' => Duration::hours(amount),
                    'd' => Duration::days(amount),
                    'w' => Duration::weeks(amount),
                    _ => {
                        return Err(IssueError::validation(
                            field_name,
                            "invalid unit (use m, h, d, w)",
                        ));
                    }
                };
                return Ok(now() + duration);
            }
        }
    }

    Err(IssueError::validation(
        field_name,
        format!("'{s}' is not a valid time (try: 2025-01-15, an RFC3339 timestamp, or -7d)"),
    ))
}

/// First instant of `date` in UTC.
#[must_use]
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Last representable instant of `date` in UTC, at store precision.
#[must_use]
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + Duration::days(1) - Duration::microseconds(1)
}

static RELATIVE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,4})_(day|days|week|weeks|month|months)$").expect("static regex")
});

/// Resolve a relative date like `2_weeks` against `today`.
///
/// `forward` selects "from now" versus "ago". Returns `None` when the text
/// is not a relative date or the result leaves chrono's range.
#[must_use]
pub fn resolve_relative_date(text: &str, today: NaiveDate, forward: bool) -> Option<NaiveDate> {
    let caps = RELATIVE_DATE.captures(text.trim())?;
    let amount: u32 = caps[1].parse().ok()?;
    match &caps[2] {
        "day" | "days" => {
            let days = Days::new(u64::from(amount));
            if forward {
                today.checked_add_days(days)
            } else {
                today.checked_sub_days(days)
            }
        }
        "week" | "weeks" => {
            let days = Days::new(u64::from(amount) * 7);
            if forward {
                today.checked_add_days(days)
            } else {
                today.checked_sub_days(days)
            }
        }
        _ => {
            let months = Months::new(amount);
            if forward {
                today.checked_add_months(months)
            } else {
                today.checked_sub_months(months)
            }
        }
    }
}

static OFFSET_ZONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:UTC|GMT)?([+-])(\d{1,2})(?::?(\d{2}))?$").expect("static regex")
});

/// The zone a user's display timestamps are rendered in.
///
/// IANA names (`Asia/Kolkata`, `America/New_York`) follow their daylight
/// saving rules. Fixed offsets such as `+05:30` are accepted as a fallback;
/// anything else renders in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserTimezone {
    #[default]
    Utc,
    Named(Tz),
    Fixed(FixedOffset),
}

impl UserTimezone {
    /// Parse a zone name such as `UTC`, `Europe/Berlin`, `+05:30`, `-0800`
    /// or `GMT+2`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty()
            || name.eq_ignore_ascii_case("utc")
            || name.eq_ignore_ascii_case("gmt")
            || name.eq_ignore_ascii_case("z")
            || name.eq_ignore_ascii_case("etc/utc")
        {
            return Self::Utc;
        }
        if let Ok(zone) = name.parse::<Tz>() {
            return Self::Named(zone);
        }

        let fixed = OFFSET_ZONE.captures(name).and_then(|caps| {
            let hours: i32 = caps[2].parse().ok()?;
            let minutes: i32 = caps.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
            let seconds = hours * 3600 + minutes * 60;
            if &caps[1] == "-" {
                FixedOffset::west_opt(seconds)
            } else {
                FixedOffset::east_opt(seconds)
            }
        });

        fixed.map_or_else(
            || {
                debug!(zone = name, "Unrecognized timezone, using UTC");
                Self::Utc
            },
            Self::Fixed,
        )
    }

    /// The offset from UTC in effect at `at`.
    #[must_use]
    pub fn offset_at(self, at: &DateTime<Utc>) -> FixedOffset {
        match self {
            Self::Utc => Utc.fix(),
            Self::Named(zone) => at.with_timezone(&zone).offset().fix(),
            Self::Fixed(offset) => offset,
        }
    }
}

impl fmt::Display for UserTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utc => f.write_str("UTC"),
            Self::Named(zone) => f.write_str(zone.name()),
            Self::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

/// Render a stored timestamp in the user's zone.
#[must_use]
pub fn to_user_timezone(dt: &DateTime<Utc>, tz: UserTimezone) -> DateTime<FixedOffset> {
    dt.with_timezone(&tz.offset_at(dt))
}
