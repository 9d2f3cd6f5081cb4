//! Relative time expressions resolved against an injected "now"

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use once_cell::sync::Lazy;
use regex::Regex;
use log::debug;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const MORNING_HOUR: u32 = 9;
const AFTERNOON_HOUR: u32 = 14;
const EVENING_HOUR: u32 = 18;

/// `2pm`, `14`, `7:30 am`; also matches `3 hours` so durations can be
/// told apart from clock times
static HOUR_PATTERN: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"\b(\d{1,2})(?::([0-5]\d))?\s*(am|pm|hours?|hrs?|h|minutes?|mins?)?\b"
  ).unwrap()
});

fn is_duration_unit(suffix: &str) -> bool
{   !matches!(suffix, "am" | "pm")
}

/// First clock time in `text` as (hour, minute), 24-hour. Numbers
/// carrying a duration unit are skipped.
fn clock_time(text: &str) -> Option<(u32, u32)>
{   let caps = HOUR_PATTERN
      .captures_iter(text)
      .find(|c| {
        !c.get(3)
          .map(|m| is_duration_unit(m.as_str()))
          .unwrap_or(false)
      })?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps
      .get(2)
      .and_then(|m| m.as_str().parse().ok())
      .unwrap_or(0);
    match caps.get(3).map(|m| m.as_str())
    {   Some("pm") if hour < 12 => hour += 12
      , Some("am") if hour == 12 => hour = 0
      , _ => {}
    }
    if hour > 23
    {   debug!("Ignoring out-of-range hour {} in '{}'", hour, text);
        return None;
    }
    Some((hour, minute))
}

fn period_hour(text: &str) -> Option<u32>
{   if text.contains("morning")
    {   Some(MORNING_HOUR)
    } else if text.contains("afternoon")
    {   Some(AFTERNOON_HOUR)
    } else if text.contains("evening") || text.contains("tonight")
    {   Some(EVENING_HOUR)
    } else
    {   None
    }
}

fn has_word(text: &str, word: &str) -> bool
{   text
      .split(|c: char| !c.is_alphanumeric())
      .any(|w| w == word)
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<NaiveDateTime>
{   NaiveTime::from_hms_opt(hour, minute, 0).map(|t| date.and_time(t))
}

/// Resolve one expression. An explicit clock time beats a period
/// word; a bare "tomorrow" means 09:00.
pub fn resolve_expression(
  expression: &str
, now: NaiveDateTime
) -> Option<NaiveDateTime>
{   let text = expression.trim().to_lowercase();
    let clock = clock_time(&text);
    let period = period_hour(&text);

    if text.contains("tomorrow")
    {   let date = now.date().succ_opt()?;
        return match (clock, period)
        {   (Some((h, m)), _) => at(date, h, m)
          , (None, Some(h)) => at(date, h, 0)
          , (None, None) => at(date, MORNING_HOUR, 0)
        };
    }

    let leads_with_hour = text
      .chars()
      .next()
      .map(|c| c.is_ascii_digit())
      .unwrap_or(false);
    if text.contains("today") || leads_with_hour
    {   return match (clock, period)
        {   (Some((h, m)), _) => at(now.date(), h, m)
          , (None, Some(h)) => at(now.date(), h, 0)
          , (None, None) => Some(now)
        };
    }

    if has_word(&text, "now")
    {   return Some(now);
    }

    period.and_then(|h| at(now.date(), h, 0))
}

/// Start time from a list of expressions; the last one that resolves
/// wins
pub fn resolve_start(
  expressions: &[String]
, now: NaiveDateTime
) -> Option<NaiveDateTime>
{   expressions
      .iter()
      .filter_map(|e| resolve_expression(e, now))
      .last()
}

/// End time; only defined when both a start and a positive duration
/// are known
pub fn end_time(
  start: Option<NaiveDateTime>
, duration_minutes: Option<u32>
) -> Option<NaiveDateTime>
{   let start = start?;
    let minutes = duration_minutes.filter(|m| *m > 0)?;
    let delta = TimeDelta::try_minutes(i64::from(minutes))?;
    start.checked_add_signed(delta)
}

/// Whole minutes in a model-reported hour count
pub fn duration_minutes(hours: f64) -> Option<u32>
{   if !hours.is_finite() || hours <= 0.0
    {   return None;
    }
    let minutes = (hours * 60.0).round();
    if minutes < 1.0 || minutes > f64::from(u32::MAX)
    {   None
    } else
    {   Some(minutes as u32)
    }
}

/// `YYYY-MM-DDTHH:MM:SS`
pub fn to_iso8601(time: &NaiveDateTime) -> String
{   time.format(ISO_FORMAT).to_string()
}
