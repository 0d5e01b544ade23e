use std::ops::Range;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeDelta, Utc};
use regex::{Captures, Regex};

use super::{Reminder, RepeatRule};
use crate::error::ParseError;

/// Reminders further out than this are rejected
const MAX_AHEAD_MINUTES: i64 = 3650 * 24 * 60;

/// Clock used when only a day is given
const DEFAULT_HOUR: u32 = 9;

/// Turns free text into a reminder owned by `uid`.
pub trait ReminderParser: Send + Sync {
    fn parse(&self, text: &str, uid: &str) -> Result<Reminder, ParseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayWord {
    Today,
    Tomorrow,
}

#[derive(Debug, Clone)]
struct Clock {
    raw: String,
    hour: u32,
    minute: u32,
    meridiem: Option<String>,
}

impl Clock {
    fn from_captures(caps: &Captures, raw: usize, hour: usize, minute: usize, ampm: usize) -> Option<Self> {
        Some(Self {
            raw: caps.get(raw)?.as_str().trim().to_string(),
            hour: caps.get(hour)?.as_str().parse().ok()?,
            minute: caps
                .get(minute)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
            meridiem: caps.get(ampm).map(|m| m.as_str().to_ascii_lowercase()),
        })
    }

    /// 24-hour clock, or `None` when out of range
    fn resolve(&self) -> Option<(u32, u32)> {
        if self.minute > 59 {
            return None;
        }
        let hour = match self.meridiem.as_deref() {
            Some("am") if (1..=12).contains(&self.hour) => self.hour % 12,
            Some("pm") if (1..=12).contains(&self.hour) => self.hour % 12 + 12,
            None if self.hour <= 23 => self.hour,
            _ => return None,
        };
        Some((hour, self.minute))
    }
}

/// Regex-driven parser for short English phrases such as
/// "tomorrow at 9pm call mom" or "every day at 8:00 take pills".
pub struct RuleParser {
    tz: FixedOffset,
    repeat_re: Regex,
    relative_re: Regex,
    day_re: Regex,
    at_re: Regex,
    lead_re: Regex,
}

impl RuleParser {
    pub fn new(tz: FixedOffset) -> Result<Self> {
        Ok(Self {
            tz,
            repeat_re: Regex::new(
                r"(?i)\b(every\s+day|daily|every\s+week|weekly|every\s+month|monthly|every\s+year|yearly)\b",
            )
            .context("Invalid repeat pattern")?,
            relative_re: Regex::new(
                r"(?i)\bin\s+(\d+)\s*(minutes?|mins?|hours?|hrs?|h|days?|weeks?)\b",
            )
            .context("Invalid relative-time pattern")?,
            day_re: Regex::new(
                r"(?i)\b(today|tomorrow)\b(?:\s+(?:at\s+)?((\d{1,2})(?::(\d{2}))?\s*(am|pm)?)\b)?",
            )
            .context("Invalid day pattern")?,
            at_re: Regex::new(r"(?i)\bat\s+((\d{1,2})(?::(\d{2}))?\s*(am|pm)?)\b")
                .context("Invalid clock pattern")?,
            lead_re: Regex::new(r"(?i)^(?:please\s+)?(?:remind\s+me\s+(?:to\s+)?|to\s+)")
                .context("Invalid lead-in pattern")?,
        })
    }

    /// Parse relative to an explicit `now`.
    pub fn parse_at(
        &self,
        text: &str,
        uid: &str,
        now: DateTime<Utc>,
    ) -> Result<Reminder, ParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        let mut rest = text.to_string();

        let found = self
            .repeat_re
            .captures(&rest)
            .map(|caps| (whole(&caps), caps[1].to_string()));
        let repeat = match found {
            Some((range, word)) => {
                cut(&mut rest, range);
                repeat_from_word(&word)
            }
            None => None,
        };

        let time = match self.relative_time(&mut rest, now)? {
            Some(time) => time,
            None => self.clock_time(&mut rest, now)?,
        };

        let remainder = rest.split_whitespace().collect::<Vec<_>>().join(" ");
        let remainder = self.lead_re.replace(&remainder, "");
        let event = remainder
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ';' | ':' | '!'))
            .to_string();

        let mut reminder = Reminder::new(uid, time);
        reminder.event = event;
        reminder.description = text.to_string();
        reminder.repeat = repeat;
        Ok(reminder)
    }

    /// "in N units"
    fn relative_time(
        &self,
        rest: &mut String,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ParseError> {
        let found = self.relative_re.captures(rest.as_str()).map(|caps| {
            (
                whole(&caps),
                caps[1].to_string(),
                caps[2].to_ascii_lowercase(),
            )
        });
        let Some((range, amount, unit)) = found else {
            return Ok(None);
        };
        cut(rest, range);

        let unit_minutes = match unit.chars().next() {
            Some('m') => 1,
            Some('h') => 60,
            Some('d') => 24 * 60,
            _ => 7 * 24 * 60,
        };
        let minutes = amount
            .parse::<i64>()
            .ok()
            .and_then(|n| n.checked_mul(unit_minutes))
            .filter(|m| *m <= MAX_AHEAD_MINUTES)
            .ok_or(ParseError::TooFar)?;

        Ok(Some(now + TimeDelta::minutes(minutes)))
    }

    /// "today|tomorrow [at] H[:MM][am|pm]" or "at H[:MM][am|pm]"
    fn clock_time(&self, rest: &mut String, now: DateTime<Utc>) -> Result<DateTime<Utc>, ParseError> {
        let mut day = None;
        let mut clock = None;

        let found = self.day_re.captures(rest.as_str()).map(|caps| {
            let word = if caps[1].eq_ignore_ascii_case("today") {
                DayWord::Today
            } else {
                DayWord::Tomorrow
            };
            (whole(&caps), word, Clock::from_captures(&caps, 2, 3, 4, 5))
        });
        if let Some((range, word, found_clock)) = found {
            cut(rest, range);
            day = Some(word);
            clock = found_clock;
        }

        if clock.is_none() {
            let found = self
                .at_re
                .captures(rest.as_str())
                .map(|caps| (whole(&caps), Clock::from_captures(&caps, 1, 2, 3, 4)));
            if let Some((range, found_clock)) = found {
                cut(rest, range);
                clock = found_clock;
            }
        }

        if day.is_none() && clock.is_none() {
            return Err(ParseError::NoTime);
        }

        let (hour, minute) = match &clock {
            Some(c) => c.resolve().ok_or_else(|| ParseError::InvalidClock(c.raw.clone()))?,
            None => (DEFAULT_HOUR, 0),
        };

        let days_ahead = if day == Some(DayWord::Tomorrow) { 1 } else { 0 };
        let time = self.local_to_utc(now, days_ahead, hour, minute);
        if time > now {
            return Ok(time);
        }
        match day {
            Some(DayWord::Today) => Err(ParseError::InPast(
                clock
                    .map(|c| c.raw)
                    .unwrap_or_else(|| format!("{hour}:{minute:02}")),
            )),
            _ => Ok(self.local_to_utc(now, days_ahead + 1, hour, minute)),
        }
    }

    fn local_to_utc(&self, now: DateTime<Utc>, days_ahead: u64, hour: u32, minute: u32) -> DateTime<Utc> {
        let date = now.with_timezone(&self.tz).date_naive() + Days::new(days_ahead);
        let clock = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
        let offset = TimeDelta::seconds(i64::from(self.tz.local_minus_utc()));
        (date.and_time(clock) - offset).and_utc()
    }
}

impl ReminderParser for RuleParser {
    fn parse(&self, text: &str, uid: &str) -> Result<Reminder, ParseError> {
        self.parse_at(text, uid, Utc::now())
    }
}

fn whole(caps: &Captures) -> Range<usize> {
    caps.get(0).map(|m| m.range()).unwrap_or(0..0)
}

fn cut(text: &mut String, range: Range<usize>) {
    text.replace_range(range, " ");
}

fn repeat_from_word(word: &str) -> Option<RepeatRule> {
    let word = word.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    match word.as_str() {
        "every day" | "daily" => Some(RepeatRule::Daily),
        "every week" | "weekly" => Some(RepeatRule::Weekly),
        "every month" | "monthly" => Some(RepeatRule::Monthly),
        "every year" | "yearly" => Some(RepeatRule::Yearly),
        _ => None,
    }
}
