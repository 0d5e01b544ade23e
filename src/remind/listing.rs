use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeDelta, Utc};

use super::Reminder;

/// Status glyph shown in front of each listed reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Done,
    Soon,
    Clock,
}

impl Marker {
    pub fn emoji(&self) -> &'static str {
        match self {
            Marker::Done => "\u{2713} ",
            Marker::Soon => "\u{1F51C}",
            Marker::Clock => "\u{1F552}",
        }
    }
}

/// Pick a marker for each time, in order. Only the earliest upcoming one is `Soon`,
/// and none is when `next_run_found` is already set.
pub fn markers(
    times: impl IntoIterator<Item = DateTime<Utc>>,
    now: DateTime<Utc>,
    mut next_run_found: bool,
) -> Vec<Marker> {
    times
        .into_iter()
        .map(|time| {
            if time < now {
                Marker::Done
            } else if !next_run_found {
                next_run_found = true;
                Marker::Soon
            } else {
                Marker::Clock
            }
        })
        .collect()
}

/// One line per reminder: marker, local clock time and the title linking to the reminder.
pub fn format_reminder_list(
    reminders: &[Reminder],
    now: DateTime<Utc>,
    next_run_found: bool,
    tz: &FixedOffset,
    site_url: &str,
) -> Vec<String> {
    let marks = markers(reminders.iter().map(|r| r.time), now, next_run_found);
    reminders
        .iter()
        .zip(marks)
        .map(|(reminder, marker)| {
            format!(
                "{} {} - <a href=\"{}\">{}</a>",
                marker.emoji(),
                reminder.local_clock_string(tz),
                reminder.absolute_url(site_url),
                reminder.title()
            )
        })
        .collect()
}

/// UTC bounds `[start, end)` of the local calendar day `days_ahead` days after `now`.
pub fn local_day_window(
    now: DateTime<Utc>,
    tz: &FixedOffset,
    days_ahead: u64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_date = now.with_timezone(tz).date_naive() + Days::new(days_ahead);
    let offset = TimeDelta::seconds(i64::from(tz.local_minus_utc()));
    let start = (local_date.and_time(NaiveTime::MIN) - offset).and_utc();
    (start, start + TimeDelta::days(1))
}
