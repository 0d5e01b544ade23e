pub mod listing;
pub mod parser;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of description characters used as a title when the event text is empty
const TITLE_CHARS: usize = 20;

/// A bot follower, keyed by the platform openid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub openid: String,
    pub nickname: String,
    pub subscribed: bool,
}

/// Columns that `save_user` may be asked to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Nickname,
    Subscribed,
}

impl User {
    pub fn new(openid: &str) -> Self {
        Self {
            openid: openid.to_string(),
            nickname: String::new(),
            subscribed: false,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.nickname.is_empty() {
            &self.openid
        } else {
            &self.nickname
        }
    }

    pub fn subscribe(self) -> Self {
        Self {
            subscribed: true,
            ..self
        }
    }

    pub fn unsubscribe(self) -> Self {
        Self {
            subscribed: false,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatRule {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RepeatRule {
    pub fn text(&self) -> &'static str {
        match self {
            RepeatRule::Daily => "every day",
            RepeatRule::Weekly => "every week",
            RepeatRule::Monthly => "every month",
            RepeatRule::Yearly => "every year",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: String,
    pub owner_id: String,
    pub event: String,
    pub description: String,
    pub time: DateTime<Utc>,
    pub repeat: Option<RepeatRule>,
    /// Openids notified in addition to the owner, in join order
    pub participants: Vec<String>,
    pub media_id: Option<String>,
}

impl Reminder {
    pub fn new(owner_id: &str, time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            event: String::new(),
            description: String::new(),
            time,
            repeat: None,
            participants: Vec::new(),
            media_id: None,
        }
    }

    /// Returns false if the user already participates.
    pub fn add_participant(&mut self, openid: &str) -> bool {
        if self.participants.iter().any(|p| p == openid) {
            return false;
        }
        self.participants.push(openid.to_string());
        true
    }

    pub fn repeat_text(&self) -> Option<&'static str> {
        self.repeat.as_ref().map(RepeatRule::text)
    }

    pub fn title(&self) -> String {
        if self.event.is_empty() {
            self.description.chars().take(TITLE_CHARS).collect()
        } else {
            self.event.clone()
        }
    }

    pub fn time_until(&self, now: DateTime<Utc>) -> String {
        humanize_until((self.time - now).num_seconds())
    }

    pub fn local_time_string(&self, tz: &FixedOffset) -> String {
        self.time.with_timezone(tz).format("%Y/%m/%d %H:%M").to_string()
    }

    /// Hour and minute only, as shown in reminder lists
    pub fn local_clock_string(&self, tz: &FixedOffset) -> String {
        self.time.with_timezone(tz).format("%-H:%M").to_string()
    }

    pub fn absolute_url(&self, site_url: &str) -> String {
        format!("{}/reminds/{}/", site_url, self.id)
    }
}

/// Where a QR-code scene reference points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneRef {
    /// Reminder id used verbatim
    Id(String),
    /// Codes printed before the platform accepted string scene ids carried a number.
    /// The reminder is the first one whose id sorts at or after this key.
    LegacyLowerBound(String),
}

impl SceneRef {
    pub fn parse(scene_id: &str) -> Self {
        if !scene_id.is_empty() && scene_id.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(number) = scene_id.parse::<u128>() {
                return SceneRef::LegacyLowerBound(format!(
                    "{:x}-0000-0000-0000-000000000000",
                    number
                ));
            }
        }
        SceneRef::Id(scene_id.to_string())
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

fn humanize_until(seconds: i64) -> String {
    if seconds <= 0 {
        return "now".to_string();
    }
    if seconds < 30 {
        return "in less than a minute".to_string();
    }

    let minutes = (seconds + 30) / 60;
    let days = minutes / (24 * 60);
    let hours = minutes % (24 * 60) / 60;
    let mins = minutes % 60;

    let mut parts = Vec::with_capacity(2);
    if days > 0 {
        parts.push(plural(days, "day"));
        if hours > 0 {
            parts.push(plural(hours, "hour"));
        }
    } else if hours > 0 {
        parts.push(plural(hours, "hour"));
        if mins > 0 {
            parts.push(plural(mins, "minute"));
        }
    } else {
        parts.push(plural(mins, "minute"));
    }
    format!("in {}", parts.join(" "))
}
