//! Fakes shared by the dispatcher tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};

use super::{DispatchSettings, Dispatcher};
use crate::config::MediaConfig;
use crate::error::{DeliveryError, ParseError};
use crate::platform::{ProfileSource, SideChannel, UserInfo};
use crate::remind::parser::ReminderParser;
use crate::remind::{Reminder, RepeatRule, SceneRef, User, UserField};
use crate::store::{ReminderStore, SqliteStore};

pub enum Behaviour {
    /// Reminder two hours from now, titled with the input text
    Succeed,
    SucceedRepeating,
    Fail(ParseError),
    Panic,
}

pub struct FakeParser {
    behaviour: Behaviour,
    calls: AtomicUsize,
    last_text: Mutex<Option<String>>,
}

impl FakeParser {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
            last_text: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_text(&self) -> Option<String> {
        self.last_text.lock().unwrap().clone()
    }
}

impl ReminderParser for FakeParser {
    fn parse(&self, text: &str, uid: &str) -> Result<Reminder, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_text.lock().unwrap() = Some(text.to_string());

        let build = |repeat| {
            let mut reminder = Reminder::new(uid, Utc::now() + Duration::hours(2));
            reminder.event = text.to_string();
            reminder.description = text.to_string();
            reminder.repeat = repeat;
            reminder
        };

        match &self.behaviour {
            Behaviour::Succeed => Ok(build(None)),
            Behaviour::SucceedRepeating => Ok(build(Some(RepeatRule::Daily))),
            Behaviour::Fail(err) => Err(err.clone()),
            Behaviour::Panic => panic!("parser blew up"),
        }
    }
}

#[derive(Default)]
pub struct FakeSideChannel {
    pub fail: bool,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeSideChannel {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SideChannel for FakeSideChannel {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        if self.fail {
            return Err(DeliveryError::Api {
                code: 45015,
                message: "response out of time limit".into(),
            });
        }
        Ok(())
    }
}

/// Profile lookup returning a fixed nickname, or failing when none is set
#[derive(Default)]
pub struct FakeProfiles {
    pub nickname: Option<String>,
    calls: AtomicUsize,
}

impl FakeProfiles {
    pub fn named(nickname: &str) -> Self {
        Self {
            nickname: Some(nickname.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileSource for FakeProfiles {
    async fn user_info(&self, _openid: &str) -> Result<UserInfo, DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.nickname {
            Some(nickname) => Ok(UserInfo {
                nickname: nickname.clone(),
            }),
            None => Err(DeliveryError::Api {
                code: 40003,
                message: "invalid openid".into(),
            }),
        }
    }
}

/// Store whose writes and queries all fail; user lookup optionally works
pub struct BrokenStore {
    pub users_work: bool,
}

#[async_trait]
impl ReminderStore for BrokenStore {
    async fn get_or_create_user(&self, openid: &str) -> Result<User> {
        if self.users_work {
            Ok(User::new(openid))
        } else {
            Err(anyhow!("database is locked"))
        }
    }

    async fn save_user(&self, _user: &User, _fields: &[UserField]) -> Result<()> {
        Err(anyhow!("database is locked"))
    }

    async fn delete_user(&self, _openid: &str) -> Result<()> {
        Err(anyhow!("database is locked"))
    }

    async fn save_reminder(&self, _reminder: &Reminder) -> Result<()> {
        Err(anyhow!("database is locked"))
    }

    async fn has_time_reminders(&self, _owner_id: &str) -> Result<bool> {
        Err(anyhow!("database is locked"))
    }

    async fn find_reminders(
        &self,
        _owner_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<Reminder>> {
        Err(anyhow!("database is locked"))
    }

    async fn find_reminder_by_scene(&self, _scene: &SceneRef) -> Result<Option<Reminder>> {
        Err(anyhow!("database is locked"))
    }
}

pub fn settings() -> DispatchSettings {
    DispatchSettings {
        site_url: "https://remind.test".to_string(),
        tz: FixedOffset::east_opt(8 * 3600).unwrap(),
        media: MediaConfig {
            join_group: "media-group".to_string(),
            donate: "media-donate".to_string(),
            add_friend: "media-friend".to_string(),
        },
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub store: SqliteStore,
    pub parser: Arc<FakeParser>,
    pub side: Arc<FakeSideChannel>,
    pub profiles: Arc<FakeProfiles>,
}

pub fn harness(behaviour: Behaviour) -> Harness {
    harness_with_side(behaviour, FakeSideChannel::default())
}

pub fn harness_with_side(behaviour: Behaviour, side: FakeSideChannel) -> Harness {
    build_harness(behaviour, side, FakeProfiles::default())
}

pub fn harness_with_profiles(profiles: FakeProfiles) -> Harness {
    build_harness(Behaviour::Succeed, FakeSideChannel::default(), profiles)
}

fn build_harness(behaviour: Behaviour, side: FakeSideChannel, profiles: FakeProfiles) -> Harness {
    let store = SqliteStore::open_in_memory().unwrap();
    let parser = Arc::new(FakeParser::new(behaviour));
    let side = Arc::new(side);
    let profiles = Arc::new(profiles);
    let dispatcher = Dispatcher::new(
        Arc::new(store.clone()),
        parser.clone(),
        side.clone(),
        profiles.clone(),
        settings(),
    );
    Harness {
        dispatcher,
        store,
        parser,
        side,
        profiles,
    }
}

/// Dispatcher over a store that finds users but fails everything else
pub fn broken_store_dispatcher() -> Dispatcher {
    Dispatcher::new(
        Arc::new(BrokenStore { users_work: true }),
        Arc::new(FakeParser::new(Behaviour::Succeed)),
        Arc::new(FakeSideChannel::default()),
        Arc::new(FakeProfiles::default()),
        settings(),
    )
}
