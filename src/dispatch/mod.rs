mod events;
#[cfg(test)]
pub(crate) mod testing;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{FixedOffset, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{Config, MediaConfig};
use crate::error::DispatchError;
use crate::platform::reply::Reply;
use crate::platform::{InboundMessage, MessageType, ProfileSource, SideChannel};
use crate::remind::parser::ReminderParser;
use crate::remind::{Reminder, User, UserField};
use crate::store::ReminderStore;

const HELP_TEXT: &str = "/:jj To set a reminder, just tell me by voice or text, for example:\n\n\
    \"in 2 weeks remind me to see the doctor\"\n\
    \"tomorrow at 7pm call mom\"\n\
    \"monthly at 9am pay the credit card [Facepalm]\"";

const VOICE_FAILURE_TEXT: &str = "\u{1F648} Oops, voice recognition seems to be acting up again. \
    Please try once more, or just send me text~";

/// Per-deployment values the handlers need besides their collaborators
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub site_url: String,
    pub tz: FixedOffset,
    pub media: MediaConfig,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            site_url: config.server.site_url.clone(),
            tz: config.timezone(),
            media: config.media.clone(),
        }
    }
}

/// Resolves each inbound message to a handler and always produces exactly one reply.
pub struct Dispatcher {
    store: Arc<dyn ReminderStore>,
    parser: Arc<dyn ReminderParser>,
    side_channel: Arc<dyn SideChannel>,
    profiles: Arc<dyn ProfileSource>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        parser: Arc<dyn ReminderParser>,
        side_channel: Arc<dyn SideChannel>,
        profiles: Arc<dyn ProfileSource>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            parser,
            side_channel,
            profiles,
            settings,
        }
    }

    /// Total over every inbound message: failures end up in the reply, never in the caller.
    pub async fn handle(&self, message: &InboundMessage) -> Reply {
        let user = match self.store.get_or_create_user(&message.source_id).await {
            Ok(user) => user,
            Err(e) => {
                self.log_failure(&DispatchError::Internal(e));
                return self.handle_unknown();
            }
        };
        let user = self.with_nickname(user).await;

        info!(
            "Get a {} {} from {}",
            message.event_name(),
            message.msg_type.name(),
            user.display_name()
        );
        if let Some(msg_id) = &message.msg_id {
            debug!("Platform message id: {}", msg_id);
        }

        match self.route(message, user).await {
            Ok(reply) => reply,
            Err(e) => {
                self.log_failure(&e);
                self.handle_unknown()
            }
        }
    }

    /// Fill in the nickname from the platform profile while we only know the openid.
    /// Lookup or save failures leave the user as it was.
    async fn with_nickname(&self, user: User) -> User {
        if !user.nickname.is_empty() {
            return user;
        }
        let nickname = match self.profiles.user_info(&user.openid).await {
            Ok(info) if !info.nickname.is_empty() => info.nickname,
            Ok(_) => return user,
            Err(e) => {
                warn!("Failed to fetch profile of {}: {}", user.openid, e);
                return user;
            }
        };

        let user = User { nickname, ..user };
        if let Err(e) = self.store.save_user(&user, &[UserField::Nickname]).await {
            warn!("Failed to save nickname of {}: {:#}", user.openid, e);
        }
        user
    }

    async fn route(&self, message: &InboundMessage, user: User) -> Result<Reply, DispatchError> {
        match &message.msg_type {
            MessageType::Event => self.handle_event(message, user).await,
            MessageType::Text => Ok(self
                .handle_text(message, &user, &message.content, None)
                .await),
            MessageType::Voice => Ok(self.handle_voice(message, &user).await),
            MessageType::Location => Ok(self.handle_location(message)),
            MessageType::Image | MessageType::Other(_) => Ok(self.handle_unknown()),
        }
    }

    /// Parse `text` into a new reminder and confirm it, or confirm `existing` without parsing.
    async fn handle_text(
        &self,
        message: &InboundMessage,
        user: &User,
        text: &str,
        existing: Option<Reminder>,
    ) -> Reply {
        let outcome = match existing {
            Some(reminder) => Ok(reminder),
            None => self.create_reminder(message, user, text).await,
        };

        match outcome {
            Ok(reminder) => self.confirmation_reply(&reminder),
            Err(DispatchError::Parse(e)) => Reply::text(e.to_string()),
            Err(DispatchError::Delivery(e)) => {
                debug!("Ignoring delivery error while handling text: {}", e);
                self.not_understood_reply(text)
            }
            Err(DispatchError::Internal(e)) => {
                error!("Semantic parse error: {:#}", e);
                self.not_understood_reply(text)
            }
        }
    }

    async fn create_reminder(
        &self,
        message: &InboundMessage,
        user: &User,
        text: &str,
    ) -> Result<Reminder, DispatchError> {
        // The parser is a black box; a panic inside it must still end in a reply
        let parsed = panic::catch_unwind(AssertUnwindSafe(|| self.parser.parse(text, &user.openid)))
            .map_err(|_| anyhow!("Reminder parser panicked on {:?}", text))?;

        let mut reminder = parsed?;
        reminder.owner_id = user.openid.clone();
        if let Some(media_id) = &message.media_id {
            reminder.media_id = Some(media_id.clone());
        }
        self.store.save_reminder(&reminder).await?;

        info!(
            "Reminder {} created for {} at {}",
            reminder.id,
            user.display_name(),
            reminder.time
        );
        Ok(reminder)
    }

    async fn handle_voice(&self, message: &InboundMessage, user: &User) -> Reply {
        let transcript = message.recognition.as_deref().unwrap_or_default().trim();
        if transcript.is_empty() {
            return Reply::text(VOICE_FAILURE_TEXT);
        }
        self.handle_text(message, user, transcript, None).await
    }

    fn handle_location(&self, message: &InboundMessage) -> Reply {
        Reply::text(format!(
            "\u{1F4AA} Location-based reminders are in development, stay tuned~\n{}",
            message.to_pretty_json()
        ))
    }

    fn handle_unknown(&self) -> Reply {
        Reply::text(HELP_TEXT)
    }

    fn handle_unknown_event(&self) -> Reply {
        self.handle_unknown()
    }

    fn confirmation_reply(&self, reminder: &Reminder) -> Reply {
        let mut lines = vec![
            format!(
                "/:ok I'll remind you {}: {}",
                reminder.time_until(Utc::now()),
                reminder.event
            ),
            format!("\nNote: {}", reminder.description),
            format!("Time: {}", reminder.local_time_string(&self.settings.tz)),
        ];
        if let Some(repeat) = reminder.repeat_text() {
            lines.push(format!("Repeat: {}", repeat));
        }
        lines.push(format!(
            "\n<a href=\"{}\">Edit/Share</a>",
            reminder.absolute_url(&self.settings.site_url)
        ));
        Reply::text(lines.join("\n"))
    }

    fn not_understood_reply(&self, text: &str) -> Reply {
        Reply::text(format!(
            "\u{1F648} Sorry, I'm still a fairly basic reminder bot and couldn't understand \
             what you just said:\n\n\"{}\"\n\n\
             Try telling me when to remind you, like this:\n\n\
             \"in 2 weeks remind me to see the doctor\"\n\
             \"tomorrow at 7pm call mom\"\n\
             \"monthly at 9am pay the credit card [Facepalm]\"",
            text
        ))
    }

    fn log_failure(&self, err: &DispatchError) {
        match err {
            DispatchError::Parse(e) => debug!("Parse failure: {}", e),
            DispatchError::Delivery(e) => warn!("Side-channel delivery failed: {}", e),
            DispatchError::Internal(e) => error!("Internal error while dispatching: {:#}", e),
        }
    }
}
