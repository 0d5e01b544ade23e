use chrono::Utc;
use tracing::{debug, info};

use super::Dispatcher;
use crate::error::DispatchError;
use crate::platform::reply::Reply;
use crate::platform::{EventType, InboundMessage};
use crate::remind::listing::{format_reminder_list, local_day_window};
use crate::remind::{SceneRef, User, UserField};

const JOIN_GROUP_TEXT: &str = "Scan the QR code below to join the user group chat:";
const DONATE_TEXT: &str = "Thanks for keeping the reminders running! Scan the code below:";
const ADD_FRIEND_TEXT: &str = "Scan the QR code below to add the maintainer as a friend:";

/// Menu buttons, keyed by the click payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClickAction {
    TodayList,
    TomorrowList,
    CustomerService,
    JoinGroup,
    Donate,
    AddFriend,
}

impl ClickAction {
    fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "time_remind_today" => Some(Self::TodayList),
            "time_remind_tomorrow" => Some(Self::TomorrowList),
            "customer_service" => Some(Self::CustomerService),
            "join_group" => Some(Self::JoinGroup),
            "donate" => Some(Self::Donate),
            "add_friend" => Some(Self::AddFriend),
            _ => None,
        }
    }
}

impl Dispatcher {
    pub(super) async fn handle_event(
        &self,
        message: &InboundMessage,
        user: User,
    ) -> Result<Reply, DispatchError> {
        match message.event.as_ref() {
            Some(EventType::Subscribe) => self.handle_subscribe(user).await,
            Some(EventType::SubscribeScan | EventType::Scan) => {
                self.handle_subscribe_scan(message, user).await
            }
            Some(EventType::Unsubscribe) => Ok(self.handle_unsubscribe(user).await),
            Some(EventType::Location) => Ok(self.handle_location(message)),
            Some(EventType::Click) => self.handle_click(message, &user).await,
            Some(EventType::Other(_)) | None => Ok(self.handle_unknown_event()),
        }
    }

    async fn handle_subscribe(&self, user: User) -> Result<Reply, DispatchError> {
        let user = user.subscribe();
        self.store
            .save_user(&user, &[UserField::Subscribed])
            .await?;
        info!("{} subscribed", user.display_name());
        Ok(Reply::text(welcome_text(&user)))
    }

    /// Shared by first-time subscriptions through a QR code and scans by existing followers.
    async fn handle_subscribe_scan(
        &self,
        message: &InboundMessage,
        user: User,
    ) -> Result<Reply, DispatchError> {
        let user = if user.subscribed {
            user
        } else {
            let user = user.subscribe();
            self.store
                .save_user(&user, &[UserField::Subscribed])
                .await?;
            self.push_text(&user.openid, &welcome_text(&user)).await;
            user
        };

        let scene_id = message.scene_id.as_deref().unwrap_or_default();
        let scene = SceneRef::parse(scene_id);
        let Some(mut reminder) = self.store.find_reminder_by_scene(&scene).await? else {
            debug!("No reminder behind scene {:?}", scene_id);
            return Ok(Reply::text(""));
        };

        if reminder.add_participant(&user.openid) {
            self.store.save_reminder(&reminder).await?;
            info!(
                "{} joined reminder {}",
                user.display_name(),
                reminder.id
            );
        }

        Ok(self
            .handle_text(message, &user, &reminder.title(), Some(reminder))
            .await)
    }

    /// Always says goodbye; storage trouble is logged, not shown.
    async fn handle_unsubscribe(&self, user: User) -> Reply {
        let user = user.unsubscribe();
        if let Err(e) = self.persist_unsubscribe(&user).await {
            self.log_failure(&DispatchError::Internal(e));
        }
        info!("{} unsubscribed", user.display_name());
        Reply::text("Bye")
    }

    async fn persist_unsubscribe(&self, user: &User) -> anyhow::Result<()> {
        if self.store.has_time_reminders(&user.openid).await? {
            self.store
                .save_user(user, &[UserField::Subscribed])
                .await
        } else {
            self.store.delete_user(&user.openid).await
        }
    }

    async fn handle_click(
        &self,
        message: &InboundMessage,
        user: &User,
    ) -> Result<Reply, DispatchError> {
        let key = message.key.as_deref().unwrap_or_default();
        let Some(action) = ClickAction::from_key(key) else {
            debug!("Unknown menu key {:?}", key);
            return Ok(self.handle_unknown_event());
        };

        match action {
            ClickAction::TodayList => self.reminder_list_reply(user, 0).await,
            ClickAction::TomorrowList => self.reminder_list_reply(user, 1).await,
            ClickAction::CustomerService => {
                info!("Transferring {} to customer service", user.display_name());
                Ok(Reply::TransferToHuman)
            }
            ClickAction::JoinGroup => {
                self.push_text(&user.openid, JOIN_GROUP_TEXT).await;
                Ok(Reply::image(self.settings.media.join_group.as_str()))
            }
            ClickAction::Donate => {
                self.push_text(&user.openid, DONATE_TEXT).await;
                Ok(Reply::image(self.settings.media.donate.as_str()))
            }
            ClickAction::AddFriend => {
                self.push_text(&user.openid, ADD_FRIEND_TEXT).await;
                Ok(Reply::image(self.settings.media.add_friend.as_str()))
            }
        }
    }

    async fn reminder_list_reply(
        &self,
        user: &User,
        days_ahead: u64,
    ) -> Result<Reply, DispatchError> {
        let now = Utc::now();
        let tz = &self.settings.tz;
        let (from, to) = local_day_window(now, tz, days_ahead);
        let reminders = self.store.find_reminders(&user.openid, from, to).await?;

        let tomorrow = days_ahead > 0;
        let lines = format_reminder_list(&reminders, now, tomorrow, tz, &self.settings.site_url);
        if lines.is_empty() {
            let notice = if tomorrow {
                "/:coffee Nothing scheduled for tomorrow yet, enjoy the free day!"
            } else {
                "/:coffee Nothing scheduled for today, enjoy the free day!"
            };
            return Ok(Reply::text(notice));
        }

        let day = if tomorrow { "tomorrow" } else { "today" };
        Ok(Reply::text(format!(
            "/:sun Hi {}, your reminders {}:\n\n{}",
            user.display_name(),
            day,
            lines.join("\n")
        )))
    }

    /// Best-effort out-of-band message; failures never change the reply.
    async fn push_text(&self, recipient: &str, text: &str) {
        if let Err(e) = self.side_channel.send_text(recipient, text).await {
            self.log_failure(&DispatchError::from(e));
        }
    }
}

fn welcome_text(user: &User) -> String {
    format!(
        "/:rose Hi {}, welcome!\n\n\
         I'm a reminder bot. Tell me by voice or text when you need a nudge, for example:\n\n\
         \"tomorrow at 7pm call mom\"\n\
         \"every day at 8am take pills\"",
        user.display_name()
    )
}
