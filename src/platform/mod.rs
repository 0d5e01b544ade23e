pub mod reply;
pub mod wechat;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DeliveryError;

/// Out-of-band sender, independent of the synchronous reply.
#[async_trait]
pub trait SideChannel: Send + Sync {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), DeliveryError>;
}

/// Public profile of a follower, as the platform reports it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub nickname: String,
}

/// Lookup of follower profiles by openid.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn user_info(&self, openid: &str) -> Result<UserInfo, DeliveryError>;
}

/// Primary routing key of an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Voice,
    Image,
    Location,
    Event,
    /// Any type the bot has no dedicated handler for (video, link, ...)
    Other(String),
}

impl MessageType {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "text" => Self::Text,
            "voice" => Self::Voice,
            "image" => Self::Image,
            "location" => Self::Location,
            "event" => Self::Event,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
            Self::Image => "image",
            Self::Location => "location",
            Self::Event => "event",
            Self::Other(name) => name,
        }
    }
}

/// Secondary routing key, only meaningful when the type is `event`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Subscribe,
    Unsubscribe,
    /// Subscribe through a QR code that carries a scene reference
    SubscribeScan,
    /// Already-subscribed user scanned a QR code
    Scan,
    Location,
    Click,
    Other(String),
}

impl EventType {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "subscribe_scan" => Self::SubscribeScan,
            "scan" => Self::Scan,
            "location" => Self::Location,
            "click" => Self::Click,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::SubscribeScan => "subscribe_scan",
            Self::Scan => "scan",
            Self::Location => "location",
            Self::Click => "click",
            Self::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub label: Option<String>,
}

/// One message delivered by the platform. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub msg_type: MessageType,
    pub event: Option<EventType>,
    /// Sender identity (the user's openid)
    pub source_id: String,
    /// The official account that received the message
    pub target_id: String,
    pub create_time: i64,
    pub msg_id: Option<String>,
    pub content: String,
    pub media_id: Option<String>,
    /// Payload of a menu click
    pub key: Option<String>,
    pub scene_id: Option<String>,
    /// Platform-side voice transcript
    pub recognition: Option<String>,
    pub location: Option<Location>,
}

impl InboundMessage {
    /// A bare message of the given type, with every optional field empty
    pub fn new(msg_type: MessageType, source_id: &str) -> Self {
        Self {
            msg_type,
            event: None,
            source_id: source_id.to_string(),
            target_id: String::new(),
            create_time: 0,
            msg_id: None,
            content: String::new(),
            media_id: None,
            key: None,
            scene_id: None,
            recognition: None,
            location: None,
        }
    }

    pub fn text(source_id: &str, content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Self::new(MessageType::Text, source_id)
        }
    }

    pub fn event(source_id: &str, event: EventType) -> Self {
        Self {
            event: Some(event),
            ..Self::new(MessageType::Event, source_id)
        }
    }

    pub fn event_name(&self) -> &str {
        self.event.as_ref().map(EventType::name).unwrap_or("")
    }

    /// Pretty JSON dump, shown back to the user for not-yet-supported features
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
