use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    EventType, InboundMessage, Location, MessageType, ProfileSource, SideChannel, UserInfo,
};
use crate::config::WechatConfig;
use crate::error::DeliveryError;

/// Prefix the platform puts in front of the scene id of a subscribe-through-QR event
const QR_SCENE_PREFIX: &str = "qrscene_";

/// Refresh the access token this long before the platform expires it
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Error codes meaning the cached access token is no longer accepted
const TOKEN_INVALID_CODES: [i64; 3] = [40001, 40014, 42001];

// ── Inbound decoding ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct XmlMessage {
    #[serde(rename = "ToUserName", default)]
    to_user: String,
    #[serde(rename = "FromUserName")]
    from_user: String,
    #[serde(rename = "CreateTime", default)]
    create_time: i64,
    #[serde(rename = "MsgType")]
    msg_type: String,
    #[serde(rename = "MsgId", default)]
    msg_id: Option<String>,
    #[serde(rename = "Content", default)]
    content: Option<String>,
    #[serde(rename = "MediaId", default)]
    media_id: Option<String>,
    #[serde(rename = "Recognition", default)]
    recognition: Option<String>,
    #[serde(rename = "Event", default)]
    event: Option<String>,
    #[serde(rename = "EventKey", default)]
    event_key: Option<String>,
    #[serde(rename = "Location_X", default)]
    location_x: Option<f64>,
    #[serde(rename = "Location_Y", default)]
    location_y: Option<f64>,
    #[serde(rename = "Label", default)]
    label: Option<String>,
    #[serde(rename = "Latitude", default)]
    latitude: Option<f64>,
    #[serde(rename = "Longitude", default)]
    longitude: Option<f64>,
}

/// Decode a pushed XML message into an [`InboundMessage`].
pub fn decode_message(body: &str) -> Result<InboundMessage> {
    let raw: XmlMessage =
        quick_xml::de::from_str(body).context("Failed to decode inbound XML message")?;

    let msg_type = MessageType::from_name(&raw.msg_type);
    let mut message = InboundMessage::new(msg_type, &raw.from_user);
    message.target_id = raw.to_user;
    message.create_time = raw.create_time;
    message.msg_id = raw.msg_id.filter(|id| !id.is_empty());
    message.content = raw.content.unwrap_or_default();
    message.media_id = raw.media_id.filter(|id| !id.is_empty());
    message.recognition = raw.recognition;

    let event_key = raw.event_key.unwrap_or_default();
    if message.msg_type == MessageType::Event {
        let event = match EventType::from_name(raw.event.as_deref().unwrap_or_default()) {
            EventType::Subscribe => match event_key.strip_prefix(QR_SCENE_PREFIX) {
                Some(scene_id) => {
                    message.scene_id = Some(scene_id.to_string());
                    EventType::SubscribeScan
                }
                None => EventType::Subscribe,
            },
            EventType::Scan => {
                message.scene_id = Some(event_key.clone());
                EventType::Scan
            }
            EventType::Click => {
                message.key = Some(event_key.clone());
                EventType::Click
            }
            other => other,
        };
        message.event = Some(event);
    }

    message.location = match (raw.location_x, raw.location_y, raw.latitude, raw.longitude) {
        (Some(latitude), Some(longitude), _, _) | (_, _, Some(latitude), Some(longitude)) => {
            Some(Location {
                latitude,
                longitude,
                label: raw.label.filter(|l| !l.is_empty()),
            })
        }
        _ => None,
    };

    Ok(message)
}

/// Check the `signature` query parameter the platform attaches to every webhook call.
pub fn verify_signature(token: &str, signature: &str, timestamp: &str, nonce: &str) -> bool {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize()).eq_ignore_ascii_case(signature)
}

// ── Outbound API client ──────────────────────────────────────────────────────

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    #[serde(default)]
    nickname: String,
    #[serde(flatten)]
    status: ApiStatus,
}

/// Client for the platform's HTTP API, used for out-of-band "custom" messages.
pub struct WechatClient {
    client: reqwest::Client,
    config: WechatConfig,
    token: Mutex<Option<AccessToken>>,
}

impl WechatClient {
    pub fn new(config: WechatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, DeliveryError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/cgi-bin/token", self.config.api_base);
        debug!("Fetching access token from {}", url);

        let response: TokenResponse = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.config.app_id.as_str()),
                ("secret", self.config.app_secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let value = match response.access_token {
            Some(value) if response.errcode == 0 => value,
            _ => {
                return Err(DeliveryError::Api {
                    code: response.errcode,
                    message: response.errmsg,
                })
            }
        };

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(AccessToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        info!("Access token refreshed, valid for {}s", response.expires_in);

        Ok(value)
    }

    /// Map a non-zero `errcode` to an error, dropping the cached token when it was refused.
    async fn check_status(&self, status: ApiStatus) -> Result<(), DeliveryError> {
        if status.errcode == 0 {
            return Ok(());
        }
        if TOKEN_INVALID_CODES.contains(&status.errcode) {
            self.token.lock().await.take();
        }
        Err(DeliveryError::Api {
            code: status.errcode,
            message: status.errmsg,
        })
    }
}

#[async_trait]
impl ProfileSource for WechatClient {
    async fn user_info(&self, openid: &str) -> Result<UserInfo, DeliveryError> {
        let token = self.access_token().await?;
        let url = format!("{}/cgi-bin/user/info", self.config.api_base);

        let response: UserInfoResponse = self
            .client
            .get(&url)
            .query(&[
                ("access_token", token.as_str()),
                ("openid", openid),
                ("lang", "zh_CN"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.check_status(response.status).await?;
        debug!("Fetched profile of {}", openid);
        Ok(UserInfo {
            nickname: response.nickname,
        })
    }
}

#[async_trait]
impl SideChannel for WechatClient {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        let token = self.access_token().await?;
        let url = format!("{}/cgi-bin/message/custom/send", self.config.api_base);

        let status: ApiStatus = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&serde_json::json!({
                "touser": recipient,
                "msgtype": "text",
                "text": { "content": text },
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.check_status(status).await?;
        debug!("Custom message delivered to {}", recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_partial_json, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn client_for(server: &MockServer) -> WechatClient {
        WechatClient::new(WechatConfig {
            app_id: "wx123".into(),
            app_secret: "secret".into(),
            token: "tok".into(),
            api_base: server.uri(),
        })
    }

    #[test]
    fn test_decode_text_message() {
        let xml = "<xml>\
            <ToUserName><![CDATA[gh_account]]></ToUserName>\
            <FromUserName><![CDATA[oUser]]></FromUserName>\
            <CreateTime>1348831860</CreateTime>\
            <MsgType><![CDATA[text]]></MsgType>\
            <Content><![CDATA[tomorrow at 9am call mom]]></Content>\
            <MsgId>1234567890123456</MsgId>\
            </xml>";
        let msg = decode_message(xml).unwrap();
        assert_eq!(msg.msg_type, MessageType::Text);
        assert_eq!(msg.source_id, "oUser");
        assert_eq!(msg.target_id, "gh_account");
        assert_eq!(msg.create_time, 1348831860);
        assert_eq!(msg.content, "tomorrow at 9am call mom");
        assert_eq!(msg.msg_id.as_deref(), Some("1234567890123456"));
        assert_eq!(msg.event, None);
    }

    #[test]
    fn test_decode_voice_message() {
        let xml = "<xml>\
            <ToUserName><![CDATA[gh_account]]></ToUserName>\
            <FromUserName><![CDATA[oUser]]></FromUserName>\
            <CreateTime>1357290913</CreateTime>\
            <MsgType><![CDATA[voice]]></MsgType>\
            <MediaId><![CDATA[media_id]]></MediaId>\
            <Format><![CDATA[amr]]></Format>\
            <Recognition><![CDATA[in 2 hours stretch]]></Recognition>\
            <MsgId>1234567890123456</MsgId>\
            </xml>";
        let msg = decode_message(xml).unwrap();
        assert_eq!(msg.msg_type, MessageType::Voice);
        assert_eq!(msg.media_id.as_deref(), Some("media_id"));
        assert_eq!(msg.recognition.as_deref(), Some("in 2 hours stretch"));
    }

    #[test]
    fn test_decode_subscribe_with_qr_scene() {
        let xml = "<xml>\
            <ToUserName><![CDATA[gh_account]]></ToUserName>\
            <FromUserName><![CDATA[oUser]]></FromUserName>\
            <CreateTime>123456789</CreateTime>\
            <MsgType><![CDATA[event]]></MsgType>\
            <Event><![CDATA[subscribe]]></Event>\
            <EventKey><![CDATA[qrscene_123123]]></EventKey>\
            <Ticket><![CDATA[TICKET]]></Ticket>\
            </xml>";
        let msg = decode_message(xml).unwrap();
        assert_eq!(msg.event, Some(EventType::SubscribeScan));
        assert_eq!(msg.scene_id.as_deref(), Some("123123"));
    }

    #[test]
    fn test_decode_plain_subscribe_scan_and_click() {
        let subscribe = "<xml><FromUserName>oUser</FromUserName>\
            <MsgType>event</MsgType><Event>subscribe</Event></xml>";
        let msg = decode_message(subscribe).unwrap();
        assert_eq!(msg.event, Some(EventType::Subscribe));
        assert_eq!(msg.scene_id, None);

        let scan = "<xml><FromUserName>oUser</FromUserName>\
            <MsgType>event</MsgType><Event>SCAN</Event><EventKey>abc-def</EventKey></xml>";
        let msg = decode_message(scan).unwrap();
        assert_eq!(msg.event, Some(EventType::Scan));
        assert_eq!(msg.scene_id.as_deref(), Some("abc-def"));

        let click = "<xml><FromUserName>oUser</FromUserName>\
            <MsgType>event</MsgType><Event>CLICK</Event><EventKey>TIME_REMIND_TODAY</EventKey></xml>";
        let msg = decode_message(click).unwrap();
        assert_eq!(msg.event, Some(EventType::Click));
        assert_eq!(msg.key.as_deref(), Some("TIME_REMIND_TODAY"));
    }

    #[test]
    fn test_decode_location_event() {
        let xml = "<xml><FromUserName>oUser</FromUserName>\
            <MsgType>event</MsgType><Event>LOCATION</Event>\
            <Latitude>23.137466</Latitude><Longitude>113.352425</Longitude>\
            <Precision>119.385040</Precision></xml>";
        let msg = decode_message(xml).unwrap();
        assert_eq!(msg.event, Some(EventType::Location));
        let location = msg.location.unwrap();
        assert_eq!(location.latitude, 23.137466);
        assert_eq!(location.longitude, 113.352425);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_message("not xml at all").is_err());
        assert!(decode_message("<xml><Content>x</Content></xml>").is_err());
    }

    #[test]
    fn test_signature() {
        let expected = "6bca7cb2def9d8d7c403ac6dd198e3dbb4152111";
        assert!(verify_signature("tok", expected, "1700000000", "nonce42"));
        assert!(verify_signature(
            "tok",
            &expected.to_uppercase(),
            "1700000000",
            "nonce42"
        ));
        assert!(!verify_signature("tok", expected, "1700000001", "nonce42"));
        assert!(!verify_signature("other", expected, "1700000000", "nonce42"));
    }

    #[tokio::test]
    async fn test_send_text_fetches_and_caches_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/cgi-bin/token"))
            .and(query_param("appid", "wx123"))
            .and(query_param("secret", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ACCESS",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/custom/send"))
            .and(query_param("access_token", "ACCESS"))
            .and(body_partial_json(serde_json::json!({
                "touser": "oUser",
                "msgtype": "text",
                "text": { "content": "hello" }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "errcode": 0, "errmsg": "ok" })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.send_text("oUser", "hello").await.unwrap();
        client.send_text("oUser", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_text_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/cgi-bin/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ACCESS",
                "expires_in": 7200
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/custom/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errcode": 45015,
                "errmsg": "response out of time limit"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.send_text("oUser", "hello").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Api { code: 45015, .. }));
    }

    #[tokio::test]
    async fn test_token_error_is_delivery_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/cgi-bin/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errcode": 40013,
                "errmsg": "invalid appid"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.send_text("oUser", "hello").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Api { code: 40013, .. }));
    }

    #[tokio::test]
    async fn test_user_info_fetches_nickname() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/cgi-bin/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ACCESS",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/cgi-bin/user/info"))
            .and(query_param("access_token", "ACCESS"))
            .and(query_param("openid", "oUser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "subscribe": 1,
                "openid": "oUser",
                "nickname": "Alice",
                "language": "zh_CN"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let info = client.user_info("oUser").await.unwrap();
        assert_eq!(info.nickname, "Alice");
    }

    #[tokio::test]
    async fn test_user_info_refused_token_is_dropped() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/cgi-bin/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ACCESS",
                "expires_in": 7200
            })))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/cgi-bin/user/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errcode": 40001,
                "errmsg": "invalid credential"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.user_info("oUser").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Api { code: 40001, .. }));
        // The refused token is not reused on the next call
        assert!(client.user_info("oUser").await.is_err());
    }
}
