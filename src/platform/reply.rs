use anyhow::{Context, Result};
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::InboundMessage;

/// The platform rejects passive text replies larger than this many bytes.
pub const MAX_TEXT_BYTES: usize = 2048;

/// The single response produced for one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Image { media_id: String },
    TransferToHuman,
}

impl Reply {
    /// Text reply, truncated to [`MAX_TEXT_BYTES`].
    pub fn text(content: impl Into<String>) -> Self {
        let mut content = content.into();
        let keep = truncate_to_bytes(&content, MAX_TEXT_BYTES).len();
        content.truncate(keep);
        Self::Text(content)
    }

    pub fn image(media_id: impl Into<String>) -> Self {
        Self::Image {
            media_id: media_id.into(),
        }
    }

    /// Wrap the reply in the platform's passive-reply XML envelope.
    pub fn render(&self, message: &InboundMessage, create_time: i64) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Start(BytesStart::new("xml")))?;
        write_cdata(&mut writer, "ToUserName", &message.source_id)?;
        write_cdata(&mut writer, "FromUserName", &message.target_id)?;
        writer.write_event(Event::Start(BytesStart::new("CreateTime")))?;
        writer.write_event(Event::Text(BytesText::new(&create_time.to_string())))?;
        writer.write_event(Event::End(BytesEnd::new("CreateTime")))?;

        match self {
            Reply::Text(content) => {
                write_cdata(&mut writer, "MsgType", "text")?;
                write_cdata(
                    &mut writer,
                    "Content",
                    truncate_to_bytes(content, MAX_TEXT_BYTES),
                )?;
            }
            Reply::Image { media_id } => {
                write_cdata(&mut writer, "MsgType", "image")?;
                writer.write_event(Event::Start(BytesStart::new("Image")))?;
                write_cdata(&mut writer, "MediaId", media_id)?;
                writer.write_event(Event::End(BytesEnd::new("Image")))?;
            }
            Reply::TransferToHuman => {
                write_cdata(&mut writer, "MsgType", "transfer_customer_service")?;
            }
        }

        writer.write_event(Event::End(BytesEnd::new("xml")))?;
        String::from_utf8(writer.into_inner()).context("Reply envelope is not valid UTF-8")
    }
}

/// `<tag><![CDATA[value]]></tag>`, with any "]]>" in `value` split across sections
fn write_cdata(writer: &mut Writer<Vec<u8>>, tag: &str, value: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    for section in BytesCData::escaped(value) {
        writer.write_event(Event::CData(section))?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a character.
pub fn truncate_to_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MessageType;

    fn message() -> InboundMessage {
        let mut msg = InboundMessage::new(MessageType::Text, "oUser");
        msg.target_id = "gh_account".to_string();
        msg
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        // "提" is three bytes, so a four byte budget keeps one char
        assert_eq!(truncate_to_bytes("提醒", 4), "提");
        assert_eq!(truncate_to_bytes("提醒", 6), "提醒");
        assert_eq!(truncate_to_bytes("abc", 10), "abc");
        assert_eq!(truncate_to_bytes("😀", 3), "");
    }

    #[test]
    fn test_text_reply_is_capped() {
        let long = "醒".repeat(1000);
        let Reply::Text(content) = Reply::text(long) else {
            panic!("expected text reply");
        };
        assert!(content.len() <= MAX_TEXT_BYTES);
        assert_eq!(content.len(), 2046);
        assert!(content.chars().all(|c| c == '醒'));
    }

    #[test]
    fn test_render_text_envelope() {
        let xml = Reply::text("hello").render(&message(), 1_700_000_000).unwrap();
        assert_eq!(
            xml,
            "<xml><ToUserName><![CDATA[oUser]]></ToUserName>\
             <FromUserName><![CDATA[gh_account]]></FromUserName>\
             <CreateTime>1700000000</CreateTime>\
             <MsgType><![CDATA[text]]></MsgType><Content><![CDATA[hello]]></Content></xml>"
        );
    }

    #[test]
    fn test_render_image_and_transfer() {
        let xml = Reply::image("media-1").render(&message(), 1).unwrap();
        assert!(xml.contains("<MsgType><![CDATA[image]]></MsgType>"));
        assert!(xml.contains("<Image><MediaId><![CDATA[media-1]]></MediaId></Image>"));

        let xml = Reply::TransferToHuman.render(&message(), 1).unwrap();
        assert!(xml.contains("<MsgType><![CDATA[transfer_customer_service]]></MsgType>"));
        assert!(!xml.contains("<Content>"));
    }

    #[test]
    fn test_cdata_terminator_is_split() {
        let xml = Reply::text("a]]>b").render(&message(), 1).unwrap();
        assert!(xml.contains("<Content><![CDATA[a]]]]><![CDATA[>b]]></Content>"));
    }

    #[test]
    fn test_render_empty_acknowledgement() {
        let xml = Reply::text("").render(&message(), 1).unwrap();
        assert!(xml.ends_with("<MsgType><![CDATA[text]]></MsgType><Content><![CDATA[]]></Content></xml>"));
    }
}
