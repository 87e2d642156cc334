use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Photo reference stored until the upload resolves to a real URL.
pub const PHOTO_PLACEHOLDER: &str = "NOTSET";

pub const MAX_TEXT_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageBody {
    Text(String),
    PhotoRef(String),
}

impl MessageBody {
    pub fn placeholder() -> Self {
        Self::PhotoRef(PHOTO_PLACEHOLDER.to_owned())
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::PhotoRef(r) if r == PHOTO_PLACEHOLDER)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::Text(text) if text.trim().is_empty() => Err(ChatError::invalid("text must not be empty")),
            Self::Text(text) if text.len() > MAX_TEXT_BYTES => {
                Err(ChatError::invalid(format!("text exceeds {MAX_TEXT_BYTES} bytes")))
            }
            Self::PhotoRef(r) if r.trim().is_empty() => Err(ChatError::invalid("photoRef must not be empty")),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub seq: u64,
    pub channel_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: MessageBody,
    pub created_at: i64,
}

/// `{channel}-{seq}`, zero padded so ids sort the same way sequence numbers do.
pub fn message_id(channel_id: &str, seq: u64) -> String {
    format!("{channel_id}-{seq:012}")
}

pub fn parse_message_id(id: &str) -> Option<(&str, u64)> {
    let (channel_id, seq) = id.rsplit_once('-')?;
    if channel_id.is_empty() {
        return None;
    }
    Some((channel_id, seq.parse().ok()?))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSnapshot {
    pub channel_id: String,
    pub typing_user_ids: BTreeSet<String>,
}

impl TypingSnapshot {
    /// Whether `me` should see a typing indicator. A lone typer never
    /// triggers the indicator for themselves.
    pub fn others_typing(&self, me: &str) -> bool {
        match self.typing_user_ids.len() {
            0 => false,
            1 => !self.typing_user_ids.contains(me),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncNotice {
    pub channel_id: Option<String>,
    pub reason: String,
}

/// Everything the fan-out layer delivers to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Event {
    Message(Message),
    MessageUpdated(Message),
    Typing(TypingSnapshot),
    ChannelCreated(Channel),
    /// Terminal: the subscriber fell behind and must replay via `tail`.
    Resync(ResyncNotice),
}

pub(crate) fn now_millis() -> i64 {
    i64::try_from(time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(users: &[&str]) -> TypingSnapshot {
        TypingSnapshot {
            channel_id: "c".into(),
            typing_user_ids: users.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn timestamps_are_unix_millis() {
        let before = now_millis();
        assert!(before > 1_600_000_000_000 && before < 10_000_000_000_000);
        assert!(now_millis() >= before);
    }

    #[test]
    fn lone_typer_does_not_see_themselves() {
        assert!(!snapshot(&["me"]).others_typing("me"));
        assert!(snapshot(&["you"]).others_typing("me"));
        assert!(!snapshot(&[]).others_typing("me"));
    }

    #[test]
    fn two_typers_always_show() {
        assert!(snapshot(&["me", "you"]).others_typing("me"));
        assert!(snapshot(&["me", "you"]).others_typing("them"));
    }

    #[test]
    fn message_ids_sort_by_seq() {
        let a = message_id("0193abc", 9);
        let b = message_id("0193abc", 10);
        assert!(a < b);
        assert_eq!(parse_message_id(&b), Some(("0193abc", 10)));
        assert_eq!(parse_message_id("nodash"), None);
        assert_eq!(parse_message_id("-5"), None);
    }

    #[test]
    fn body_wire_shape() {
        let text = serde_json::to_value(MessageBody::Text("hi".into())).unwrap();
        assert_eq!(text, serde_json::json!({"text": "hi"}));
        let photo = serde_json::to_value(MessageBody::placeholder()).unwrap();
        assert_eq!(photo, serde_json::json!({"photoRef": "NOTSET"}));
    }

    #[test]
    fn blank_bodies_rejected() {
        assert!(MessageBody::Text("   ".into()).validate().is_err());
        assert!(MessageBody::PhotoRef(String::new()).validate().is_err());
        assert!(MessageBody::Text("x".repeat(MAX_TEXT_BYTES + 1)).validate().is_err());
        assert!(MessageBody::placeholder().validate().is_ok());
    }
}
