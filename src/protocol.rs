//! Frames exchanged over the event stream.
//!
//! Client → server frames are `{"type": ..., ...fields}`. Server → client
//! frames are `{"type": ..., "data": ...}`: either an [`Event`] or a [`Reply`]
//! to the client's last frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::ChatError,
    gateway::{Connection, Session},
    model::{Event, Message, MessageBody},
};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Authenticate {
        display_name: String,
    },
    Resume {
        token: String,
    },
    Subscribe {
        channel_id: String,
        after_seq: Option<u64>,
    },
    Unsubscribe {
        channel_id: String,
    },
    SubscribeChannels,
    Typing {
        channel_id: String,
        is_typing: bool,
    },
    Send {
        channel_id: String,
        body: MessageBody,
        request_id: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Reply {
    Authenticated(Session),
    Ack(Ack),
    Sent(Message),
    Error(ErrorBody),
}

impl Reply {
    pub fn error(err: &ChatError) -> Self {
        Reply::Error(ErrorBody {
            code: err.code(),
            message: err.to_string(),
        })
    }

    fn ack(op: &'static str, channel_id: Option<String>) -> Self {
        Reply::Ack(Ack { op, channel_id })
    }
}

/// Malformed frames are rejected back to the sender, never skipped silently.
pub fn parse(text: &str) -> Result<ClientFrame, ChatError> {
    serde_json::from_str(text).map_err(|e| ChatError::invalid(format!("malformed frame: {e}")))
}

pub async fn apply(conn: &mut Connection, frame: ClientFrame) -> Reply {
    let result = match frame {
        ClientFrame::Authenticate { display_name } => conn.authenticate(&display_name).map(Reply::Authenticated),
        ClientFrame::Resume { token } => conn.resume(&token).map(Reply::Authenticated),
        ClientFrame::Subscribe { channel_id, after_seq } => conn
            .subscribe(&channel_id, after_seq)
            .await
            .map(|()| Reply::ack("subscribe", Some(channel_id))),
        ClientFrame::Unsubscribe { channel_id } => conn
            .unsubscribe(&channel_id)
            .map(|_| Reply::ack("unsubscribe", Some(channel_id))),
        ClientFrame::SubscribeChannels => conn.subscribe_channels().map(|()| Reply::ack("subscribeChannels", None)),
        ClientFrame::Typing { channel_id, is_typing } => conn
            .set_typing(&channel_id, is_typing)
            .map(|()| Reply::ack("typing", Some(channel_id))),
        ClientFrame::Send {
            channel_id,
            body,
            request_id,
        } => conn.send(&channel_id, body, request_id.as_deref()).await.map(Reply::Sent),
    };
    result.unwrap_or_else(|e| Reply::error(&e))
}

/// Serialize an event for one viewer. Typing events carry `othersTyping`,
/// the indicator state as that viewer should see it.
pub fn render_event(event: &Event, viewer: Option<&str>) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(event)?;
    if let (Event::Typing(snapshot), Some(viewer)) = (event, viewer)
        && let Some(data) = value.get_mut("data").and_then(Value::as_object_mut)
    {
        data.insert("othersTyping".into(), Value::Bool(snapshot.others_typing(viewer)));
    }
    serde_json::to_string(&value)
}
