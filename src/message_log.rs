use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    db::Store,
    dispatch::{Dispatcher, Interest, Subscription, Topic},
    error::{ChatError, Result},
    model::{Event, Message, MessageBody, message_id, now_millis, parse_message_id},
    presence::PresenceAggregator,
    registry::ChannelRegistry,
};

pub const DEFAULT_TAIL: usize = 25;
pub const MAX_TAIL: usize = 500;

/// One writer at a time per channel. `next_seq` is loaded from the store the
/// first time the lane is used.
#[derive(Default)]
struct Lane {
    next_seq: Mutex<Option<u64>>,
}

pub struct MessageLog {
    store: Store,
    registry: Arc<ChannelRegistry>,
    dispatcher: Dispatcher,
    lanes: DashMap<String, Arc<Lane>>,
    max_tail: usize,
}

impl MessageLog {
    pub fn new(store: Store, registry: Arc<ChannelRegistry>, dispatcher: Dispatcher, max_tail: usize) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            lanes: DashMap::new(),
            max_tail: max_tail.max(1),
        }
    }

    fn lane(&self, channel_id: &str) -> Result<Arc<Lane>> {
        self.registry.require(channel_id)?;
        Ok(self.lanes.entry(channel_id.to_owned()).or_default().clone())
    }

    async fn current_seq(&self, channel_id: &str, slot: &mut Option<u64>) -> Result<u64> {
        if let Some(seq) = *slot {
            return Ok(seq);
        }
        let seq = self.store.max_seq(channel_id).await? + 1;
        *slot = Some(seq);
        Ok(seq)
    }

    /// Append to the channel's log. With a `request_id`, a retried append
    /// returns the message stored by the first attempt.
    pub async fn append(
        &self,
        channel_id: &str,
        sender_id: &str,
        sender_name: &str,
        body: MessageBody,
        request_id: Option<&str>,
    ) -> Result<Message> {
        if sender_id.trim().is_empty() {
            return Err(ChatError::invalid("senderId must not be empty"));
        }
        if sender_name.trim().is_empty() {
            return Err(ChatError::invalid("senderName must not be empty"));
        }
        if request_id.is_some_and(|r| r.trim().is_empty()) {
            return Err(ChatError::invalid("requestId must not be empty"));
        }
        body.validate()?;

        let lane = self.lane(channel_id)?;
        let mut next_seq = lane.next_seq.lock().await;

        if let Some(request_id) = request_id
            && let Some(existing) = self.store.message_by_request(channel_id, request_id).await?
        {
            debug!(channel_id, request_id, seq = existing.seq, "duplicate append");
            return Ok(existing);
        }

        let seq = self.current_seq(channel_id, &mut *next_seq).await?;
        let message = Message {
            id: message_id(channel_id, seq),
            seq,
            channel_id: channel_id.to_owned(),
            sender_id: sender_id.to_owned(),
            sender_name: sender_name.to_owned(),
            body,
            created_at: now_millis(),
        };
        self.store.insert_message(&message, request_id).await?;
        *next_seq = Some(seq + 1);

        let delivered = self
            .dispatcher
            .publish(&Topic::Channel(channel_id.to_owned()), Event::Message(message.clone()));
        debug!(channel_id, seq, delivered, "message appended");

        Ok(message)
    }

    /// The newest `limit` messages, oldest first.
    pub async fn tail(&self, channel_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.registry.require(channel_id)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.store.tail(channel_id, limit.min(self.max_tail)).await?)
    }

    /// Messages appended after this call, in sequence order.
    pub async fn subscribe(&self, channel_id: &str) -> Result<Subscription> {
        self.open_feed(channel_id, None, None).await
    }

    /// Replays stored messages after `after_seq` and continues live without a
    /// gap. When more than the tail window was missed, the subscription holds
    /// a single resync notice instead and the caller has to start over from
    /// `tail`.
    pub async fn subscribe_from(&self, channel_id: &str, after_seq: u64) -> Result<Subscription> {
        self.open_feed(channel_id, Some(after_seq), None).await
    }

    /// Registration happens under the channel lane, and under the presence lane
    /// too when typing is requested, so no event can slip between the replay
    /// and the live queue.
    pub(crate) async fn open_feed(
        &self,
        channel_id: &str,
        after_seq: Option<u64>,
        typing: Option<&PresenceAggregator>,
    ) -> Result<Subscription> {
        let lane = self.lane(channel_id)?;
        let _guard = lane.next_seq.lock().await;

        let topic = Topic::Channel(channel_id.to_owned());
        let mut backlog: Vec<Event> = match after_seq {
            Some(after) => {
                let missed = self.store.messages_after(channel_id, after, self.max_tail + 1).await?;
                if missed.len() > self.max_tail {
                    warn!(channel_id, after_seq = after, max_tail = self.max_tail, "replay window exceeded");
                    return Ok(self.dispatcher.resync(topic, "replay window exceeded"));
                }
                missed.into_iter().map(Event::Message).collect()
            }
            None => Vec::new(),
        };

        let subscription = match typing {
            Some(presence) => presence.with_snapshot(channel_id, |snapshot| {
                backlog.push(Event::Typing(snapshot));
                self.dispatcher.subscribe(topic, Interest::All, backlog)
            }),
            None => self.dispatcher.subscribe(topic, Interest::Messages, backlog),
        };
        Ok(subscription)
    }

    /// One-time transition of a photo placeholder to its uploaded URL.
    pub async fn resolve_photo(&self, message_id: &str, url: &str) -> Result<Message> {
        let Some((channel_id, seq)) = parse_message_id(message_id) else {
            return Err(ChatError::not_found(format!("message {message_id}")));
        };
        if url.trim().is_empty() {
            return Err(ChatError::invalid("photoURL must not be empty"));
        }
        let lane = self
            .lane(channel_id)
            .map_err(|_| ChatError::not_found(format!("message {message_id}")))?;
        let _guard = lane.next_seq.lock().await;

        let Some(mut message) = self.store.message(channel_id, seq).await? else {
            return Err(ChatError::not_found(format!("message {message_id}")));
        };
        if !message.body.is_placeholder() {
            return Err(ChatError::InvalidState(format!("message {message_id} is not a photo placeholder")));
        }

        self.store.set_photo_ref(channel_id, seq, url).await?;
        message.body = MessageBody::PhotoRef(url.to_owned());
        self.dispatcher.publish(
            &Topic::Channel(channel_id.to_owned()),
            Event::MessageUpdated(message.clone()),
        );
        info!(channel_id, seq, "photo resolved");

        Ok(message)
    }
}
