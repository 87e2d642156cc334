use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    dispatch::{Dispatcher, Interest, Subscription, Topic},
    error::Result,
    gateway::ConnectionObserver,
    model::{Event, TypingSnapshot},
    registry::ChannelRegistry,
};

/// Typing users of one channel, each owned by the connection that set it.
#[derive(Default)]
struct ChannelTyping {
    owners: BTreeMap<String, String>,
}

impl ChannelTyping {
    fn snapshot(&self, channel_id: &str) -> TypingSnapshot {
        TypingSnapshot {
            channel_id: channel_id.to_owned(),
            typing_user_ids: self.owners.keys().cloned().collect(),
        }
    }
}

/// Ephemeral typing flags. Nothing here is persisted; a flag lives exactly as
/// long as the connection that raised it.
pub struct PresenceAggregator {
    registry: Arc<ChannelRegistry>,
    dispatcher: Dispatcher,
    channels: DashMap<String, Arc<Mutex<ChannelTyping>>>,
    by_connection: DashMap<String, HashSet<String>>,
}

impl PresenceAggregator {
    pub fn new(registry: Arc<ChannelRegistry>, dispatcher: Dispatcher) -> Self {
        Self {
            registry,
            dispatcher,
            channels: DashMap::new(),
            by_connection: DashMap::new(),
        }
    }

    fn lane(&self, channel_id: &str) -> Arc<Mutex<ChannelTyping>> {
        self.channels.entry(channel_id.to_owned()).or_default().clone()
    }

    fn publish(&self, channel_id: &str, snapshot: TypingSnapshot) {
        let delivered = self
            .dispatcher
            .publish(&Topic::Channel(channel_id.to_owned()), Event::Typing(snapshot));
        debug!(channel_id, delivered, "typing changed");
    }

    /// Idempotent; the most recent writer owns the flag.
    pub fn set_typing(&self, channel_id: &str, user_id: &str, connection_id: &str, is_typing: bool) -> Result<()> {
        self.registry.require(channel_id)?;

        let lane = self.lane(channel_id);
        let mut typing = lane.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = if is_typing {
            self.by_connection
                .entry(connection_id.to_owned())
                .or_default()
                .insert(channel_id.to_owned());
            typing
                .owners
                .insert(user_id.to_owned(), connection_id.to_owned())
                .is_none()
        } else {
            typing.owners.remove(user_id).is_some()
        };

        if changed {
            self.publish(channel_id, typing.snapshot(channel_id));
        }
        Ok(())
    }

    pub fn typing_users(&self, channel_id: &str) -> TypingSnapshot {
        match self.channels.get(channel_id) {
            Some(lane) => lane.lock().unwrap_or_else(PoisonError::into_inner).snapshot(channel_id),
            None => TypingSnapshot {
                channel_id: channel_id.to_owned(),
                typing_user_ids: Default::default(),
            },
        }
    }

    /// Current set first, then the full set after every change.
    pub fn subscribe_typing(&self, channel_id: &str) -> Result<Subscription> {
        self.registry.require(channel_id)?;
        Ok(self.with_snapshot(channel_id, |snapshot| {
            self.dispatcher.subscribe(
                Topic::Channel(channel_id.to_owned()),
                Interest::Typing,
                vec![Event::Typing(snapshot)],
            )
        }))
    }

    /// Runs `f` with the channel's typing lane held, so nothing is published
    /// between the snapshot and whatever `f` registers.
    pub(crate) fn with_snapshot<R>(&self, channel_id: &str, f: impl FnOnce(TypingSnapshot) -> R) -> R {
        let lane = self.lane(channel_id);
        let typing = lane.lock().unwrap_or_else(PoisonError::into_inner);
        f(typing.snapshot(channel_id))
    }

    /// Drop every flag owned by `connection_id`.
    pub fn connection_closed(&self, connection_id: &str) {
        let Some((_, channels)) = self.by_connection.remove(connection_id) else {
            return;
        };
        for channel_id in channels {
            let lane = self.lane(&channel_id);
            let mut typing = lane.lock().unwrap_or_else(PoisonError::into_inner);
            let before = typing.owners.len();
            typing.owners.retain(|_, owner| owner != connection_id);
            if typing.owners.len() != before {
                self.publish(&channel_id, typing.snapshot(&channel_id));
            }
        }
    }
}

impl ConnectionObserver for PresenceAggregator {
    fn on_disconnect(&self, connection_id: &str) {
        self.connection_closed(connection_id);
    }
}
