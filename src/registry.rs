use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::{
    db::Store,
    dispatch::{Dispatcher, Interest, Subscription, Topic},
    error::{ChatError, Result},
    model::{Channel, Event, now_millis},
};

#[derive(Default)]
struct Index {
    ordered: Vec<Channel>,
    by_id: HashMap<String, usize>,
}

impl Index {
    fn push(&mut self, channel: Channel) {
        self.by_id.insert(channel.id.clone(), self.ordered.len());
        self.ordered.push(channel);
    }
}

/// Owns the set of channels. Creations are persisted before they are
/// published, and the in-memory index is only touched after the write lands.
pub struct ChannelRegistry {
    store: Store,
    dispatcher: Dispatcher,
    create_lane: Mutex<()>,
    index: RwLock<Index>,
}

impl ChannelRegistry {
    pub async fn load(store: Store, dispatcher: Dispatcher) -> Result<Self> {
        let mut index = Index::default();
        for channel in store.load_channels().await? {
            index.push(channel);
        }
        info!(channels = index.ordered.len(), "channel registry loaded");

        Ok(Self {
            store,
            dispatcher,
            create_lane: Mutex::new(()),
            index: RwLock::new(index),
        })
    }

    pub async fn create(&self, name: &str) -> Result<Channel> {
        if name.trim().is_empty() {
            return Err(ChatError::invalid("channel name must not be empty"));
        }

        let _lane = self.create_lane.lock().await;
        let channel = Channel {
            id: Uuid::now_v7().simple().to_string(),
            name: name.to_owned(),
            created_at: now_millis(),
        };
        self.store.insert_channel(&channel).await?;

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.push(channel.clone());
        self.dispatcher.publish(&Topic::Registry, Event::ChannelCreated(channel.clone()));
        info!(channel_id = %channel.id, name = %channel.name, "channel created");

        Ok(channel)
    }

    pub fn list(&self) -> Vec<Channel> {
        self.index.read().unwrap_or_else(PoisonError::into_inner).ordered.clone()
    }

    pub fn get(&self, id: &str) -> Option<Channel> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.by_id.get(id).map(|&i| index.ordered[i].clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.read().unwrap_or_else(PoisonError::into_inner).by_id.contains_key(id)
    }

    pub(crate) fn require(&self, id: &str) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(ChatError::not_found(format!("channel {id}")))
        }
    }

    /// Every channel that exists now, then every channel created later.
    pub fn subscribe_creations(&self) -> Subscription {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let backlog = index.ordered.iter().cloned().map(Event::ChannelCreated).collect();
        self.dispatcher.subscribe(Topic::Registry, Interest::All, backlog)
    }
}
