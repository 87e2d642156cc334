//! Anonymous identities and the per-connection state machine.

use std::sync::Arc;

use dashmap::DashMap;
use rand::{Rng, distr::Alphanumeric};
use serde::Serialize;
use tokio_stream::{StreamExt, StreamMap};
use tracing::info;
use uuid::Uuid;

use crate::{
    dispatch::Subscription,
    error::{ChatError, Result},
    hub::Hub,
    model::{Event, Message, MessageBody},
};

const TOKEN_LEN: usize = 32;

/// Notified when a connection goes away, whether it said goodbye or not.
pub trait ConnectionObserver: Send + Sync {
    fn on_disconnect(&self, connection_id: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub display_name: String,
    pub session_token: String,
}

pub struct SessionGateway {
    sessions: DashMap<String, Session>,
    live: DashMap<String, Option<String>>,
    observers: Vec<Arc<dyn ConnectionObserver>>,
}

impl SessionGateway {
    pub fn new(observers: Vec<Arc<dyn ConnectionObserver>>) -> Self {
        Self {
            sessions: DashMap::new(),
            live: DashMap::new(),
            observers,
        }
    }

    /// Issue a fresh anonymous identity. User ids are never reused.
    pub fn authenticate(&self, display_name: &str) -> Result<Session> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ChatError::invalid("displayName must not be empty"));
        }

        let session_token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let session = Session {
            user_id: Uuid::now_v7().simple().to_string(),
            display_name: display_name.to_owned(),
            session_token,
        };
        self.sessions.insert(session.session_token.clone(), session.clone());
        info!(user_id = %session.user_id, display_name, "session issued");

        Ok(session)
    }

    pub fn resolve(&self, token: &str) -> Result<Session> {
        self.sessions
            .get(token)
            .map(|s| s.clone())
            .ok_or(ChatError::Unauthenticated)
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.live.len()
    }

    fn opened(&self, connection_id: &str) {
        self.live.insert(connection_id.to_owned(), None);
        info!(conn_id = connection_id, "connection opened");
    }

    fn identified(&self, connection_id: &str, user_id: &str) {
        self.live.insert(connection_id.to_owned(), Some(user_id.to_owned()));
    }

    fn closed(&self, connection_id: &str) {
        let user_id = self.live.remove(connection_id).and_then(|(_, u)| u);
        for observer in &self.observers {
            observer.on_disconnect(connection_id);
        }
        info!(conn_id = connection_id, user_id = ?user_id, "connection closed");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Subscribed(usize),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feed {
    Channels,
    Channel(String),
}

/// One client connection. Transport-agnostic: the WebSocket layer feeds it
/// frames and drains [`Connection::next_event`]. Dropping it disconnects.
pub struct Connection {
    id: String,
    hub: Arc<Hub>,
    session: Option<Session>,
    feeds: StreamMap<Feed, Subscription>,
    closed: bool,
}

impl Connection {
    pub(crate) fn open(hub: Arc<Hub>) -> Self {
        let id = Uuid::now_v7().simple().to_string();
        hub.gateway.opened(&id);
        Self {
            id,
            hub,
            session: None,
            feeds: StreamMap::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed {
            return ConnectionState::Closed;
        }
        match (&self.session, self.channel_count()) {
            (None, _) => ConnectionState::Connecting,
            (Some(_), 0) => ConnectionState::Authenticated,
            (Some(_), n) => ConnectionState::Subscribed(n),
        }
    }

    fn channel_count(&self) -> usize {
        self.feeds.keys().filter(|f| matches!(f, Feed::Channel(_))).count()
    }

    pub fn is_subscribed(&self, channel_id: &str) -> bool {
        self.feeds.contains_key(&Feed::Channel(channel_id.to_owned()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ChatError::InvalidState("connection closed".into()));
        }
        Ok(())
    }

    fn require_session(&self) -> Result<&Session> {
        self.ensure_open()?;
        self.session.as_ref().ok_or(ChatError::Unauthenticated)
    }

    fn attach(&mut self, session: Session) -> Result<Session> {
        self.ensure_open()?;
        if self.session.is_some() {
            return Err(ChatError::InvalidState("connection already authenticated".into()));
        }
        self.hub.gateway.identified(&self.id, &session.user_id);
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Connecting → Authenticated with a brand new identity.
    pub fn authenticate(&mut self, display_name: &str) -> Result<Session> {
        self.ensure_open()?;
        if self.session.is_some() {
            return Err(ChatError::InvalidState("connection already authenticated".into()));
        }
        let session = self.hub.gateway.authenticate(display_name)?;
        self.attach(session)
    }

    /// Connecting → Authenticated with an identity issued earlier.
    pub fn resume(&mut self, token: &str) -> Result<Session> {
        self.ensure_open()?;
        let session = self.hub.gateway.resolve(token)?;
        self.attach(session)
    }

    /// Start receiving messages and typing updates for a channel. With
    /// `after_seq`, stored messages after it are replayed first.
    pub async fn subscribe(&mut self, channel_id: &str, after_seq: Option<u64>) -> Result<()> {
        self.require_session()?;
        let subscription = self
            .hub
            .log
            .open_feed(channel_id, after_seq, Some(self.hub.presence.as_ref()))
            .await?;
        self.feeds.insert(Feed::Channel(channel_id.to_owned()), subscription);
        Ok(())
    }

    /// Returns whether the channel was subscribed. Queued events are discarded.
    pub fn unsubscribe(&mut self, channel_id: &str) -> Result<bool> {
        self.require_session()?;
        Ok(self.feeds.remove(&Feed::Channel(channel_id.to_owned())).is_some())
    }

    pub fn subscribe_channels(&mut self) -> Result<()> {
        self.require_session()?;
        let subscription = self.hub.registry.subscribe_creations();
        self.feeds.insert(Feed::Channels, subscription);
        Ok(())
    }

    pub fn set_typing(&self, channel_id: &str, is_typing: bool) -> Result<()> {
        let session = self.require_session()?;
        self.hub
            .presence
            .set_typing(channel_id, &session.user_id, &self.id, is_typing)
    }

    pub async fn send(&self, channel_id: &str, body: MessageBody, request_id: Option<&str>) -> Result<Message> {
        let session = self.require_session()?;
        self.hub
            .log
            .append(channel_id, &session.user_id, &session.display_name, body, request_id)
            .await
    }

    pub fn has_feeds(&self) -> bool {
        !self.feeds.is_empty()
    }

    /// Next event from any feed. A feed that ends (after a resync notice) is
    /// dropped from the connection. Returns `None` once nothing is subscribed.
    pub async fn next_event(&mut self) -> Option<(Feed, Arc<Event>)> {
        self.feeds.next().await
    }

    /// Subscribed → Closed. Releases every feed and clears typing flags.
    pub fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.feeds.clear();
        self.hub.gateway.closed(&self.id);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, hub::HubOptions};

    async fn hub() -> Arc<Hub> {
        Hub::open(db::in_memory().await.unwrap(), HubOptions::default(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn identities_are_fresh_and_resolvable() {
        let hub = hub().await;
        let a = hub.gateway.authenticate("Ana").unwrap();
        let b = hub.gateway.authenticate("Ana").unwrap();
        assert_ne!(a.user_id, b.user_id);
        assert_ne!(a.session_token, b.session_token);
        assert_eq!(a.session_token.len(), TOKEN_LEN);
        assert_eq!(hub.gateway.resolve(&a.session_token).unwrap(), a);
        assert!(matches!(hub.gateway.authenticate("  "), Err(ChatError::InvalidArgument(_))));

        assert!(hub.gateway.revoke(&a.session_token));
        assert!(matches!(hub.gateway.resolve(&a.session_token), Err(ChatError::Unauthenticated)));
    }

    #[tokio::test]
    async fn state_machine_walk() {
        let hub = hub().await;
        let channel = hub.registry.create("general").await.unwrap();
        let mut conn = hub.connect();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(hub.gateway.connection_count(), 1);

        assert!(matches!(conn.subscribe(&channel.id, None).await, Err(ChatError::Unauthenticated)));
        assert!(matches!(conn.set_typing(&channel.id, true), Err(ChatError::Unauthenticated)));
        assert!(matches!(
            conn.send(&channel.id, MessageBody::Text("hi".into()), None).await,
            Err(ChatError::Unauthenticated)
        ));
        assert!(matches!(conn.subscribe_channels(), Err(ChatError::Unauthenticated)));

        conn.authenticate("Ana").unwrap();
        assert_eq!(conn.state(), ConnectionState::Authenticated);
        assert!(matches!(conn.authenticate("Ana"), Err(ChatError::InvalidState(_))));

        conn.subscribe(&channel.id, None).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Subscribed(1));
        conn.subscribe_channels().unwrap();
        assert_eq!(conn.state(), ConnectionState::Subscribed(1));
        assert!(conn.unsubscribe(&channel.id).unwrap());
        assert!(!conn.unsubscribe(&channel.id).unwrap());
        assert_eq!(conn.state(), ConnectionState::Authenticated);

        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(hub.gateway.connection_count(), 0);
        assert!(matches!(conn.subscribe_channels(), Err(ChatError::InvalidState(_))));
    }

    #[tokio::test]
    async fn resume_with_issued_token() {
        let hub = hub().await;
        let session = hub.gateway.authenticate("Bo").unwrap();
        let mut conn = hub.connect();
        assert!(matches!(conn.resume("bogus"), Err(ChatError::Unauthenticated)));
        assert_eq!(conn.resume(&session.session_token).unwrap(), session);
        assert_eq!(conn.session().map(|s| s.user_id.as_str()), Some(session.user_id.as_str()));
    }

    #[tokio::test]
    async fn subscriber_gets_other_sessions_message_once() {
        let hub = hub().await;
        let channel = hub.registry.create("general").await.unwrap();
        let mut reader = hub.connect();
        reader.authenticate("Reader").unwrap();
        reader.subscribe(&channel.id, None).await.unwrap();

        let mut writer = hub.connect();
        writer.authenticate("Writer").unwrap();
        let sent = writer.send(&channel.id, MessageBody::Text("hello".into()), None).await.unwrap();

        let (feed, first) = reader.next_event().await.unwrap();
        assert_eq!(feed, Feed::Channel(channel.id.clone()));
        assert!(matches!(&*first, Event::Typing(s) if s.typing_user_ids.is_empty()));
        let (_, second) = reader.next_event().await.unwrap();
        assert_eq!(*second, Event::Message(sent));
        assert_eq!(hub.log.tail(&channel.id, 25).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropping_a_connection_clears_its_typing_flag() {
        let hub = hub().await;
        let channel = hub.registry.create("general").await.unwrap();
        let mut watcher = hub.presence.subscribe_typing(&channel.id).unwrap();
        watcher.recv().await.unwrap();

        let mut typist = hub.connect();
        let user_id = typist.authenticate("Typist").unwrap().user_id;
        typist.set_typing(&channel.id, true).unwrap();
        match &*watcher.recv().await.unwrap() {
            Event::Typing(s) => assert!(s.typing_user_ids.contains(&user_id)),
            other => panic!("unexpected {other:?}"),
        }

        // no explicit unset, the connection just goes away
        drop(typist);
        match &*watcher.recv().await.unwrap() {
            Event::Typing(s) => assert!(!s.typing_user_ids.contains(&user_id)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
