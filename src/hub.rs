use std::{sync::Arc, time::Duration};

use sqlx::SqlitePool;
use tokio::{sync::Mutex, task::JoinSet};
use tracing::{info, warn};

use crate::{
    blob::BlobStore,
    db::Store,
    dispatch::{DEFAULT_QUEUE_CAPACITY, Dispatcher},
    error::{ChatError, Result},
    gateway::{Connection, ConnectionObserver, SessionGateway},
    message_log::{DEFAULT_TAIL, MAX_TAIL, MessageLog},
    model::{Message, MessageBody},
    presence::PresenceAggregator,
    registry::ChannelRegistry,
};

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub subscriber_queue: usize,
    pub default_tail: usize,
    pub max_tail: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            subscriber_queue: DEFAULT_QUEUE_CAPACITY,
            default_tail: DEFAULT_TAIL,
            max_tail: MAX_TAIL,
        }
    }
}

/// All components, wired together once at startup.
pub struct Hub {
    pub registry: Arc<ChannelRegistry>,
    pub log: MessageLog,
    pub presence: Arc<PresenceAggregator>,
    pub gateway: SessionGateway,
    pub dispatcher: Dispatcher,
    pub options: HubOptions,
    blobs: Option<Arc<dyn BlobStore>>,
    uploads: Mutex<JoinSet<()>>,
}

impl Hub {
    pub async fn open(pool: SqlitePool, options: HubOptions, blobs: Option<Arc<dyn BlobStore>>) -> Result<Arc<Self>> {
        let store = Store::open(pool).await?;
        let dispatcher = Dispatcher::new(options.subscriber_queue);
        let registry = Arc::new(ChannelRegistry::load(store.clone(), dispatcher.clone()).await?);
        let log = MessageLog::new(store, registry.clone(), dispatcher.clone(), options.max_tail);
        let presence = Arc::new(PresenceAggregator::new(registry.clone(), dispatcher.clone()));
        let gateway = SessionGateway::new(vec![presence.clone() as Arc<dyn ConnectionObserver>]);

        Ok(Arc::new(Self {
            registry,
            log,
            presence,
            gateway,
            dispatcher,
            options,
            blobs,
            uploads: Mutex::new(JoinSet::new()),
        }))
    }

    pub fn connect(self: &Arc<Self>) -> Connection {
        Connection::open(self.clone())
    }

    /// Two-phase photo post: the placeholder is appended and returned right
    /// away, the upload runs in the background and resolves it on success.
    pub async fn post_photo(
        self: &Arc<Self>,
        channel_id: &str,
        sender_id: &str,
        sender_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Message> {
        let Some(blobs) = self.blobs.clone() else {
            return Err(ChatError::Unavailable("no blob store configured".into()));
        };
        if bytes.is_empty() {
            return Err(ChatError::invalid("photo must not be empty"));
        }

        let placeholder = self
            .log
            .append(channel_id, sender_id, sender_name, MessageBody::placeholder(), None)
            .await?;

        let hub = self.clone();
        let message_id = placeholder.id.clone();
        let content_type = content_type.to_owned();
        let mut uploads = self.uploads.lock().await;
        while uploads.try_join_next().is_some() {}
        uploads.spawn(async move {
            let url = match blobs.upload(bytes, &content_type).await {
                Ok(url) => url,
                Err(e) => {
                    warn!(message_id = %message_id, error = %e, "photo upload failed");
                    return;
                }
            };
            match hub.log.resolve_photo(&message_id, &url).await {
                Ok(_) => info!(message_id = %message_id, "photo uploaded"),
                Err(e) => warn!(message_id = %message_id, error = %e, "photo resolution failed"),
            }
        });

        Ok(placeholder)
    }

    /// Wait up to `grace` for background photo uploads. Returns how many were
    /// still running and got aborted; their placeholders stay `NOTSET`.
    pub async fn drain_uploads(&self, grace: Duration) -> usize {
        let mut uploads = self.uploads.lock().await;
        let finished = tokio::time::timeout(grace, async {
            while uploads.join_next().await.is_some() {}
        })
        .await;
        if finished.is_ok() {
            return 0;
        }

        let abandoned = uploads.len();
        warn!(abandoned, "photo uploads still running at shutdown, placeholders stay unresolved");
        uploads.abort_all();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{db, model::Event};

    struct FakeBlobs;

    #[async_trait]
    impl BlobStore for FakeBlobs {
        async fn upload(&self, bytes: Vec<u8>, _content_type: &str) -> anyhow::Result<String> {
            Ok(format!("https://blobs.test/{}", bytes.len()))
        }
    }

    struct BrokenBlobs;

    #[async_trait]
    impl BlobStore for BrokenBlobs {
        async fn upload(&self, _bytes: Vec<u8>, _content_type: &str) -> anyhow::Result<String> {
            anyhow::bail!("bucket on fire")
        }
    }

    async fn hub(blobs: Option<Arc<dyn BlobStore>>) -> Arc<Hub> {
        Hub::open(db::in_memory().await.unwrap(), HubOptions::default(), blobs)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn photo_placeholder_then_update() {
        let hub = hub(Some(Arc::new(FakeBlobs))).await;
        let channel = hub.registry.create("pics").await.unwrap();
        let mut sub = hub.log.subscribe(&channel.id).await.unwrap();

        let placeholder = hub
            .post_photo(&channel.id, "u", "U", vec![0; 3], "image/jpeg")
            .await
            .unwrap();
        assert!(placeholder.body.is_placeholder());

        assert_eq!(*sub.recv().await.unwrap(), Event::Message(placeholder.clone()));
        match &*sub.recv().await.unwrap() {
            Event::MessageUpdated(m) => {
                assert_eq!(m.id, placeholder.id);
                assert_eq!(m.body, MessageBody::PhotoRef("https://blobs.test/3".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_upload_leaves_placeholder() {
        let hub = hub(Some(Arc::new(BrokenBlobs))).await;
        let channel = hub.registry.create("pics").await.unwrap();
        let placeholder = hub
            .post_photo(&channel.id, "u", "U", vec![1], "image/png")
            .await
            .unwrap();

        assert_eq!(hub.drain_uploads(Duration::from_secs(5)).await, 0);
        let stored = hub.log.tail(&channel.id, 1).await.unwrap();
        assert_eq!(stored, vec![placeholder]);
    }

    struct StuckBlobs;

    #[async_trait]
    impl BlobStore for StuckBlobs {
        async fn upload(&self, _bytes: Vec<u8>, _content_type: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            anyhow::bail!("never finished")
        }
    }

    #[tokio::test]
    async fn shutdown_reports_uploads_still_in_flight() {
        let hub = hub(Some(Arc::new(StuckBlobs))).await;
        let channel = hub.registry.create("pics").await.unwrap();
        let placeholder = hub
            .post_photo(&channel.id, "u", "U", vec![1], "image/png")
            .await
            .unwrap();

        assert_eq!(hub.drain_uploads(Duration::from_millis(50)).await, 1);
        assert_eq!(hub.drain_uploads(Duration::from_millis(50)).await, 0);
        let stored = hub.log.tail(&channel.id, 1).await.unwrap();
        assert_eq!(stored, vec![placeholder]);
    }

    #[tokio::test]
    async fn photos_need_a_blob_store() {
        let hub = hub(None).await;
        let channel = hub.registry.create("pics").await.unwrap();
        let err = hub.post_photo(&channel.id, "u", "U", vec![1], "image/png").await.unwrap_err();
        assert!(matches!(err, ChatError::Unavailable(_)));
    }
}
