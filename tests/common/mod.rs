#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use chatchat::{AppState, Hub, HubOptions, blob::BlobStore, db};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    pub client: reqwest::Client,
}

pub async fn start() -> TestServer {
    start_with(HubOptions::default(), None).await
}

pub async fn start_with(options: HubOptions, blobs: Option<Arc<dyn BlobStore>>) -> TestServer {
    launch(options, blobs, Duration::from_secs(30)).await
}

pub async fn start_with_heartbeat(heartbeat: Duration) -> TestServer {
    launch(HubOptions::default(), None, heartbeat).await
}

async fn launch(options: HubOptions, blobs: Option<Arc<dyn BlobStore>>, heartbeat: Duration) -> TestServer {
    let pool = db::in_memory().await.unwrap();
    let hub = Hub::open(pool, options, blobs).await.unwrap();
    let app = chatchat::app(
        AppState {
            hub: hub.clone(),
            heartbeat,
        },
        5,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        hub,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/stream?token={}", self.addr, token)
    }

    /// Returns `(userId, sessionToken)`.
    pub async fn session(&self, name: &str) -> (String, String) {
        let body: Value = self
            .client
            .post(self.url("/sessions"))
            .json(&json!({ "displayName": name }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        (
            body["userId"].as_str().unwrap().to_owned(),
            body["sessionToken"].as_str().unwrap().to_owned(),
        )
    }

    pub async fn create_channel(&self, token: &str, name: &str) -> String {
        let body: Value = self
            .client
            .post(self.url("/channels"))
            .bearer_auth(token)
            .json(&json!({ "name": name }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["id"].as_str().unwrap().to_owned()
    }

    pub async fn post_text(&self, token: &str, channel_id: &str, text: &str) -> Value {
        self.client
            .post(self.url(&format!("/channels/{channel_id}/messages")))
            .bearer_auth(token)
            .json(&json!({ "body": { "text": text } }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}
