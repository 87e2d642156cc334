use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use uuid::Uuid;

/// Where photo bytes go. The message log only ever sees the returned URL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> anyhow::Result<String>;
}

/// PUTs each blob to `{base_url}/{uuid}` and hands back that URL.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> anyhow::Result<String> {
        let url = format!("{}/{}", self.base_url, Uuid::now_v7().simple());
        self.client
            .put(&url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        Ok(url)
    }
}
