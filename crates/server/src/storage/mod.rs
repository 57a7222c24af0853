// Object storage boundary for file attachments.
//
// The server never serves file bytes itself: an uploaded blob goes to an
// external object store which hands back a retrievable URL, and that URL is
// embedded opaquely in a file-type chat message. The memory variant backs
// tests and single-machine development.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use url::Url;
use uuid::Uuid;

#[derive(Clone)]
pub enum ObjectStore {
    Http(HttpObjectStore),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<HashMap<String, Vec<u8>>>>),
}

#[derive(Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: Url,
}

impl ObjectStore {
    pub fn http(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid object store base URL")?;
        Ok(Self::Http(HttpObjectStore { client: reqwest::Client::new(), base_url }))
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Store a blob under a fresh unique key and return its retrievable URL.
    pub async fn put(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let key = format!("{}/{file_name}", Uuid::new_v4());
        match self {
            Self::Http(store) => {
                let target = store
                    .base_url
                    .join(&key)
                    .context("failed to build object store URL")?;
                let response = store
                    .client
                    .put(target.clone())
                    .body(bytes)
                    .send()
                    .await
                    .context("object store upload failed")?;
                if !response.status().is_success() {
                    anyhow::bail!("object store upload returned {}", response.status());
                }
                Ok(target.to_string())
            }
            Self::Memory(store) => {
                store.write().await.insert(key.clone(), bytes);
                Ok(format!("memory://objects/{key}"))
            }
        }
    }

    #[cfg(test)]
    pub async fn get_for_tests(&self, url: &str) -> Option<Vec<u8>> {
        match self {
            Self::Memory(store) => {
                let key = url.strip_prefix("memory://objects/")?;
                store.read().await.get(key).cloned()
            }
            Self::Http(_) => None,
        }
    }
}
