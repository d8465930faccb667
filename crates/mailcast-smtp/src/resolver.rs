//! Embedded-asset resolvers. A template references inline content by
//! `cid:` identifier; these map identifiers to byte payloads.

use std::path::PathBuf;

use async_trait::async_trait;
use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::ResourceResolver;

/// Image extensions probed when a `cid` carries no extension.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Resolves assets from a local directory, probing common image
/// extensions when the identifier has none.
pub struct DirResolver {
    dir: PathBuf,
}

impl DirResolver {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn candidates(&self, id: &str) -> Vec<PathBuf> {
        let mut paths = vec![self.dir.join(id)];
        for ext in IMAGE_EXTENSIONS {
            paths.push(self.dir.join(format!("{id}.{ext}")));
        }
        paths
    }
}

#[async_trait]
impl ResourceResolver for DirResolver {
    async fn resolve(&self, id: &str) -> Result<Vec<u8>> {
        // Reject path traversal in identifiers from templates.
        if id.contains("..") || id.contains('/') || id.contains('\\') {
            return Err(MailcastError::ResourceNotFound(id.to_string()));
        }
        for path in self.candidates(id) {
            match tokio::fs::read(&path).await {
                Ok(bytes) => return Ok(bytes),
                Err(_) => continue,
            }
        }
        Err(MailcastError::ResourceNotFound(id.to_string()))
    }
}

/// Resolves assets from a remote base URL (`{base_url}/{id}`).
pub struct HttpResolver {
    base_url: String,
    client: reqwest::Client,
}

impl HttpResolver {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ResourceResolver for HttpResolver {
    async fn resolve(&self, id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, id);
        let resp = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| MailcastError::ResourceNotFound(format!("{id}: {e}")))?;

        if !resp.status().is_success() {
            return Err(MailcastError::ResourceNotFound(format!(
                "{id}: HTTP {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MailcastError::ResourceNotFound(format!("{id}: {e}")))?;
        Ok(bytes.to_vec())
    }
}
