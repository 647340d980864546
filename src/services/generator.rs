use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::config::GeneratorConfig;
use crate::error::{AppError, Result};

const PROMPT: &str = "Gere uma descrição em português do brasil para a seguinte imagem";

/// External image description capability. Stateless from the caller's
/// perspective; retry policy belongs to the caller.
#[async_trait]
pub trait DescriptionGenerator: Send + Sync {
    async fn generate(&self, image: &[u8]) -> Result<String>;
}

/// Description generator backed by the Gemini generateContent endpoint
pub struct GeminiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn extract_text(body: &serde_json::Value) -> Option<String> {
        body.get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .get(0)?
            .get("text")?
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl DescriptionGenerator for GeminiGenerator {
    async fn generate(&self, image: &[u8]) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let payload = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": PROMPT },
                    { "inline_data": { "mime_type": "image/png", "data": encoded } }
                ]
            }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Generation("request to generator timed out".to_string())
                } else {
                    AppError::Generation(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Generation(format!(
                "generator returned {}",
                status
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Generation(format!("unreadable generator response: {}", e)))?;

        Self::extract_text(&body)
            .ok_or_else(|| AppError::Generation("generator response contained no text".to_string()))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    text: String,
    expires_at: Instant,
}

/// Short-lived cache of generated descriptions keyed by blob content hash.
///
/// A failed record update after a successful generation leaves the text here,
/// so the retry does not pay the generator round trip again. Expiry is lazy.
#[derive(Debug, Clone)]
pub struct DescriptionCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl DescriptionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn content_key(image: &[u8]) -> String {
        hex::encode(Sha256::digest(image))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.remove_if(key, |_, entry| Instant::now() >= entry.expires_at);
        self.entries.get(key).map(|entry| entry.text.clone())
    }

    pub fn insert(&self, key: &str, text: &str) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                text: text.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

impl Default for DescriptionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_generate_content_response() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{ "text": "  Uma praia ao pôr do sol.\n" }]
                }
            }]
        });
        assert_eq!(
            GeminiGenerator::extract_text(&body).as_deref(),
            Some("Uma praia ao pôr do sol.")
        );
    }

    #[test]
    fn missing_or_empty_text_yields_none() {
        let body = serde_json::json!({ "candidates": [] });
        assert!(GeminiGenerator::extract_text(&body).is_none());

        let body = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "   " }] } }]
        });
        assert!(GeminiGenerator::extract_text(&body).is_none());
    }

    #[test]
    fn content_key_tracks_content() {
        let a = DescriptionCache::content_key(b"image-a");
        assert_eq!(a, DescriptionCache::content_key(b"image-a"));
        assert_ne!(a, DescriptionCache::content_key(b"image-b"));
    }

    #[tokio::test]
    async fn cache_returns_inserted_text() {
        let cache = DescriptionCache::new(Duration::from_secs(60));
        let key = DescriptionCache::content_key(b"bytes");

        assert!(cache.get(&key).is_none());
        cache.insert(&key, "um gato dormindo");
        assert_eq!(cache.get(&key).as_deref(), Some("um gato dormindo"));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire() {
        let cache = DescriptionCache::new(Duration::from_secs(5));
        let key = DescriptionCache::content_key(b"bytes");

        cache.insert(&key, "um gato dormindo");
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get(&key).is_none());
    }
}
