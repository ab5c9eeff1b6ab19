use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use url::Url;

use crate::models::StructuredProduct;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

// ── Keys and entries ─────────────────────────────────────────────────────────

/// Hex SHA-256 of a normalized product URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_url(url: &Url) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_url(url).as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Scheme and host are already lower-cased by the parser. The fragment is
/// dropped and a single trailing slash removed from non-root paths.
pub fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    let path = url.path().to_string();
    if path.len() > 1 {
        if let Some(trimmed) = path.strip_suffix('/') {
            url.set_path(trimmed);
        }
    }
    url.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: StructuredProduct,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(key: &CacheKey, value: StructuredProduct) -> Self {
        Self {
            key: key.as_str().to_string(),
            value,
            created_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        let Some(ttl) = ttl else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => Utc::now() - self.created_at > ttl,
            Err(_) => false,
        }
    }
}

// ── Store interface ──────────────────────────────────────────────────────────

/// Backing store for finished product records. No locking across requests:
/// concurrent writers for one key race and the last `put` wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<StructuredProduct>, CacheError>;
    async fn put(&self, key: &CacheKey, value: &StructuredProduct) -> Result<(), CacheError>;
}

// ── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Option<Duration>,
}

impl MemoryCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<StructuredProduct>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &CacheKey, value: &StructuredProduct) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(key.clone(), CacheEntry::new(key, value.clone()));
        Ok(())
    }
}

// ── File-backed store ────────────────────────────────────────────────────────

/// One `<key>.json` file per entry under `dir`.
pub struct FileCache {
    dir: PathBuf,
    ttl: Option<Duration>,
    writes: AtomicU64,
}

impl FileCache {
    pub async fn open(dir: PathBuf, ttl: Option<Duration>) -> Result<Self, CacheError> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            ttl,
            writes: AtomicU64::new(0),
        })
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }
}

#[async_trait]
impl CacheStore for FileCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<StructuredProduct>, CacheError> {
        let raw = match tokio::fs::read(self.path_for(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CacheEntry = serde_json::from_slice(&raw)?;
        if entry.is_expired(self.ttl) {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn put(&self, key: &CacheKey, value: &StructuredProduct) -> Result<(), CacheError> {
        let entry = CacheEntry::new(key, value.clone());
        let data = serde_json::to_vec_pretty(&entry)?;

        // Write-then-rename so readers never see a half-written file.
        let target = self.path_for(key);
        let seq = self.writes.fetch_add(1, Ordering::Relaxed);
        let tmp = target.with_extension(format!("json.{}.{}.tmp", std::process::id(), seq));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }
}
