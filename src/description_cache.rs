use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Description and score generated for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDescription {
    pub description: String,
    pub score: u8,
    pub generated_at: DateTime<Utc>,
}

/// Serialized payload plus its SHA-256 checksum (hex). Entries whose checksum
/// no longer matches are dropped and treated as a miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChecksummedEntry {
    data: String,
    checksum: String,
}

impl ChecksummedEntry {
    fn seal(data: String) -> Self {
        let checksum = checksum(&data);
        Self { data, checksum }
    }

    fn is_valid(&self) -> bool {
        checksum(&self.data) == self.checksum
    }

    fn open(serialized: &str) -> Option<String> {
        let entry: ChecksummedEntry = serde_json::from_str(serialized).ok()?;
        if entry.is_valid() {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Description cache checksum mismatch. Expected: {}, Data length: {}",
                entry.checksum,
                entry.data.len()
            );
            None
        }
    }
}

fn checksum(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lowercase, alphanumerics only, single spaces. Similar names collide.
pub fn normalize_company_key(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write-through cache of generated descriptions, shared across runs.
///
/// One entry per normalized company key; a fresh generation overwrites it
/// (last write wins).
#[derive(Clone)]
pub struct DescriptionCache {
    inner: Cache<String, String>,
}

impl DescriptionCache {
    pub fn new(ttl: Duration) -> Self {
        let inner = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(50_000)
            .build();
        Self { inner }
    }

    pub async fn get(&self, company: &str) -> Option<CachedDescription> {
        let key = normalize_company_key(company);
        if key.is_empty() {
            return None;
        }
        let raw = self.inner.get(&key).await?;

        let parsed = ChecksummedEntry::open(&raw)
            .and_then(|data| serde_json::from_str::<CachedDescription>(&data).ok());
        if parsed.is_none() {
            tracing::warn!("Dropping corrupted description cache entry for '{}'", key);
            self.inner.invalidate(&key).await;
        }
        parsed
    }

    pub async fn put(&self, company: &str, description: &str, score: u8) -> CachedDescription {
        let entry = CachedDescription {
            description: description.to_string(),
            score,
            generated_at: Utc::now(),
        };
        let key = normalize_company_key(company);
        if key.is_empty() {
            return entry;
        }

        match serde_json::to_string(&entry) {
            Ok(json) => {
                let sealed = ChecksummedEntry::seal(json);
                match serde_json::to_string(&sealed) {
                    Ok(serialized) => self.inner.insert(key, serialized).await,
                    Err(e) => tracing::warn!("Failed to seal cache entry: {}", e),
                }
            }
            Err(e) => tracing::warn!("Failed to serialize cache entry: {}", e),
        }
        entry
    }

    #[cfg(test)]
    async fn insert_raw(&self, company: &str, raw: String) {
        self.inner.insert(normalize_company_key(company), raw).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        assert_eq!(normalize_company_key("  ACME, Inc. "), "acme inc");
        assert_eq!(normalize_company_key("Acme   Inc"), "acme inc");
        assert_eq!(normalize_company_key("!!!"), "");
    }

    #[test]
    fn test_checksum_detects_tampering() {
        let sealed = ChecksummedEntry::seal(r#"{"original":"data"}"#.to_string());
        let serialized = serde_json::to_string(&sealed).unwrap();
        assert!(ChecksummedEntry::open(&serialized).is_some());

        let tampered = serialized.replace("original", "hacked");
        assert_eq!(ChecksummedEntry::open(&tampered), None);
        assert_eq!(ChecksummedEntry::open("not json"), None);
    }

    #[tokio::test]
    async fn test_put_then_get_by_normalized_name() {
        let cache = DescriptionCache::new(Duration::from_secs(60));
        cache.put("Acme Inc.", "Makes anvils.", 72).await;

        let hit = cache.get("acme inc").await.unwrap();
        assert_eq!(hit.description, "Makes anvils.");
        assert_eq!(hit.score, 72);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_entry() {
        let cache = DescriptionCache::new(Duration::from_secs(60));
        cache.put("Acme", "old", 10).await;
        cache.put("ACME", "new", 20).await;

        let hit = cache.get("acme").await.unwrap();
        assert_eq!(hit.description, "new");
        assert_eq!(hit.score, 20);
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_a_miss() {
        let cache = DescriptionCache::new(Duration::from_secs(60));
        let sealed = ChecksummedEntry {
            data: r#"{"description":"x","score":1,"generated_at":"2024-01-01T00:00:00Z"}"#
                .to_string(),
            checksum: "deadbeef".to_string(),
        };
        cache
            .insert_raw("Acme", serde_json::to_string(&sealed).unwrap())
            .await;

        assert!(cache.get("Acme").await.is_none());
    }

    #[tokio::test]
    async fn test_empty_key_never_cached() {
        let cache = DescriptionCache::new(Duration::from_secs(60));
        cache.put("???", "desc", 50).await;
        assert!(cache.get("???").await.is_none());
    }
}
