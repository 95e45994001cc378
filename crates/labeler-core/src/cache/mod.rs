//! Persistent per-document prediction cache.
//!
//! Wraps a [`KeyValueStore`] with the record layout used by the labeler:
//!
//! - `<nodeId>`: JSON [`PredictionResult`]
//! - `<filename>`: classifier model URL (JSON string)
//! - `<filename>_designSystemURL`: design system base URL (JSON string)
//! - `imageIndex`: slot counter, see [`SlotAllocator`]
//! - `imageStoragePageId`: id of the slot storage page (JSON string)
//!
//! Records are independent of each other except for the slot counter.

mod slots;

pub use slots::{slot_position, ImageSlot, SlotAllocator};

use crate::config::{ClassifierConfig, StorageKeys};
use crate::document::{DocumentHost, NodeId};
use crate::error::Result;
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A classifier label attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub node_id: NodeId,
    pub prediction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_image_slot: Option<ImageSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl PredictionResult {
    pub fn new(node_id: impl Into<NodeId>, prediction: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            prediction: prediction.into(),
            probability: None,
            pixel_image_slot: None,
            url: None,
        }
    }
}

/// A stored value as it was found.
///
/// Values that are not valid JSON are surfaced verbatim rather than failing
/// the whole read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachedValue {
    Json(serde_json::Value),
    Raw(String),
}

impl CachedValue {
    pub fn parse(key: &str, raw: String) -> Self {
        match serde_json::from_str(&raw) {
            Ok(value) => CachedValue::Json(value),
            Err(e) => {
                warn!("Cached value for '{}' is not JSON ({}), using raw text", key, e);
                CachedValue::Raw(raw)
            }
        }
    }
}

/// A node's prediction record as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredPrediction {
    Decoded(PredictionResult),
    /// Text that is not a valid record.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: CachedValue,
}

/// Outcome of a bulk reset. `remaining` is re-read from the store afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    pub deleted: usize,
    pub failed: usize,
    pub remaining: usize,
}

impl ResetReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Decode a stored JSON string, falling back to the raw text.
pub(crate) fn decode_string(key: &str, raw: String) -> String {
    match serde_json::from_str::<String>(&raw) {
        Ok(value) => value,
        Err(_) => {
            warn!("Setting '{}' is not a JSON string, using raw text", key);
            raw
        }
    }
}

pub(crate) fn encode_string(value: &str) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Build the deep link for a label.
pub fn deep_link(design_system_url: &str, label: &str) -> String {
    format!(
        "{}{}",
        design_system_url,
        label.to_lowercase().replace(' ', "-")
    )
}

/// Typed view of one document's store.
#[derive(Clone)]
pub struct PredictionCache {
    store: Arc<dyn KeyValueStore>,
    filename: String,
    slots: SlotAllocator,
}

impl PredictionCache {
    pub fn new(store: Arc<dyn KeyValueStore>, filename: impl Into<String>) -> Self {
        Self {
            slots: SlotAllocator::new(store.clone()),
            store,
            filename: filename.into(),
        }
    }

    /// Derived document filename used for settings keys.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    fn model_url_key(&self) -> &str {
        &self.filename
    }

    fn design_system_url_key(&self) -> String {
        format!("{}{}", self.filename, StorageKeys::DESIGN_SYSTEM_URL_SUFFIX)
    }

    fn is_settings_key(&self, key: &str) -> bool {
        key == self.model_url_key() || key == self.design_system_url_key()
    }

    // ========================================
    // Predictions
    // ========================================

    /// Store a prediction, replacing any earlier one for the same node.
    pub async fn put_prediction(&self, result: &PredictionResult) -> Result<()> {
        let json = serde_json::to_string(result)?;
        self.store.set(result.node_id.as_str(), &json).await
    }

    /// The record stored for a node, with malformed text kept as found.
    pub async fn stored_prediction(&self, node_id: &NodeId) -> Result<Option<StoredPrediction>> {
        let Some(raw) = self.store.get(node_id.as_str()).await? else {
            return Ok(None);
        };

        Ok(Some(match serde_json::from_str(&raw) {
            Ok(result) => StoredPrediction::Decoded(result),
            Err(e) => {
                warn!("Malformed prediction for {}: {}", node_id, e);
                StoredPrediction::Malformed(raw)
            }
        }))
    }

    /// The stored prediction for a node.
    ///
    /// A record that does not decode is logged and treated as absent.
    pub async fn prediction(&self, node_id: &NodeId) -> Result<Option<PredictionResult>> {
        Ok(match self.stored_prediction(node_id).await? {
            Some(StoredPrediction::Decoded(result)) => Some(result),
            Some(StoredPrediction::Malformed(_)) | None => None,
        })
    }

    // ========================================
    // Settings
    // ========================================

    /// Model URL for this document, or the built-in default.
    pub async fn model_url(&self) -> Result<String> {
        let key = self.model_url_key();
        Ok(match self.store.get(key).await? {
            Some(raw) => decode_string(key, raw),
            None => ClassifierConfig::DEFAULT_MODEL_URL.to_string(),
        })
    }

    pub async fn set_model_url(&self, url: &str) -> Result<()> {
        self.store.set(self.model_url_key(), &encode_string(url)?).await
    }

    /// Forget the stored model URL and return the default.
    pub async fn reset_model_url(&self) -> Result<String> {
        self.store.delete(self.model_url_key()).await?;
        Ok(ClassifierConfig::DEFAULT_MODEL_URL.to_string())
    }

    pub async fn design_system_url(&self) -> Result<Option<String>> {
        let key = self.design_system_url_key();
        Ok(self
            .store
            .get(&key)
            .await?
            .map(|raw| decode_string(&key, raw)))
    }

    pub async fn set_design_system_url(&self, url: &str) -> Result<()> {
        self.store
            .set(&self.design_system_url_key(), &encode_string(url)?)
            .await
    }

    /// Attach a deep link for the top-ranked label to the node's record.
    ///
    /// Returns `None` without writing when no design system URL is configured
    /// or `ranked` is empty.
    pub async fn record_deep_link(
        &self,
        node_id: &NodeId,
        ranked: &[String],
    ) -> Result<Option<PredictionResult>> {
        let Some(label) = ranked.first() else {
            return Ok(None);
        };
        let Some(base) = self.design_system_url().await? else {
            debug!("No design system URL set, not linking {}", node_id);
            return Ok(None);
        };

        let mut record = self
            .prediction(node_id)
            .await?
            .unwrap_or_else(|| PredictionResult::new(node_id.clone(), label.clone()));
        record.url = Some(deep_link(&base, label));

        self.put_prediction(&record).await?;
        Ok(Some(record))
    }

    // ========================================
    // Listing
    // ========================================

    /// Every entry in the store, values parsed where possible.
    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for key in self.store.list_keys().await? {
            if let Some(raw) = self.store.get(&key).await? {
                entries.push(CacheEntry {
                    value: CachedValue::parse(&key, raw),
                    key,
                });
            }
        }
        Ok(entries)
    }

    /// Entries whose key is a node that still exists in the document.
    pub async fn export_list(&self, host: &dyn DocumentHost) -> Result<Vec<CacheEntry>> {
        let entries: Vec<CacheEntry> = self
            .entries()
            .await?
            .into_iter()
            .filter(|entry| !self.is_settings_key(&entry.key))
            .filter(|entry| host.node_exists(&NodeId::new(entry.key.as_str())))
            .collect();
        debug!("Export list has {} entries", entries.len());
        Ok(entries)
    }

    /// Every entry, logged at info level.
    pub async fn diagnostic_dump(&self) -> Result<Vec<CacheEntry>> {
        let entries = self.entries().await?;
        info!("Cache for '{}' holds {} entries", self.filename, entries.len());
        for entry in &entries {
            match &entry.value {
                CachedValue::Json(value) => info!("  {} = {}", entry.key, value),
                CachedValue::Raw(raw) => info!("  {} = {:?} (raw)", entry.key, raw),
            }
        }
        Ok(entries)
    }

    // ========================================
    // Reset
    // ========================================

    /// Delete every key, optionally keeping the two settings keys.
    ///
    /// Individual failures are logged and counted; the loop keeps going.
    pub async fn bulk_reset(&self, keep_settings: bool) -> Result<ResetReport> {
        let mut report = ResetReport::default();

        for key in self.store.list_keys().await? {
            if keep_settings && self.is_settings_key(&key) {
                continue;
            }
            match self.store.delete(&key).await {
                Ok(_) => report.deleted += 1,
                Err(e) => {
                    warn!("Failed to delete '{}': {}", key, e);
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.store.list_keys().await?.len();

        if report.is_complete() {
            info!(
                "Reset cache for '{}': {} deleted, {} remaining",
                self.filename, report.deleted, report.remaining
            );
        } else {
            warn!(
                "Partial reset for '{}': {} deleted, {} failed, {} remaining",
                self.filename, report.deleted, report.failed, report.remaining
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MemoryDocument, NodeType};
    use crate::error::LabelerError;
    use crate::store::MemoryStore;

    fn cache_with(store: Arc<dyn KeyValueStore>) -> PredictionCache {
        PredictionCache::new(store, "home_screen")
    }

    fn memory_cache() -> (Arc<MemoryStore>, PredictionCache) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), cache_with(store))
    }

    /// Store whose deletes of one key always fail.
    struct StickyStore {
        inner: MemoryStore,
        sticky: String,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for StickyStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            if key == self.sticky {
                return Err(LabelerError::Store("locked".into()));
            }
            self.inner.delete(key).await
        }

        async fn list_keys(&self) -> Result<Vec<String>> {
            self.inner.list_keys().await
        }
    }

    #[tokio::test]
    async fn test_prediction_round_trip() {
        let (_store, cache) = memory_cache();
        let mut result = PredictionResult::new("1:2", "Button");
        result.probability = Some("0.93".into());

        cache.put_prediction(&result).await.unwrap();
        assert_eq!(
            cache.prediction(&NodeId::from("1:2")).await.unwrap(),
            Some(result)
        );
    }

    #[tokio::test]
    async fn test_later_prediction_replaces_earlier() {
        let (_store, cache) = memory_cache();
        let mut first = PredictionResult::new("1:2", "Button");
        first.url = Some("https://ds.example/button".into());
        cache.put_prediction(&first).await.unwrap();
        cache
            .put_prediction(&PredictionResult::new("1:2", "Card"))
            .await
            .unwrap();

        let stored = cache.prediction(&NodeId::from("1:2")).await.unwrap().unwrap();
        assert_eq!(stored.prediction, "Card");
        assert!(stored.url.is_none());
    }

    #[tokio::test]
    async fn test_malformed_prediction_reads_as_absent() {
        let store = Arc::new(MemoryStore::with_entries([("1:2", "{not json")]));
        let cache = cache_with(store);
        assert!(cache.prediction(&NodeId::from("1:2")).await.unwrap().is_none());

        assert_eq!(
            cache.stored_prediction(&NodeId::from("1:2")).await.unwrap(),
            Some(StoredPrediction::Malformed("{not json".into()))
        );

        let entries = cache.entries().await.unwrap();
        assert_eq!(entries[0].value, CachedValue::Raw("{not json".into()));
    }

    #[tokio::test]
    async fn test_unquoted_setting_is_read_raw() {
        let store = Arc::new(MemoryStore::with_entries([("home_screen", "http://legacy.local")]));
        let cache = cache_with(store);
        assert_eq!(cache.model_url().await.unwrap(), "http://legacy.local");
    }

    #[tokio::test]
    async fn test_model_url_defaults_and_resets() {
        let (_store, cache) = memory_cache();
        assert_eq!(cache.model_url().await.unwrap(), ClassifierConfig::DEFAULT_MODEL_URL);

        cache.set_model_url("http://models.local/predict").await.unwrap();
        assert_eq!(cache.model_url().await.unwrap(), "http://models.local/predict");

        cache.reset_model_url().await.unwrap();
        assert_eq!(cache.model_url().await.unwrap(), ClassifierConfig::DEFAULT_MODEL_URL);
    }

    #[test]
    fn test_deep_link_format() {
        assert_eq!(
            deep_link("https://ds.example/components/", "Text Field"),
            "https://ds.example/components/text-field"
        );
    }

    #[tokio::test]
    async fn test_record_deep_link_requires_design_system_url() {
        let (store, cache) = memory_cache();
        let ranked = vec!["Icon Button".to_string(), "Button".to_string()];

        assert!(cache
            .record_deep_link(&NodeId::from("1:2"), &ranked)
            .await
            .unwrap()
            .is_none());
        assert!(store.is_empty());

        cache.set_design_system_url("https://ds.example/").await.unwrap();
        let record = cache
            .record_deep_link(&NodeId::from("1:2"), &ranked)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.url.as_deref(), Some("https://ds.example/icon-button"));
        assert_eq!(record.prediction, "Icon Button");
        assert_eq!(
            store.get("home_screen_designSystemURL").await.unwrap().as_deref(),
            Some(r#""https://ds.example/""#)
        );
    }

    #[tokio::test]
    async fn test_export_list_only_includes_existing_nodes() {
        let doc = MemoryDocument::new("Home Screen");
        let page = doc.current_page();
        let rect = doc.add_node(&page, NodeType::Rectangle, "R", 10.0, 10.0).unwrap();

        let (_store, cache) = memory_cache();
        cache
            .put_prediction(&PredictionResult::new(rect.clone(), "Button"))
            .await
            .unwrap();
        cache
            .put_prediction(&PredictionResult::new("9:99", "Card"))
            .await
            .unwrap();
        cache.set_model_url("http://models.local").await.unwrap();

        let list = cache.export_list(&doc).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].key, rect.as_str());
    }

    #[tokio::test]
    async fn test_bulk_reset_keeps_settings_when_asked() {
        let (_store, cache) = memory_cache();
        cache.set_model_url("http://models.local").await.unwrap();
        cache.set_design_system_url("https://ds.example/").await.unwrap();
        cache
            .put_prediction(&PredictionResult::new("1:2", "Button"))
            .await
            .unwrap();

        let report = cache.bulk_reset(true).await.unwrap();
        assert_eq!(
            report,
            ResetReport {
                deleted: 1,
                failed: 0,
                remaining: 2
            }
        );

        let report = cache.bulk_reset(false).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test]
    async fn test_partial_reset_reports_actual_remaining() {
        let store = StickyStore {
            inner: MemoryStore::with_entries([("a", "1"), ("b", "2"), ("imageIndex", "3")]),
            sticky: "b".into(),
        };
        let cache = cache_with(Arc::new(store));

        let report = cache.bulk_reset(false).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 1);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_diagnostic_dump_returns_everything() {
        let (_store, cache) = memory_cache();
        cache.set_model_url("http://models.local").await.unwrap();
        cache
            .put_prediction(&PredictionResult::new("1:2", "Button"))
            .await
            .unwrap();

        let dump = cache.diagnostic_dump().await.unwrap();
        assert_eq!(dump.len(), 2);
        assert!(dump
            .iter()
            .any(|e| e.key == "home_screen" && e.value == CachedValue::Json(serde_json::json!("http://models.local"))));
    }
}
