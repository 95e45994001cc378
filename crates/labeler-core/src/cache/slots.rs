//! Image slot allocation.
//!
//! Each persisted prediction can carry a placeholder rectangle holding the
//! image that was classified. Placeholders live on a dedicated storage page
//! laid out as a grid, one cell per slot index.

use crate::config::{CanvasConfig, StorageKeys};
use crate::document::{DocumentHost, NodeId, Paint, Placement};
use crate::error::{LabelerError, Result};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// An allocated slot. The grid position is derived from `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSlot {
    pub index: u64,
    pub surface_node_id: NodeId,
}

impl ImageSlot {
    pub fn position(&self) -> (f64, f64) {
        slot_position(self.index)
    }
}

/// Top-left corner of slot `index` on the storage page.
pub fn slot_position(index: u64) -> (f64, f64) {
    let column = index % CanvasConfig::SLOT_GRID_COLUMNS;
    let row = index / CanvasConfig::SLOT_GRID_COLUMNS;
    (
        column as f64 * CanvasConfig::CANONICAL_SIZE,
        row as f64 * CanvasConfig::CANONICAL_SIZE,
    )
}

/// Hands out monotonically increasing slot indices.
///
/// The counter lives in the store under `imageIndex`. Every allocation runs
/// read, increment and write while holding one lock, so two allocations can
/// never observe the same counter value. Clones share the lock.
#[derive(Clone)]
pub struct SlotAllocator {
    store: Arc<dyn KeyValueStore>,
    lock: Arc<Mutex<()>>,
}

impl SlotAllocator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Reserve the next index and place a placeholder holding `image_bytes`.
    ///
    /// An index is consumed even if placing the placeholder fails afterwards;
    /// indices are never reused.
    pub async fn allocate(&self, host: &dyn DocumentHost, image_bytes: &[u8]) -> Result<ImageSlot> {
        let _guard = self.lock.lock().await;

        let index = self.next_index().await?;
        let page = self.storage_page(host).await?;
        let (x, y) = slot_position(index);

        let image_hash = host.create_image(image_bytes)?;
        let surface_node_id = host.create_rectangle(
            &page,
            &Placement {
                name: format!("Slot {}", index),
                x,
                y,
                width: CanvasConfig::CANONICAL_SIZE,
                height: CanvasConfig::CANONICAL_SIZE,
                fill: Some(Paint::Image { image_hash }),
            },
        )?;

        debug!("Allocated image slot {} at ({}, {})", index, x, y);
        Ok(ImageSlot {
            index,
            surface_node_id,
        })
    }

    /// Read the counter, write back its successor and return the read value.
    async fn next_index(&self) -> Result<u64> {
        let current = match self.store.get(StorageKeys::IMAGE_INDEX).await? {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                LabelerError::Store(format!(
                    "{} holds '{}', not a slot index: {}",
                    StorageKeys::IMAGE_INDEX,
                    raw,
                    e
                ))
            })?,
            None => 0,
        };

        let next = current.checked_add(1).ok_or_else(|| {
            LabelerError::Store(format!(
                "{} is at {}, no slot index left",
                StorageKeys::IMAGE_INDEX,
                current
            ))
        })?;

        self.store
            .set(StorageKeys::IMAGE_INDEX, &next.to_string())
            .await?;
        Ok(current)
    }

    /// The storage page, created on first use and recreated if it was deleted.
    async fn storage_page(&self, host: &dyn DocumentHost) -> Result<NodeId> {
        if let Some(raw) = self.store.get(StorageKeys::IMAGE_STORAGE_PAGE_ID).await? {
            let id = NodeId::new(super::decode_string(StorageKeys::IMAGE_STORAGE_PAGE_ID, raw));
            if host.node_exists(&id) {
                return Ok(id);
            }
            debug!("Cached storage page {} is gone, creating a new one", id);
        }

        let page = host.create_page(StorageKeys::IMAGE_STORAGE_PAGE_NAME)?;
        self.store
            .set(
                StorageKeys::IMAGE_STORAGE_PAGE_ID,
                &super::encode_string(page.as_str())?,
            )
            .await?;
        info!("Created image storage page {}", page);
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;
    use crate::store::MemoryStore;

    /// Store that yields to the scheduler before every read and write, so
    /// interleavings that a real async backend could produce actually happen.
    struct YieldingStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for YieldingStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            tokio::task::yield_now().await;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            tokio::task::yield_now().await;
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }

        async fn list_keys(&self) -> Result<Vec<String>> {
            self.inner.list_keys().await
        }
    }

    fn yielding_store() -> Arc<dyn KeyValueStore> {
        Arc::new(YieldingStore {
            inner: MemoryStore::new(),
        })
    }

    /// Independent get then set with nothing tying them together.
    async fn unserialized_allocate(store: &dyn KeyValueStore) -> u64 {
        let current = store
            .get(StorageKeys::IMAGE_INDEX)
            .await
            .unwrap()
            .map(|raw| raw.parse::<u64>().unwrap())
            .unwrap_or(0);
        store
            .set(StorageKeys::IMAGE_INDEX, &(current + 1).to_string())
            .await
            .unwrap();
        current
    }

    #[test]
    fn test_slot_positions() {
        assert_eq!(slot_position(0), (0.0, 0.0));
        assert_eq!(slot_position(19), (4256.0, 0.0));
        assert_eq!(slot_position(20), (0.0, 224.0));
        assert_eq!(slot_position(41), (224.0, 448.0));
    }

    #[tokio::test]
    async fn test_unserialized_allocation_races() {
        let store = yielding_store();
        let (a, b) = tokio::join!(
            unserialized_allocate(store.as_ref()),
            unserialized_allocate(store.as_ref())
        );
        assert_eq!(a, b, "interleaved get/set should hand out the same index");
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        let store = yielding_store();
        let doc = MemoryDocument::new("Doc");
        let allocator = SlotAllocator::new(store.clone());
        let second = allocator.clone();

        let (a, b) = tokio::join!(
            allocator.allocate(&doc, b"first"),
            second.allocate(&doc, b"second")
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.index, b.index);
        assert_eq!(
            store.get(StorageKeys::IMAGE_INDEX).await.unwrap().as_deref(),
            Some("2")
        );
        let page_a = doc.node(&a.surface_node_id).unwrap().parent;
        let page_b = doc.node(&b.surface_node_id).unwrap().parent;
        assert_eq!(page_a, page_b);
    }

    #[tokio::test]
    async fn test_storage_page_created_once_and_cached() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let doc = MemoryDocument::new("Doc");
        let allocator = SlotAllocator::new(store.clone());

        let first = allocator.allocate(&doc, b"a").await.unwrap();
        let cached: String = serde_json::from_str(
            &store
                .get(StorageKeys::IMAGE_STORAGE_PAGE_ID)
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        let second = allocator.allocate(&doc, b"b").await.unwrap();

        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
        assert_eq!(second.position(), (224.0, 0.0));
        let parent = doc.node(&second.surface_node_id).unwrap().parent.unwrap();
        assert_eq!(parent.as_str(), cached);

        let surface = doc.node(&first.surface_node_id).unwrap();
        assert!(surface.fills[0].is_image());
        assert_eq!(surface.width, 224.0);
    }

    #[tokio::test]
    async fn test_indices_not_reused_after_page_removal() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let doc = MemoryDocument::new("Doc");
        let allocator = SlotAllocator::new(store.clone());

        let first = allocator.allocate(&doc, b"a").await.unwrap();
        let page = doc.node(&first.surface_node_id).unwrap().parent.unwrap();
        doc.remove(&page).unwrap();

        let second = allocator.allocate(&doc, b"b").await.unwrap();
        assert_eq!(second.index, 1);
        assert!(doc.node_exists(&second.surface_node_id));
    }

    #[tokio::test]
    async fn test_malformed_counter_is_an_error() {
        let store: Arc<dyn KeyValueStore> =
            Arc::new(MemoryStore::with_entries([(StorageKeys::IMAGE_INDEX, "seven")]));
        let doc = MemoryDocument::new("Doc");

        let err = SlotAllocator::new(store).allocate(&doc, b"a").await.unwrap_err();
        assert!(matches!(err, LabelerError::Store(_)));
    }

    #[tokio::test]
    async fn test_exhausted_counter_is_an_error() {
        let max = u64::MAX.to_string();
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::with_entries([(
            StorageKeys::IMAGE_INDEX,
            max.as_str(),
        )]));
        let doc = MemoryDocument::new("Doc");
        let before = doc.node_count();

        let err = SlotAllocator::new(store.clone())
            .allocate(&doc, b"a")
            .await
            .unwrap_err();
        assert!(matches!(err, LabelerError::Store(_)));
        assert_eq!(
            store.get(StorageKeys::IMAGE_INDEX).await.unwrap(),
            Some(max)
        );
        assert_eq!(doc.node_count(), before);
    }
}
