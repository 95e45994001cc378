//! Labeler Core - Headless pipeline that labels document nodes with a classifier.
//!
//! The crate expands a selection into exportable nodes, renders each one into
//! a canonical 224x224 image, hands the images to an external classifier and
//! writes the returned labels back onto the document. Predictions, settings and
//! the image slot counter persist in a per-document key-value store.
//!
//! The document itself is behind [`DocumentHost`]; [`MemoryDocument`] is the
//! arena implementation used by the RPC server and the tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use labeler_core::{MemoryDocument, MemoryStore, Session, SessionOptions, ViewMessage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> labeler_core::Result<()> {
//!     let doc = Arc::new(MemoryDocument::new("Home Screen"));
//!     let store = Arc::new(MemoryStore::new());
//!     let mut session = Session::new(doc, store, SessionOptions::default());
//!
//!     for message in session.handle(ViewMessage::Init).await? {
//!         println!("{:?}", message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classifier;
pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod naming;
pub mod selection;
pub mod session;
pub mod snapshot;
pub mod store;

// Re-export commonly used types
pub use cache::{
    CacheEntry, CachedValue, ImageSlot, PredictionCache, PredictionResult, ResetReport,
    SlotAllocator, StoredPrediction,
};
pub use classifier::{Classifier, HttpClassifier};
pub use config::SessionOptions;
pub use document::{
    DocumentHost, DocumentSnapshot, ExportFormat, MemoryDocument, NodeId, NodeSnapshot, NodeType,
    Paint,
};
pub use error::{LabelerError, Result};
pub use export::{ExportBatch, ExportFailure, Exporter, RenderedImage};
pub use naming::{to_resource_name, RenameReport, Renamer};
pub use selection::Selector;
pub use session::{HostMessage, Session, SessionHandle, ViewMessage};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
