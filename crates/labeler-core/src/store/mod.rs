//! Per-document key-value persistence.
//!
//! Values are raw strings (JSON text by convention); interpretation lives in
//! [`crate::cache`]. Two backends are provided:
//! - SQLite, one database shared by every document with namespace isolation
//! - an in-memory ordered map

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::{NamespaceMeta, SqliteNamespace, SqliteStore};
pub use traits::KeyValueStore;
