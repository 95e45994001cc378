//! Centralized configuration for the labeler.
//!
//! Compile-time constants for canvas geometry, storage keys, the classifier
//! boundary and the naming policy, plus the runtime `SessionOptions`.

use crate::document::{ExportFormat, NodeType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Canonical canvas geometry.
pub struct CanvasConfig;

impl CanvasConfig {
    /// Edge of the square image every node is normalized into.
    pub const CANONICAL_SIZE: f64 = 224.0;
    /// Slots per row on the image storage page.
    pub const SLOT_GRID_COLUMNS: u64 = 20;
    pub const SCRATCH_FRAME_NAME: &'static str = "Labeler scratch frame";
}

/// Well-known keys in the per-document store.
pub struct StorageKeys;

impl StorageKeys {
    pub const IMAGE_INDEX: &'static str = "imageIndex";
    pub const IMAGE_STORAGE_PAGE_ID: &'static str = "imageStoragePageId";
    pub const DESIGN_SYSTEM_URL_SUFFIX: &'static str = "_designSystemURL";
    pub const IMAGE_STORAGE_PAGE_NAME: &'static str = "Labeler image storage";
}

/// Classifier boundary defaults.
pub struct ClassifierConfig;

impl ClassifierConfig {
    pub const DEFAULT_MODEL_URL: &'static str = "http://127.0.0.1:8501/v1/models/ui-elements:predict";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
    pub const USER_AGENT: &'static str = "UI-Labeler/0.3";
}

/// Fixed names used by the rename pass.
pub struct NamingConfig;

impl NamingConfig {
    pub const PLACEHOLDER_NAME: &'static str = "Layer";
    pub const IMAGE_NAME: &'static str = "Image";
    pub const PARAGRAPH_CONTAINER_NAME: &'static str = "Paragraph container";
    pub const CONTAINER_SUFFIX: &'static str = " container";
    /// Parent names that are never rewritten to "<name> container".
    pub const PROTECTED_PARENT_NAMES: &'static [&'static str] = &[
        "Container",
        "Card",
        "Horizontal container",
        "Vertical container",
    ];
}

/// Default exclusion set: text plus annotation-only and component leaf types.
pub fn full_exclusion_set() -> HashSet<NodeType> {
    [
        NodeType::Text,
        NodeType::Vector,
        NodeType::Component,
        NodeType::ComponentSet,
        NodeType::Instance,
    ]
    .into_iter()
    .collect()
}

/// Runtime policy for a labeling session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionOptions {
    /// Node types never sent to the classifier.
    pub export_exclusions: HashSet<NodeType>,
    /// Node types never renamed.
    pub rename_exclusions: HashSet<NodeType>,
    /// Skip container expansion and use the raw selection.
    pub top_level_only: bool,
    /// Write predictions (and image slots) to the store on delivery.
    pub persist_predictions: bool,
    pub export_format: ExportFormat,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            export_exclusions: full_exclusion_set(),
            rename_exclusions: full_exclusion_set(),
            top_level_only: false,
            persist_predictions: true,
            export_format: ExportFormat::Jpg,
        }
    }
}
