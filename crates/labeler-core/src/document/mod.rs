//! Document host abstraction.
//!
//! The host owns the node tree; this crate only reads it through snapshots and
//! mutates it through the narrow set of primitives on [`DocumentHost`]. Parents
//! are referenced by id, never owned.

mod memory;

pub use memory::{DocumentSnapshot, MemoryDocument};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a node for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Closed set of node kinds the host can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Document,
    Page,
    Frame,
    Group,
    Section,
    Rectangle,
    Ellipse,
    Line,
    Polygon,
    Star,
    Vector,
    BooleanOperation,
    Text,
    Component,
    ComponentSet,
    Instance,
    Slice,
}

impl NodeType {
    /// Frames and groups are expanded by the selector and checked by the
    /// paragraph-container rule.
    pub fn is_container(self) -> bool {
        matches!(self, NodeType::Frame | NodeType::Group)
    }

    pub fn is_text(self) -> bool {
        matches!(self, NodeType::Text)
    }
}

/// A fill entry on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Paint {
    Solid { color: [u8; 3] },
    Image { image_hash: String },
    GradientLinear { stops: Vec<[u8; 3]> },
}

impl Paint {
    pub fn is_image(&self) -> bool {
        matches!(self, Paint::Image { .. })
    }
}

/// Read-only view of a node at the time of the lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub fills: Vec<Paint>,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<NodeId>,
}

impl NodeSnapshot {
    pub fn longest_edge(&self) -> f64 {
        self.width.max(self.height)
    }
}

/// Raster formats the host can export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    Png,
    Jpg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AxisAlign {
    Min,
    Center,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sizing {
    Fixed,
    Auto,
}

/// Auto-layout of a frame along both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameLayout {
    pub primary_axis_align: AxisAlign,
    pub counter_axis_align: AxisAlign,
    pub sizing: Sizing,
}

impl FrameLayout {
    /// Child centered on both axes inside a frame that never resizes.
    pub fn centered_fixed() -> Self {
        Self {
            primary_axis_align: AxisAlign::Center,
            counter_axis_align: AxisAlign::Center,
            sizing: Sizing::Fixed,
        }
    }
}

/// Parameters for a new frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSpec {
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub layout: FrameLayout,
}

/// Parameters for a new rectangle inside a parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub fill: Option<Paint>,
}

/// Capability surface of the document host.
///
/// Injected into every component; nothing in this crate reaches for a global
/// host handle.
#[async_trait::async_trait]
pub trait DocumentHost: Send + Sync {
    /// Display name of the open document.
    fn document_name(&self) -> String;

    /// Current raw selection, in host order.
    fn selection(&self) -> Vec<NodeId>;

    /// Snapshot of a node, or `None` if it no longer exists.
    fn node(&self, id: &NodeId) -> Option<NodeSnapshot>;

    fn set_name(&self, id: &NodeId, name: &str) -> Result<()>;

    /// Deep-copy a node next to the original and return the copy's id.
    fn clone_node(&self, id: &NodeId) -> Result<NodeId>;

    /// Scale a node and its subtree uniformly.
    fn rescale(&self, id: &NodeId, ratio: f64) -> Result<()>;

    fn create_frame(&self, spec: &FrameSpec) -> Result<NodeId>;

    /// Move `child` under `parent`, detaching it from its previous parent.
    fn append_child(&self, parent: &NodeId, child: &NodeId) -> Result<()>;

    /// Remove a node and its subtree.
    fn remove(&self, id: &NodeId) -> Result<()>;

    fn create_page(&self, name: &str) -> Result<NodeId>;

    /// Register raw image bytes and return the hash used by image paints.
    fn create_image(&self, bytes: &[u8]) -> Result<String>;

    fn create_rectangle(&self, parent: &NodeId, placement: &Placement) -> Result<NodeId>;

    /// Render a node to compressed bytes.
    async fn rasterize(&self, id: &NodeId, format: ExportFormat) -> Result<Vec<u8>>;

    fn node_exists(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }
}

/// All descendants of `id` in depth-first pre-order, excluding `id` itself.
pub fn descendants(host: &dyn DocumentHost, id: &NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = match host.node(id) {
        Some(node) => node.children.into_iter().rev().collect(),
        None => return out,
    };

    while let Some(next) = stack.pop() {
        if let Some(node) = host.node(&next) {
            stack.extend(node.children.iter().rev().cloned());
        }
        out.push(next);
    }

    out
}
