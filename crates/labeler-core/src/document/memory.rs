//! In-memory arena document.
//!
//! Nodes live in an id-indexed map; parents and children are id references.
//! Used by the RPC binary (loaded from a JSON snapshot) and by tests.

use super::{
    DocumentHost, ExportFormat, FrameLayout, FrameSpec, NodeId, NodeSnapshot, NodeType, Paint,
    Placement,
};
use crate::error::{LabelerError, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Largest raster edge the memory host will produce.
const MAX_RASTER_EDGE: u32 = 4096;

const ROOT_ID: &str = "0:0";
const FIRST_PAGE_ID: &str = "0:1";
const ALLOCATED_ID_PREFIX: &str = "1:";

/// Highest counter value already used by an allocated id in `nodes`.
fn highest_allocated<'a>(ids: impl Iterator<Item = &'a NodeId>) -> u64 {
    ids.filter_map(|id| id.as_str().strip_prefix(ALLOCATED_ID_PREFIX))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}

/// Serializable form of a whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub name: String,
    pub current_page: NodeId,
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub selection: Vec<NodeId>,
    #[serde(default)]
    pub layouts: BTreeMap<NodeId, FrameLayout>,
    #[serde(default)]
    pub images: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub next_id: u64,
}

#[derive(Debug)]
struct Arena {
    name: String,
    current_page: NodeId,
    nodes: HashMap<NodeId, NodeSnapshot>,
    selection: Vec<NodeId>,
    layouts: HashMap<NodeId, FrameLayout>,
    images: BTreeMap<String, Vec<u8>>,
    unrenderable: HashSet<NodeId>,
    next_id: u64,
}

impl Arena {
    /// Next free id. Skips ids already present so a stale counter can never
    /// hand out a live node's id.
    fn allocate_id(&mut self) -> NodeId {
        loop {
            self.next_id += 1;
            let id = NodeId::new(format!("{}{}", ALLOCATED_ID_PREFIX, self.next_id));
            if !self.nodes.contains_key(&id) {
                return id;
            }
        }
    }

    fn get(&self, id: &NodeId) -> Result<&NodeSnapshot> {
        self.nodes.get(id).ok_or_else(|| LabelerError::NodeNotFound {
            node_id: id.to_string(),
        })
    }

    fn get_mut(&mut self, id: &NodeId) -> Result<&mut NodeSnapshot> {
        self.nodes.get_mut(id).ok_or_else(|| LabelerError::NodeNotFound {
            node_id: id.to_string(),
        })
    }

    fn insert_child(&mut self, parent: &NodeId, node: NodeSnapshot) -> Result<NodeId> {
        let id = node.id.clone();
        self.get_mut(parent)?.children.push(id.clone());
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    fn detach(&mut self, id: &NodeId) -> Result<()> {
        let parent = self.get(id)?.parent.clone();
        if let Some(parent) = parent {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.retain(|child| child != id);
            }
        }
        Ok(())
    }

    fn subtree(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = vec![id.clone()];
        let mut i = 0;
        while i < out.len() {
            if let Some(node) = self.nodes.get(&out[i]) {
                out.extend(node.children.iter().cloned());
            }
            i += 1;
        }
        out
    }

    fn copy_subtree(&mut self, id: &NodeId, new_parent: Option<NodeId>) -> Result<NodeId> {
        let source = self.get(id)?.clone();
        let copy_id = self.allocate_id();

        if self.unrenderable.contains(id) {
            self.unrenderable.insert(copy_id.clone());
        }
        if let Some(layout) = self.layouts.get(id).copied() {
            self.layouts.insert(copy_id.clone(), layout);
        }

        let mut copy = source.clone();
        copy.id = copy_id.clone();
        copy.parent = new_parent;
        copy.children = Vec::with_capacity(source.children.len());
        self.nodes.insert(copy_id.clone(), copy);

        for child in &source.children {
            let child_copy = self.copy_subtree(child, Some(copy_id.clone()))?;
            self.get_mut(&copy_id)?.children.push(child_copy);
        }

        Ok(copy_id)
    }

    fn scale_subtree(&mut self, id: &NodeId, ratio: f64, is_root: bool) -> Result<()> {
        let children = {
            let node = self.get_mut(id)?;
            node.width *= ratio;
            node.height *= ratio;
            if !is_root {
                node.x *= ratio;
                node.y *= ratio;
            }
            node.children.clone()
        };
        for child in children {
            self.scale_subtree(&child, ratio, false)?;
        }
        Ok(())
    }

    fn paint(&self, id: &NodeId, canvas: &mut RgbImage, origin: (f64, f64)) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };

        let color = node.fills.iter().find_map(|fill| match fill {
            Paint::Solid { color } => Some(*color),
            Paint::GradientLinear { stops } => stops.first().copied(),
            Paint::Image { .. } => Some([128, 128, 128]),
        });

        if let Some([r, g, b]) = color {
            let x0 = origin.0.max(0.0) as u32;
            let y0 = origin.1.max(0.0) as u32;
            let x1 = ((origin.0 + node.width).max(0.0) as u32).min(canvas.width());
            let y1 = ((origin.1 + node.height).max(0.0) as u32).min(canvas.height());
            for y in y0..y1 {
                for x in x0..x1 {
                    canvas.put_pixel(x, y, Rgb([r, g, b]));
                }
            }
        }

        for child in &node.children {
            if let Some(child_node) = self.nodes.get(child) {
                self.paint(
                    child,
                    canvas,
                    (origin.0 + child_node.x, origin.1 + child_node.y),
                );
            }
        }
    }
}

/// Arena-backed implementation of [`DocumentHost`].
#[derive(Debug)]
pub struct MemoryDocument {
    arena: RwLock<Arena>,
}

impl MemoryDocument {
    /// Create an empty document with a root and a single page.
    pub fn new(name: impl Into<String>) -> Self {
        let root = NodeId::from(ROOT_ID);
        let page = NodeId::from(FIRST_PAGE_ID);
        let mut nodes = HashMap::new();
        nodes.insert(
            root.clone(),
            NodeSnapshot {
                id: root.clone(),
                node_type: NodeType::Document,
                name: "Document".to_string(),
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
                fills: Vec::new(),
                parent: None,
                children: vec![page.clone()],
            },
        );
        nodes.insert(
            page.clone(),
            NodeSnapshot {
                id: page.clone(),
                node_type: NodeType::Page,
                name: "Page 1".to_string(),
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
                fills: Vec::new(),
                parent: Some(root),
                children: Vec::new(),
            },
        );

        Self {
            arena: RwLock::new(Arena {
                name: name.into(),
                current_page: page,
                nodes,
                selection: Vec::new(),
                layouts: HashMap::new(),
                images: BTreeMap::new(),
                unrenderable: HashSet::new(),
                next_id: 0,
            }),
        }
    }

    /// Rebuild a document from a snapshot.
    pub fn from_snapshot(snapshot: DocumentSnapshot) -> Result<Self> {
        let nodes: HashMap<NodeId, NodeSnapshot> = snapshot
            .nodes
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();

        if !nodes.contains_key(&snapshot.current_page) {
            return Err(LabelerError::Validation {
                field: "currentPage".to_string(),
                message: format!("page {} is not in the node list", snapshot.current_page),
            });
        }

        let next_id = snapshot.next_id.max(highest_allocated(nodes.keys()));
        if next_id != snapshot.next_id {
            debug!(
                "Snapshot id counter {} is behind its nodes, continuing from {}",
                snapshot.next_id, next_id
            );
        }

        Ok(Self {
            arena: RwLock::new(Arena {
                name: snapshot.name,
                current_page: snapshot.current_page,
                nodes,
                selection: snapshot.selection,
                layouts: snapshot.layouts.into_iter().collect(),
                images: snapshot.images,
                unrenderable: HashSet::new(),
                next_id,
            }),
        })
    }

    /// Capture the document for persistence.
    pub fn snapshot(&self) -> DocumentSnapshot {
        let arena = self.read();
        let mut nodes: Vec<NodeSnapshot> = arena.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        DocumentSnapshot {
            name: arena.name.clone(),
            current_page: arena.current_page.clone(),
            nodes,
            selection: arena.selection.clone(),
            layouts: arena.layouts.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            images: arena.images.clone(),
            next_id: arena.next_id,
        }
    }

    pub fn current_page(&self) -> NodeId {
        self.read().current_page.clone()
    }

    /// Add a plain node under `parent`.
    pub fn add_node(
        &self,
        parent: &NodeId,
        node_type: NodeType,
        name: &str,
        width: f64,
        height: f64,
    ) -> Result<NodeId> {
        let mut arena = self.write();
        let id = arena.allocate_id();
        arena.insert_child(
            parent,
            NodeSnapshot {
                id: id.clone(),
                node_type,
                name: name.to_string(),
                x: 0.0,
                y: 0.0,
                width,
                height,
                fills: Vec::new(),
                parent: Some(parent.clone()),
                children: Vec::new(),
            },
        )
    }

    pub fn set_fills(&self, id: &NodeId, fills: Vec<Paint>) -> Result<()> {
        self.write().get_mut(id)?.fills = fills;
        Ok(())
    }

    pub fn set_selection(&self, ids: Vec<NodeId>) {
        self.write().selection = ids;
    }

    /// Make every future rasterization of this node (or a copy of it) fail.
    pub fn mark_unrenderable(&self, id: &NodeId) {
        self.write().unrenderable.insert(id.clone());
    }

    /// Number of nodes, including the root and pages.
    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn layout(&self, id: &NodeId) -> Option<FrameLayout> {
        self.read().layouts.get(id).copied()
    }

    pub fn image(&self, hash: &str) -> Option<Vec<u8>> {
        self.read().images.get(hash).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl DocumentHost for MemoryDocument {
    fn document_name(&self) -> String {
        self.read().name.clone()
    }

    fn selection(&self) -> Vec<NodeId> {
        self.read().selection.clone()
    }

    fn node(&self, id: &NodeId) -> Option<NodeSnapshot> {
        self.read().nodes.get(id).cloned()
    }

    fn set_name(&self, id: &NodeId, name: &str) -> Result<()> {
        self.write().get_mut(id)?.name = name.to_string();
        Ok(())
    }

    fn clone_node(&self, id: &NodeId) -> Result<NodeId> {
        let mut arena = self.write();
        let parent = arena.get(id)?.parent.clone();
        let copy = arena.copy_subtree(id, parent.clone())?;

        if let Some(parent) = parent {
            let siblings = &mut arena.get_mut(&parent)?.children;
            let position = siblings
                .iter()
                .position(|child| child == id)
                .map(|p| p + 1)
                .unwrap_or(siblings.len());
            siblings.insert(position, copy.clone());
        }

        debug!("Cloned {} as {}", id, copy);
        Ok(copy)
    }

    fn rescale(&self, id: &NodeId, ratio: f64) -> Result<()> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(LabelerError::Validation {
                field: "ratio".to_string(),
                message: format!("scale ratio must be positive, got {}", ratio),
            });
        }
        self.write().scale_subtree(id, ratio, true)
    }

    fn create_frame(&self, spec: &FrameSpec) -> Result<NodeId> {
        let mut arena = self.write();
        let id = arena.allocate_id();
        let page = arena.current_page.clone();
        arena.layouts.insert(id.clone(), spec.layout);
        arena.insert_child(
            &page,
            NodeSnapshot {
                id: id.clone(),
                node_type: NodeType::Frame,
                name: spec.name.clone(),
                x: 0.0,
                y: 0.0,
                width: spec.width,
                height: spec.height,
                fills: vec![Paint::Solid {
                    color: [255, 255, 255],
                }],
                parent: Some(page.clone()),
                children: Vec::new(),
            },
        )
    }

    fn append_child(&self, parent: &NodeId, child: &NodeId) -> Result<()> {
        let mut arena = self.write();
        let (parent_width, parent_height) = {
            let parent_node = arena.get(parent)?;
            (parent_node.width, parent_node.height)
        };
        let centered = arena
            .layouts
            .get(parent)
            .map(|layout| *layout == FrameLayout::centered_fixed())
            .unwrap_or(false);

        arena.detach(child)?;
        let node = arena.get_mut(child)?;
        node.parent = Some(parent.clone());
        if centered {
            node.x = (parent_width - node.width) / 2.0;
            node.y = (parent_height - node.height) / 2.0;
        }
        arena.get_mut(parent)?.children.push(child.clone());
        Ok(())
    }

    fn remove(&self, id: &NodeId) -> Result<()> {
        let mut arena = self.write();
        if arena.get(id)?.parent.is_none() {
            return Err(LabelerError::host("remove", "the document root cannot be removed"));
        }
        arena.detach(id)?;
        for node in arena.subtree(id) {
            arena.nodes.remove(&node);
            arena.layouts.remove(&node);
            arena.unrenderable.remove(&node);
            arena.selection.retain(|selected| *selected != node);
        }
        Ok(())
    }

    fn create_page(&self, name: &str) -> Result<NodeId> {
        let mut arena = self.write();
        let id = arena.allocate_id();
        let root = NodeId::from(ROOT_ID);
        arena.insert_child(
            &root,
            NodeSnapshot {
                id: id.clone(),
                node_type: NodeType::Page,
                name: name.to_string(),
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
                fills: Vec::new(),
                parent: Some(root.clone()),
                children: Vec::new(),
            },
        )
    }

    fn create_image(&self, bytes: &[u8]) -> Result<String> {
        let mut arena = self.write();
        let hash = format!("img-{:04}-{}", arena.images.len() + 1, bytes.len());
        arena.images.insert(hash.clone(), bytes.to_vec());
        Ok(hash)
    }

    fn create_rectangle(&self, parent: &NodeId, placement: &Placement) -> Result<NodeId> {
        let mut arena = self.write();
        let id = arena.allocate_id();
        arena.insert_child(
            parent,
            NodeSnapshot {
                id: id.clone(),
                node_type: NodeType::Rectangle,
                name: placement.name.clone(),
                x: placement.x,
                y: placement.y,
                width: placement.width,
                height: placement.height,
                fills: placement.fill.clone().into_iter().collect(),
                parent: Some(parent.clone()),
                children: Vec::new(),
            },
        )
    }

    async fn rasterize(&self, id: &NodeId, format: ExportFormat) -> Result<Vec<u8>> {
        let canvas = {
            let arena = self.read();
            let node = arena.get(id)?;

            if arena
                .subtree(id)
                .iter()
                .any(|member| arena.unrenderable.contains(member))
            {
                return Err(LabelerError::Rasterization {
                    node_id: id.to_string(),
                    message: "node contains content the renderer cannot draw".to_string(),
                });
            }

            let width = (node.width.ceil() as u32).clamp(1, MAX_RASTER_EDGE);
            let height = (node.height.ceil() as u32).clamp(1, MAX_RASTER_EDGE);
            let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
            arena.paint(id, &mut canvas, (0.0, 0.0));
            canvas
        };

        let image_format = match format {
            ExportFormat::Png => ImageFormat::Png,
            ExportFormat::Jpg => ImageFormat::Jpeg,
        };

        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut buffer, image_format)
            .map_err(|e| LabelerError::Rasterization {
                node_id: id.to_string(),
                message: format!("Failed to encode: {}", e),
            })?;

        Ok(buffer.into_inner())
    }
}
