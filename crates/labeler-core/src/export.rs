//! Node normalization and export.
//!
//! Every selected node is copied, scaled down so its longest edge fits the
//! canonical canvas, centered inside a fixed square frame and rasterized.
//! The copy and the frame are scratch nodes: they are removed again whether
//! rasterization succeeds or not, and the original node is never touched.

use crate::config::CanvasConfig;
use crate::document::{DocumentHost, ExportFormat, FrameLayout, FrameSpec, NodeId, NodeSnapshot};
use crate::error::{LabelerError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One rasterized node, valid for a single classification round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedImage {
    pub node_id: NodeId,
    pub image_bytes: Vec<u8>,
}

/// A node that could not be rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFailure {
    pub node_id: NodeId,
    pub reason: String,
}

/// Result of exporting a selection.
///
/// Every input node ends up in exactly one of the two lists, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportBatch {
    pub images: Vec<RenderedImage>,
    pub failures: Vec<ExportFailure>,
}

impl ExportBatch {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Round to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Scale ratio for a node of the given size, or `None` if it already fits.
pub fn scale_ratio(width: f64, height: f64) -> Option<f64> {
    let longest = width.max(height);
    if longest > CanvasConfig::CANONICAL_SIZE {
        Some(round2(CanvasConfig::CANONICAL_SIZE / longest))
    } else {
        None
    }
}

/// Scratch nodes removed when dropped.
struct Scratch<'a> {
    host: &'a dyn DocumentHost,
    nodes: Vec<NodeId>,
}

impl<'a> Scratch<'a> {
    fn new(host: &'a dyn DocumentHost) -> Self {
        Self {
            host,
            nodes: Vec::new(),
        }
    }

    fn track(&mut self, id: NodeId) -> NodeId {
        self.nodes.push(id.clone());
        id
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        // Newest first: removing the frame also removes the copy inside it.
        for id in self.nodes.iter().rev() {
            if !self.host.node_exists(id) {
                continue;
            }
            if let Err(e) = self.host.remove(id) {
                warn!("Failed to remove scratch node {}: {}", id, e);
            }
        }
    }
}

/// Renders nodes into canonical square images.
pub struct Exporter<'a> {
    host: &'a dyn DocumentHost,
    format: ExportFormat,
}

impl<'a> Exporter<'a> {
    pub fn new(host: &'a dyn DocumentHost, format: ExportFormat) -> Self {
        Self { host, format }
    }

    /// Export every node, continuing past individual failures.
    pub async fn export(&self, nodes: &[NodeSnapshot]) -> ExportBatch {
        let mut batch = ExportBatch::default();

        for node in nodes {
            match self.render(node).await {
                Ok(image_bytes) => batch.images.push(RenderedImage {
                    node_id: node.id.clone(),
                    image_bytes,
                }),
                Err(e) => {
                    warn!("Skipping {} ({}): {}", node.id, node.name, e);
                    batch.failures.push(ExportFailure {
                        node_id: node.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Exported {} images, {} failures",
            batch.images.len(),
            batch.failures.len()
        );
        batch
    }

    /// Render a single node inside its own scratch scope.
    pub async fn render(&self, node: &NodeSnapshot) -> Result<Vec<u8>> {
        let mut scratch = Scratch::new(self.host);
        let frame = self.stage(&mut scratch, node)?;

        self.host
            .rasterize(&frame, self.format)
            .await
            .map_err(|e| match e {
                LabelerError::Rasterization { message, .. } => LabelerError::Rasterization {
                    node_id: node.id.to_string(),
                    message,
                },
                other => LabelerError::Rasterization {
                    node_id: node.id.to_string(),
                    message: other.to_string(),
                },
            })
    }

    /// Build the framed copy of `node` and return the frame id.
    fn stage(&self, scratch: &mut Scratch<'_>, node: &NodeSnapshot) -> Result<NodeId> {
        let copy = scratch.track(self.host.clone_node(&node.id)?);

        if let Some(ratio) = scale_ratio(node.width, node.height) {
            self.host.rescale(&copy, ratio)?;
        }

        let frame = scratch.track(self.host.create_frame(&FrameSpec {
            name: CanvasConfig::SCRATCH_FRAME_NAME.to_string(),
            width: CanvasConfig::CANONICAL_SIZE,
            height: CanvasConfig::CANONICAL_SIZE,
            layout: FrameLayout::centered_fixed(),
        })?);

        self.host.append_child(&frame, &copy)?;
        Ok(frame)
    }
}
