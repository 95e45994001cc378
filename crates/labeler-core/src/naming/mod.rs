//! Label application.
//!
//! The rename pass writes predicted labels onto the document and then applies
//! a fixed sequence of exceptions that can override them. It mutates nodes one
//! at a time and is not transactional: a failure part-way leaves earlier nodes
//! renamed and later ones untouched.

mod resource_name;

pub use resource_name::to_resource_name;

use crate::cache::{PredictionCache, PredictionResult};
use crate::config::NamingConfig;
use crate::document::{descendants, DocumentHost, NodeId, NodeSnapshot, NodeType};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Counters for one rename pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameReport {
    /// Nodes visited.
    pub nodes: usize,
    /// Nodes that received a predicted label.
    pub labeled: usize,
    pub image_overrides: usize,
    pub paragraph_overrides: usize,
    pub parent_renames: usize,
    /// Predictions written to the cache.
    pub persisted: usize,
    /// Nodes gone from the document before they were reached.
    pub missing: usize,
}

fn is_image_rectangle(node: &NodeSnapshot) -> bool {
    node.node_type == NodeType::Rectangle && node.fills.first().is_some_and(|fill| fill.is_image())
}

/// Names that never propagate to the parent as "<name> container".
fn is_protected(name: &str) -> bool {
    name == NamingConfig::PLACEHOLDER_NAME || NamingConfig::PROTECTED_PARENT_NAMES.contains(&name)
}

/// Applies predictions and naming exceptions to a node batch.
pub struct Renamer<'a> {
    host: &'a dyn DocumentHost,
    cache: Option<&'a PredictionCache>,
    images: Option<&'a HashMap<NodeId, Vec<u8>>>,
}

impl<'a> Renamer<'a> {
    pub fn new(host: &'a dyn DocumentHost) -> Self {
        Self {
            host,
            cache: None,
            images: None,
        }
    }

    /// Persist every matched prediction to `cache`.
    pub fn persist_to(mut self, cache: &'a PredictionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Rendered images by node; persisted predictions get an image slot.
    pub fn with_images(mut self, images: &'a HashMap<NodeId, Vec<u8>>) -> Self {
        self.images = Some(images);
        self
    }

    /// Rename `nodes` in order.
    pub async fn apply(
        &self,
        nodes: &[NodeSnapshot],
        predictions: &[PredictionResult],
    ) -> Result<RenameReport> {
        let by_id: HashMap<&NodeId, &PredictionResult> =
            predictions.iter().map(|p| (&p.node_id, p)).collect();
        let mut report = RenameReport::default();

        for node in nodes {
            report.nodes += 1;
            let Some(current) = self.host.node(&node.id) else {
                warn!("Node {} disappeared before renaming", node.id);
                report.missing += 1;
                continue;
            };

            self.host
                .set_name(&current.id, NamingConfig::PLACEHOLDER_NAME)?;
            let mut name = NamingConfig::PLACEHOLDER_NAME.to_string();

            if let Some(prediction) = by_id.get(&current.id) {
                name = prediction.prediction.clone();
                self.host.set_name(&current.id, &name)?;
                report.labeled += 1;

                if let Some(cache) = self.cache {
                    self.persist(cache, prediction).await?;
                    report.persisted += 1;
                }
            }

            if is_image_rectangle(&current) {
                debug!("{} has an image fill, naming it {}", current.id, NamingConfig::IMAGE_NAME);
                name = NamingConfig::IMAGE_NAME.to_string();
                self.host.set_name(&current.id, &name)?;
                report.image_overrides += 1;
            }

            if current.node_type.is_container() && self.holds_only_text(&current.id) {
                name = NamingConfig::PARAGRAPH_CONTAINER_NAME.to_string();
                self.host.set_name(&current.id, &name)?;
                report.paragraph_overrides += 1;
            }

            if self.rename_parent(&current, &name)? {
                report.parent_renames += 1;
            }
        }

        debug!("Rename pass finished: {:?}", report);
        Ok(report)
    }

    async fn persist(&self, cache: &PredictionCache, prediction: &PredictionResult) -> Result<()> {
        let mut record = prediction.clone();
        if let Some(bytes) = self.images.and_then(|images| images.get(&prediction.node_id)) {
            record.pixel_image_slot = Some(cache.slots().allocate(self.host, bytes).await?);
        }
        cache.put_prediction(&record).await
    }

    /// More than one descendant, all of them text.
    fn holds_only_text(&self, id: &NodeId) -> bool {
        let all = descendants(self.host, id);
        all.len() > 1
            && all.iter().all(|d| {
                self.host
                    .node(d)
                    .is_some_and(|node| node.node_type.is_text())
            })
    }

    /// Give the parent a "<name> container" name when it shares `name`.
    fn rename_parent(&self, node: &NodeSnapshot, name: &str) -> Result<bool> {
        let Some(parent) = node.parent.as_ref().and_then(|id| self.host.node(id)) else {
            return Ok(false);
        };
        if parent.name != name || is_protected(name) {
            return Ok(false);
        }

        let parent_name = format!("{}{}", name, NamingConfig::CONTAINER_SUFFIX);
        debug!("Parent {} shares '{}', renaming to '{}'", parent.id, name, parent_name);
        self.host.set_name(&parent.id, &parent_name)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MemoryDocument, Paint};
    use crate::store::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn name_of(doc: &MemoryDocument, id: &NodeId) -> String {
        doc.node(id).unwrap().name
    }

    fn snapshots(doc: &MemoryDocument, ids: &[&NodeId]) -> Vec<NodeSnapshot> {
        ids.iter().map(|id| doc.node(id).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_prediction_applied_and_unmatched_reset() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let a = doc.add_node(&page, NodeType::Ellipse, "Old A", 10.0, 10.0).unwrap();
        let b = doc.add_node(&page, NodeType::Ellipse, "Old B", 10.0, 10.0).unwrap();

        let report = Renamer::new(&doc)
            .apply(
                &snapshots(&doc, &[&a, &b]),
                &[PredictionResult::new(a.clone(), "Avatar")],
            )
            .await
            .unwrap();

        assert_eq!(name_of(&doc, &a), "Avatar");
        assert_eq!(name_of(&doc, &b), NamingConfig::PLACEHOLDER_NAME);
        assert_eq!(report.labeled, 1);
    }

    #[tokio::test]
    async fn test_image_fill_overrides_prediction() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let rect = doc.add_node(&page, NodeType::Rectangle, "R", 40.0, 40.0).unwrap();
        doc.set_fills(
            &rect,
            vec![Paint::Image {
                image_hash: "h".into(),
            }],
        )
        .unwrap();

        let report = Renamer::new(&doc)
            .apply(
                &snapshots(&doc, &[&rect]),
                &[PredictionResult::new(rect.clone(), "Button")],
            )
            .await
            .unwrap();

        assert_eq!(name_of(&doc, &rect), "Image");
        assert_eq!(report.image_overrides, 1);
    }

    #[tokio::test]
    async fn test_image_fill_must_be_first() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let rect = doc.add_node(&page, NodeType::Rectangle, "R", 40.0, 40.0).unwrap();
        doc.set_fills(
            &rect,
            vec![
                Paint::Solid { color: [0, 0, 0] },
                Paint::Image {
                    image_hash: "h".into(),
                },
            ],
        )
        .unwrap();

        Renamer::new(&doc)
            .apply(
                &snapshots(&doc, &[&rect]),
                &[PredictionResult::new(rect.clone(), "Button")],
            )
            .await
            .unwrap();
        assert_eq!(name_of(&doc, &rect), "Button");
    }

    #[tokio::test]
    async fn test_text_only_container_becomes_paragraph() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let frame = doc.add_node(&page, NodeType::Frame, "F", 100.0, 60.0).unwrap();
        doc.add_node(&frame, NodeType::Text, "Line 1", 100.0, 20.0).unwrap();
        doc.add_node(&frame, NodeType::Text, "Line 2", 100.0, 20.0).unwrap();
        let single = doc.add_node(&page, NodeType::Group, "G", 100.0, 20.0).unwrap();
        doc.add_node(&single, NodeType::Text, "Only", 100.0, 20.0).unwrap();

        Renamer::new(&doc)
            .apply(
                &snapshots(&doc, &[&frame, &single]),
                &[
                    PredictionResult::new(frame.clone(), "Card"),
                    PredictionResult::new(single.clone(), "Label"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(name_of(&doc, &frame), "Paragraph container");
        assert_eq!(name_of(&doc, &single), "Label");
    }

    #[tokio::test]
    async fn test_parent_with_same_name_becomes_container() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let parent = doc.add_node(&page, NodeType::Frame, "P", 200.0, 200.0).unwrap();
        let child = doc.add_node(&parent, NodeType::Ellipse, "C", 10.0, 10.0).unwrap();

        let report = Renamer::new(&doc)
            .apply(
                &snapshots(&doc, &[&parent, &child]),
                &[
                    PredictionResult::new(parent.clone(), "Button"),
                    PredictionResult::new(child.clone(), "Button"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(name_of(&doc, &parent), "Button container");
        assert_eq!(name_of(&doc, &child), "Button");
        assert_eq!(report.parent_renames, 1);
    }

    #[tokio::test]
    async fn test_protected_parent_name_is_kept() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let parent = doc.add_node(&page, NodeType::Frame, "P", 200.0, 200.0).unwrap();
        let child = doc.add_node(&parent, NodeType::Ellipse, "C", 10.0, 10.0).unwrap();

        Renamer::new(&doc)
            .apply(
                &snapshots(&doc, &[&parent, &child]),
                &[
                    PredictionResult::new(parent.clone(), "Card"),
                    PredictionResult::new(child.clone(), "Card"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(name_of(&doc, &parent), "Card");
    }

    #[tokio::test]
    async fn test_unlabeled_parent_and_child_both_keep_placeholder() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let parent = doc.add_node(&page, NodeType::Frame, "P", 200.0, 200.0).unwrap();
        let child = doc.add_node(&parent, NodeType::Ellipse, "C", 10.0, 10.0).unwrap();

        let report = Renamer::new(&doc)
            .apply(&snapshots(&doc, &[&parent, &child]), &[])
            .await
            .unwrap();

        assert_eq!(name_of(&doc, &parent), NamingConfig::PLACEHOLDER_NAME);
        assert_eq!(name_of(&doc, &child), NamingConfig::PLACEHOLDER_NAME);
        assert_eq!(report.parent_renames, 0);
    }

    #[tokio::test]
    async fn test_second_pass_gives_identical_names() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let parent = doc.add_node(&page, NodeType::Frame, "P", 200.0, 200.0).unwrap();
        let child = doc.add_node(&parent, NodeType::Ellipse, "C", 10.0, 10.0).unwrap();
        let other = doc.add_node(&parent, NodeType::Rectangle, "O", 10.0, 10.0).unwrap();
        let batch = snapshots(&doc, &[&parent, &child, &other]);
        let predictions = vec![
            PredictionResult::new(parent.clone(), "Toggle"),
            PredictionResult::new(child.clone(), "Toggle"),
        ];

        let renamer = Renamer::new(&doc);
        renamer.apply(&batch, &predictions).await.unwrap();
        let first: Vec<String> = [&parent, &child, &other].iter().map(|id| name_of(&doc, id)).collect();
        renamer.apply(&batch, &predictions).await.unwrap();
        let second: Vec<String> = [&parent, &child, &other].iter().map(|id| name_of(&doc, id)).collect();

        assert_eq!(first, second);
        assert_eq!(first, vec!["Toggle container", "Toggle", "Layer"]);
    }

    #[tokio::test]
    async fn test_persist_with_image_slot() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let node = doc.add_node(&page, NodeType::Ellipse, "E", 10.0, 10.0).unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = PredictionCache::new(store.clone(), "doc");
        let images: HashMap<NodeId, Vec<u8>> = [(node.clone(), vec![1, 2, 3])].into_iter().collect();

        let report = Renamer::new(&doc)
            .persist_to(&cache)
            .with_images(&images)
            .apply(
                &snapshots(&doc, &[&node]),
                &[PredictionResult::new(node.clone(), "Badge")],
            )
            .await
            .unwrap();

        let stored = cache.prediction(&node).await.unwrap().unwrap();
        assert_eq!(report.persisted, 1);
        assert_eq!(stored.prediction, "Badge");
        assert_eq!(stored.pixel_image_slot.unwrap().index, 0);
        assert_eq!(store.get("imageIndex").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_missing_node_is_counted_not_fatal() {
        let doc = MemoryDocument::new("Doc");
        let page = doc.current_page();
        let gone = doc.add_node(&page, NodeType::Ellipse, "E", 10.0, 10.0).unwrap();
        let kept = doc.add_node(&page, NodeType::Ellipse, "K", 10.0, 10.0).unwrap();
        let batch = snapshots(&doc, &[&gone, &kept]);
        doc.remove(&gone).unwrap();

        let report = Renamer::new(&doc)
            .apply(&batch, &[PredictionResult::new(kept.clone(), "Dot")])
            .await
            .unwrap();

        assert_eq!(report.missing, 1);
        assert_eq!(name_of(&doc, &kept), "Dot");
    }
}
