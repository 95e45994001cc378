//! Per-document labeling session.
//!
//! A [`Session`] handles exactly one [`ViewMessage`] at a time through
//! `&mut self`; every await inside a handler completes before the next
//! message is looked at. [`SessionHandle`] runs a session on its own task and
//! queues messages for it.
//!
//! Each `processing_request` opens a numbered round. Results are applied to
//! the nodes of the round they belong to, so a late answer for an earlier
//! round never renames the nodes of a newer one. With a classifier attached
//! the session classifies inside the same handler and answers with the
//! rename report directly.

mod handle;
mod messages;

pub use handle::SessionHandle;
pub use messages::{HostMessage, ViewMessage};

use crate::cache::{PredictionCache, PredictionResult, StoredPrediction};
use crate::classifier::Classifier;
use crate::config::SessionOptions;
use crate::document::{DocumentHost, NodeId};
use crate::error::{LabelerError, Result};
use crate::export::Exporter;
use crate::naming::{to_resource_name, Renamer};
use crate::selection::Selector;
use crate::store::KeyValueStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rounds kept waiting for results; the oldest is dropped beyond this.
const MAX_PENDING_ROUNDS: usize = 8;

/// State carried from start-classification to deliver-results.
#[derive(Debug)]
struct PendingRound {
    selection: Vec<NodeId>,
    images: HashMap<NodeId, Vec<u8>>,
}

/// Read-only detail for the first selected node.
///
/// Touches neither the document nor any write-bearing key, so it can run
/// between queued messages.
pub async fn selection_detail(
    host: &dyn DocumentHost,
    cache: &PredictionCache,
) -> Result<HostMessage> {
    let stored = match host.selection().first() {
        Some(id) => cache.stored_prediction(id).await?,
        None => None,
    };
    let (detail, raw) = match stored {
        Some(StoredPrediction::Decoded(result)) => (Some(result), None),
        Some(StoredPrediction::Malformed(raw)) => (None, Some(raw)),
        None => (None, None),
    };
    Ok(HostMessage::SelectionDetail { detail, raw })
}

pub struct Session {
    host: Arc<dyn DocumentHost>,
    cache: PredictionCache,
    options: SessionOptions,
    classifier: Option<Arc<dyn Classifier>>,
    rounds: BTreeMap<u64, PendingRound>,
    next_round: u64,
    closed: bool,
}

impl Session {
    /// Open a session on the host's current document.
    pub fn new(
        host: Arc<dyn DocumentHost>,
        store: Arc<dyn KeyValueStore>,
        options: SessionOptions,
    ) -> Self {
        let filename = to_resource_name(&host.document_name());
        info!("Opening session for '{}'", filename);
        Self {
            cache: PredictionCache::new(store, filename),
            host,
            options,
            classifier: None,
            rounds: BTreeMap::new(),
            next_round: 1,
            closed: false,
        }
    }

    /// Classify inside `start_classification` instead of waiting for the view
    /// to deliver results.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn cache(&self) -> &PredictionCache {
        &self.cache
    }

    pub fn host(&self) -> &Arc<dyn DocumentHost> {
        &self.host
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle one message to completion.
    pub async fn handle(&mut self, message: ViewMessage) -> Result<Vec<HostMessage>> {
        if self.closed {
            return Err(LabelerError::SessionClosed);
        }
        debug!("Handling {}", message.kind());

        match message {
            ViewMessage::StartClassification => self.start_classification().await,
            ViewMessage::DeliverResults { predictions, round } => {
                self.deliver_results(round, predictions).await
            }
            ViewMessage::Close => {
                self.closed = true;
                self.rounds.clear();
                info!("Session for '{}' closed", self.cache.filename());
                Ok(vec![HostMessage::Closed])
            }
            ViewMessage::Init => Ok(vec![self.settings_value().await?]),
            ViewMessage::ResetSettings => {
                self.cache.reset_model_url().await?;
                Ok(vec![self.settings_value().await?])
            }
            ViewMessage::UpdateSettings { url } => {
                self.cache.set_model_url(&url).await?;
                Ok(vec![self.settings_value().await?])
            }
            ViewMessage::UpdateDesignSystemUrl { url } => {
                self.cache.set_design_system_url(&url).await?;
                Ok(vec![self.settings_value().await?])
            }
            ViewMessage::BulkReset { keep_settings } => {
                let report = self.cache.bulk_reset(keep_settings).await?;
                Ok(vec![HostMessage::Reset(report)])
            }
            ViewMessage::RequestExportList => Ok(vec![HostMessage::DownloadList {
                predictions: self.cache.export_list(self.host.as_ref()).await?,
                filename: self.cache.filename().to_string(),
            }]),
            ViewMessage::RequestDiagnosticDump => Ok(vec![HostMessage::DiagnosticDump {
                entries: self.cache.diagnostic_dump().await?,
            }]),
            ViewMessage::RecordDeepLink { node_id, ranked } => {
                let detail = self.cache.record_deep_link(&node_id, &ranked).await?;
                Ok(vec![HostMessage::SelectionDetail { detail, raw: None }])
            }
        }
    }

    async fn settings_value(&self) -> Result<HostMessage> {
        Ok(HostMessage::SettingsValue {
            model_url: self.cache.model_url().await?,
            design_system_url: self.cache.design_system_url().await?,
        })
    }

    /// Select, render and hand the images to the view for classification.
    async fn start_classification(&mut self) -> Result<Vec<HostMessage>> {
        let raw = self.host.selection();
        if raw.is_empty() {
            return Ok(vec![HostMessage::EmptySelection]);
        }

        let nodes = Selector::new(self.host.as_ref(), &self.options.export_exclusions)
            .top_level_only(self.options.top_level_only)
            .select(&raw)?;
        if nodes.is_empty() {
            debug!("Selection filtered down to nothing");
            return Ok(vec![HostMessage::EmptySelection]);
        }

        let batch = Exporter::new(self.host.as_ref(), self.options.export_format)
            .export(&nodes)
            .await;

        let mut messages = Vec::new();
        if !batch.failures.is_empty() {
            warn!("{} nodes could not be rendered", batch.failures.len());
            messages.push(HostMessage::ExportFailed {
                failures: batch.failures,
            });
        }

        if batch.images.is_empty() {
            return Ok(messages);
        }

        let round = self.open_round(PendingRound {
            selection: raw,
            images: batch
                .images
                .iter()
                .map(|image| (image.node_id.clone(), image.image_bytes.clone()))
                .collect(),
        });
        let model_url = self.cache.model_url().await?;
        let images = batch.images;

        let classified = match self.classifier.clone() {
            Some(classifier) => Some(classifier.classify(&model_url, &images).await),
            None => None,
        };

        info!(
            "Requesting classification of {} images (round {})",
            images.len(),
            round
        );
        messages.push(HostMessage::ProcessingRequest {
            images,
            filename: self.cache.filename().to_string(),
            model_url,
            round,
        });

        match classified {
            Some(Ok(predictions)) => {
                messages.extend(self.deliver_results(Some(round), predictions).await?);
            }
            Some(Err(e)) => {
                warn!("Classification of round {} failed: {}", round, e);
                self.rounds.remove(&round);
                messages.push(HostMessage::error(&e));
            }
            None => {}
        }
        Ok(messages)
    }

    fn open_round(&mut self, pending: PendingRound) -> u64 {
        let round = self.next_round;
        self.next_round += 1;
        self.rounds.insert(round, pending);

        while self.rounds.len() > MAX_PENDING_ROUNDS {
            if let Some((dropped, _)) = self.rounds.pop_first() {
                warn!("Round {} never received results, dropping it", dropped);
            }
        }
        round
    }

    /// Find the round a delivery belongs to and take it out of the pending set.
    ///
    /// `Ok(None)` means nothing is pending and the current selection is used.
    fn take_round(
        &mut self,
        round: Option<u64>,
        predictions: &[PredictionResult],
    ) -> Result<Option<PendingRound>> {
        if let Some(id) = round {
            return self
                .rounds
                .remove(&id)
                .map(Some)
                .ok_or_else(|| LabelerError::InvalidMessage {
                    message: format!("No classification round {} is waiting for results", id),
                });
        }
        if self.rounds.is_empty() {
            return Ok(None);
        }

        let matching = self
            .rounds
            .iter()
            .rev()
            .find(|(_, pending)| {
                predictions
                    .iter()
                    .all(|p| pending.images.contains_key(&p.node_id))
            })
            .map(|(id, _)| *id);

        match matching {
            Some(id) => Ok(self.rounds.remove(&id)),
            None => Err(LabelerError::InvalidMessage {
                message: "Results name nodes that no pending classification round exported"
                    .to_string(),
            }),
        }
    }

    /// Apply classifier results to the nodes of the pending round.
    async fn deliver_results(
        &mut self,
        round: Option<u64>,
        predictions: Vec<PredictionResult>,
    ) -> Result<Vec<HostMessage>> {
        let (raw, images) = match self.take_round(round, &predictions)? {
            Some(pending) => (pending.selection, pending.images),
            None => (self.host.selection(), HashMap::new()),
        };

        let nodes = Selector::new(self.host.as_ref(), &self.options.rename_exclusions)
            .top_level_only(self.options.top_level_only)
            .select(&raw)?;

        let mut renamer = Renamer::new(self.host.as_ref()).with_images(&images);
        if self.options.persist_predictions {
            renamer = renamer.persist_to(&self.cache);
        }
        let report = renamer.apply(&nodes, &predictions).await?;

        info!(
            "Applied {} predictions to {} nodes",
            report.labeled, report.nodes
        );
        Ok(vec![HostMessage::Renamed(report)])
    }
}
