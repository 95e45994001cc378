//! Classifier boundary.
//!
//! The classifier is an external service: it receives rendered images and
//! answers with one label per node. No retries happen here; a failed call is
//! reported to the caller as is.

use crate::cache::PredictionResult;
use crate::config::ClassifierConfig;
use crate::document::NodeId;
use crate::error::{LabelerError, Result};
use crate::export::RenderedImage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Something that can label rendered images.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        model_url: &str,
        images: &[RenderedImage],
    ) -> Result<Vec<PredictionResult>>;
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    images: &'a [RenderedImage],
}

/// One entry of the classifier's answer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassifiedNode {
    node_id: NodeId,
    prediction: String,
    #[serde(default, deserialize_with = "probability_text")]
    probability: Option<String>,
}

/// Accept the probability as either a number or a string.
fn probability_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl From<ClassifiedNode> for PredictionResult {
    fn from(node: ClassifiedNode) -> Self {
        PredictionResult {
            node_id: node.node_id,
            prediction: node.prediction,
            probability: node.probability,
            pixel_image_slot: None,
            url: None,
        }
    }
}

fn decode_response(body: &str) -> Result<Vec<PredictionResult>> {
    let nodes: Vec<ClassifiedNode> = serde_json::from_str(body)?;
    Ok(nodes.into_iter().map(PredictionResult::from).collect())
}

/// Classifier reached over HTTP with a JSON body.
pub struct HttpClassifier {
    client: Client,
}

impl HttpClassifier {
    pub fn new() -> Result<Self> {
        Self::with_timeout(ClassifierConfig::REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(ClassifierConfig::USER_AGENT)
            .build()
            .map_err(|e| LabelerError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        model_url: &str,
        images: &[RenderedImage],
    ) -> Result<Vec<PredictionResult>> {
        debug!("Sending {} images to {}", images.len(), model_url);

        let response = self
            .client
            .post(model_url)
            .json(&ClassifyRequest { images })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LabelerError::Network {
                message: format!("Classifier returned {}: {}", status, body),
                status_code: Some(status.as_u16()),
            });
        }

        let predictions = decode_response(&body)?;
        info!("Classifier labeled {} of {} images", predictions.len(), images.len());
        Ok(predictions)
    }
}
