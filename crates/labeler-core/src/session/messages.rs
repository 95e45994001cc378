//! View channel messages.

use crate::cache::{CacheEntry, PredictionResult, ResetReport};
use crate::document::NodeId;
use crate::error::LabelerError;
use crate::export::{ExportFailure, RenderedImage};
use crate::naming::RenameReport;
use serde::{Deserialize, Serialize};

/// Inbound messages from the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewMessage {
    StartClassification,
    DeliverResults {
        predictions: Vec<PredictionResult>,
        /// Round from the matching `processing_request`. When omitted, the
        /// newest pending round that exported every predicted node is used.
        #[serde(default)]
        round: Option<u64>,
    },
    Close,
    Init,
    ResetSettings,
    UpdateSettings {
        url: String,
    },
    BulkReset {
        #[serde(default, rename = "keepSettings")]
        keep_settings: bool,
    },
    RequestExportList,
    RequestDiagnosticDump,
    RecordDeepLink {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        /// Candidate labels, best first.
        ranked: Vec<String>,
    },
    UpdateDesignSystemUrl {
        url: String,
    },
}

impl ViewMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ViewMessage::StartClassification => "start_classification",
            ViewMessage::DeliverResults { .. } => "deliver_results",
            ViewMessage::Close => "close",
            ViewMessage::Init => "init",
            ViewMessage::ResetSettings => "reset_settings",
            ViewMessage::UpdateSettings { .. } => "update_settings",
            ViewMessage::BulkReset { .. } => "bulk_reset",
            ViewMessage::RequestExportList => "request_export_list",
            ViewMessage::RequestDiagnosticDump => "request_diagnostic_dump",
            ViewMessage::RecordDeepLink { .. } => "record_deep_link",
            ViewMessage::UpdateDesignSystemUrl { .. } => "update_design_system_url",
        }
    }
}

/// Outbound messages to the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    EmptySelection,
    ProcessingRequest {
        images: Vec<RenderedImage>,
        filename: String,
        #[serde(rename = "modelUrl")]
        model_url: String,
        round: u64,
    },
    ExportFailed {
        failures: Vec<ExportFailure>,
    },
    SettingsValue {
        #[serde(rename = "modelUrl")]
        model_url: String,
        #[serde(rename = "designSystemUrl")]
        design_system_url: Option<String>,
    },
    DownloadList {
        predictions: Vec<CacheEntry>,
        filename: String,
    },
    SelectionDetail {
        detail: Option<PredictionResult>,
        /// Stored text when the record could not be decoded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
    #[serde(rename = "rename_report")]
    Renamed(RenameReport),
    #[serde(rename = "reset_report")]
    Reset(ResetReport),
    DiagnosticDump {
        entries: Vec<CacheEntry>,
    },
    Closed,
    Error {
        code: i32,
        message: String,
    },
}

impl HostMessage {
    pub fn error(err: &LabelerError) -> Self {
        HostMessage::Error {
            code: err.to_rpc_error_code(),
            message: err.to_string(),
        }
    }
}
