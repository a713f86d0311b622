//! Typed ComfyUI history entries.
//!
//! `GET /history/{prompt_id}` returns, per prompt:
//!
//! ```json
//! {
//!   "status": { "status_str": "success", "completed": true,
//!               "messages": [["execution_start", {...}], ...] },
//!   "outputs": { "9": { "images": [{ "filename": "x.png", "subfolder": "", "type": "output" }] } }
//! }
//! ```
//!
//! Every field defaults when missing so partially written entries still
//! parse.

use indexmap::IndexMap;
use serde::Deserialize;

/// `status_str` reported for a failed execution.
pub const STATUS_ERROR: &str = "error";

/// Status message tag carrying the failure details.
pub const EXECUTION_ERROR_TAG: &str = "execution_error";

/// Image storage type for scratch files ComfyUI does not keep.
pub const IMAGE_TYPE_TEMP: &str = "temp";

/// Message used when an execution error carries no usable details.
pub const GENERIC_EXECUTION_ERROR: &str = "Workflow execution failed";

/// One prompt's entry in the ComfyUI history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: HistoryStatus,
    /// Node outputs in the order ComfyUI reports them.
    #[serde(default)]
    pub outputs: IndexMap<String, NodeOutput>,
}

/// Execution status block of a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub messages: Vec<StatusMessage>,
}

/// A `[tag, details]` pair from the status message log.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusMessage(pub String, pub serde_json::Value);

/// Output produced by one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    /// Absent for nodes that produce no images.
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Reference to an image file written by ComfyUI.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage type: `output`, `temp`, or `input`.
    #[serde(rename = "type", default)]
    pub image_type: String,
}

impl ImageRef {
    pub fn is_temp(&self) -> bool {
        self.image_type == IMAGE_TYPE_TEMP
    }
}

/// Details of an `execution_error` status message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionErrorData {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_message: Option<String>,
    #[serde(default)]
    pub exception_type: Option<String>,
}

/// Where a prompt stands according to its history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Pending,
    Succeeded,
    Failed,
}

impl HistoryEntry {
    /// Classify the entry. An error status wins over `completed`.
    pub fn outcome(&self) -> JobOutcome {
        if self.status.status_str == STATUS_ERROR {
            JobOutcome::Failed
        } else if self.status.completed {
            JobOutcome::Succeeded
        } else {
            JobOutcome::Pending
        }
    }

    /// Details of the first `execution_error` message, if any.
    pub fn execution_error(&self) -> Option<ExecutionErrorData> {
        self.status
            .messages
            .iter()
            .find(|StatusMessage(tag, _)| tag == EXECUTION_ERROR_TAG)
            .map(|StatusMessage(_, details)| {
                serde_json::from_value(details.clone()).unwrap_or_default()
            })
    }

    /// Human-readable description of why execution failed.
    pub fn error_message(&self) -> String {
        let Some(data) = self.execution_error() else {
            return GENERIC_EXECUTION_ERROR.to_string();
        };
        match (data.node_type, data.exception_message) {
            (Some(node_type), Some(message)) => match data.node_id {
                Some(node_id) => format!("{node_type} (node {node_id}): {message}"),
                None => format!("{node_type}: {message}"),
            },
            _ => GENERIC_EXECUTION_ERROR.to_string(),
        }
    }

    /// Every image reference across all nodes, in document order.
    pub fn images(&self) -> impl Iterator<Item = &ImageRef> {
        self.outputs.values().flat_map(|output| output.images.iter())
    }
}
