//! Job request and response shapes.
//!
//! A job arrives as `{"id": "...", "input": {"workflow": "...", "payload": {...}}}`
//! and leaves as either `{"images": [...]}` or `{"error": "..."}`, with an
//! optional `refresh_worker: true` asking the host to recycle this process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::workflow::WorkflowKind;

/// Top-level input keys accepted by [`JobInput::validate`].
const INPUT_KEYS: &[&str] = &["workflow", "payload"];

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One job handed to the worker by the outer runtime.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobRequest {
    pub id: String,
    /// Raw input document, checked by [`JobInput::validate`].
    #[serde(default)]
    pub input: Value,
}

/// A job input that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInput {
    pub workflow: WorkflowKind,
    pub payload: Value,
}

impl JobInput {
    /// Check a raw input document against the input schema.
    ///
    /// Returns an empty `Vec` if valid; otherwise returns a list of
    /// human-readable errors.
    pub fn validate(input: &Value) -> Vec<String> {
        let Some(obj) = input.as_object() else {
            return vec!["input must be a JSON object".to_string()];
        };

        let mut errors = Vec::new();

        for key in obj.keys() {
            if !INPUT_KEYS.contains(&key.as_str()) {
                errors.push(format!("'{key}' is not a valid input option"));
            }
        }

        match obj.get("workflow") {
            None | Some(Value::Null) => {}
            Some(Value::String(name)) => {
                if let Err(CoreError::Validation(msg)) = name.parse::<WorkflowKind>() {
                    errors.push(msg);
                }
            }
            Some(_) => errors.push("workflow must be a string".to_string()),
        }

        match obj.get("payload") {
            None | Some(Value::Null) => errors.push("payload is a required input".to_string()),
            Some(Value::Object(_)) => {}
            Some(_) => errors.push("payload must be a JSON object".to_string()),
        }

        errors
    }

    /// Validate a raw input document and extract the typed input.
    ///
    /// All errors are joined into a single [`CoreError::Validation`].
    pub fn parse(input: &Value) -> Result<Self, CoreError> {
        let errors = Self::validate(input);
        if !errors.is_empty() {
            return Err(CoreError::Validation(errors.join("; ")));
        }

        let workflow = match input.get("workflow").and_then(Value::as_str) {
            Some(name) => name.parse()?,
            None => WorkflowKind::default(),
        };
        let payload = input.get("payload").cloned().unwrap_or(Value::Null);

        Ok(Self { workflow, payload })
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// One encoded output image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    /// Backend storage type (`output`, `temp`, ...).
    #[serde(rename = "type")]
    pub image_type: String,
    /// Base64-encoded file contents.
    pub data: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The result returned to the outer runtime for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResponse {
    Success {
        images: Vec<OutputImage>,
        #[serde(default, skip_serializing_if = "is_false")]
        refresh_worker: bool,
    },
    Failure {
        error: String,
        #[serde(default, skip_serializing_if = "is_false")]
        refresh_worker: bool,
    },
}

impl JobResponse {
    pub fn success(images: Vec<OutputImage>) -> Self {
        Self::Success {
            images,
            refresh_worker: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            refresh_worker: false,
        }
    }

    /// Mark the response so the host discards this worker after replying.
    pub fn with_refresh(mut self) -> Self {
        match &mut self {
            Self::Success { refresh_worker, .. } | Self::Failure { refresh_worker, .. } => {
                *refresh_worker = true;
            }
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn refresh_worker(&self) -> bool {
        match self {
            Self::Success { refresh_worker, .. } | Self::Failure { refresh_worker, .. } => {
                *refresh_worker
            }
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error, .. } => Some(error),
            Self::Success { .. } => None,
        }
    }

    pub fn images(&self) -> &[OutputImage] {
        match self {
            Self::Success { images, .. } => images,
            Self::Failure { .. } => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_custom_workflow_input() {
        let input = json!({
            "workflow": "custom",
            "payload": {
                "3": { "class_type": "KSampler", "inputs": { "seed": 12345 } },
                "9": { "class_type": "SaveImage", "inputs": { "filename_prefix": "test" } }
            }
        });
        assert!(JobInput::validate(&input).is_empty());
        assert_eq!(JobInput::parse(&input).unwrap().workflow, WorkflowKind::Custom);
    }

    #[test]
    fn valid_txt2img_workflow_input() {
        let input = json!({ "workflow": "txt2img", "payload": { "prompt": "test" } });
        assert!(JobInput::validate(&input).is_empty());
    }

    #[test]
    fn invalid_workflow_name() {
        let input = json!({ "workflow": "invalid_workflow", "payload": {} });
        let errors = JobInput::validate(&input);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("invalid_workflow"));
    }

    #[test]
    fn missing_payload() {
        let errors = JobInput::validate(&json!({ "workflow": "custom" }));
        assert_eq!(errors, vec!["payload is a required input".to_string()]);
    }

    #[test]
    fn default_workflow_is_txt2img() {
        let parsed = JobInput::parse(&json!({ "payload": { "prompt": "test" } })).unwrap();
        assert_eq!(parsed.workflow, WorkflowKind::Txt2Img);
        assert_eq!(parsed.payload["prompt"], "test");
    }

    #[test]
    fn unknown_input_keys_are_rejected() {
        let errors = JobInput::validate(&json!({ "payload": {}, "webhook": "x" }));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("webhook"));
    }

    #[test]
    fn wrong_types_are_rejected() {
        let errors = JobInput::validate(&json!({ "workflow": 5, "payload": "text" }));
        assert_eq!(errors.len(), 2);
        assert!(JobInput::validate(&json!("not an object"))[0].contains("object"));
    }

    #[test]
    fn parse_joins_all_errors() {
        let err = JobInput::parse(&json!({ "workflow": "nope", "extra": 1 })).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nope"));
        assert!(msg.contains("extra"));
        assert!(msg.contains("payload is a required input"));
    }

    #[test]
    fn request_without_input_defaults_to_null() {
        let request: JobRequest = serde_json::from_value(json!({ "id": "job-1" })).unwrap();
        assert!(request.input.is_null());
        assert_eq!(JobInput::validate(&request.input).len(), 1);
    }

    #[test]
    fn success_response_omits_refresh_flag() {
        let response = JobResponse::success(vec![OutputImage {
            filename: "a.png".into(),
            image_type: "output".into(),
            data: "AAAA".into(),
        }]);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            json!({ "images": [{ "filename": "a.png", "type": "output", "data": "AAAA" }] })
        );
    }

    #[test]
    fn refreshed_failure_serializes_flag() {
        let response = JobResponse::failure("boom").with_refresh();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, json!({ "error": "boom", "refresh_worker": true }));
        assert!(response.refresh_worker());
        assert_eq!(response.error(), Some("boom"));
        assert!(response.images().is_empty());
    }
}
