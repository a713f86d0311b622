//! ComfyUI workflow documents and the parameter overlay.
//!
//! A workflow in ComfyUI's API format is an object where each key is a
//! node ID and each value is an object with `class_type` and `inputs`:
//!
//! ```json
//! {
//!   "3": { "class_type": "KSampler", "inputs": { "seed": 42, "cfg": 7.5 } },
//!   "9": { "class_type": "SaveImage", "inputs": { "filename_prefix": "out" } }
//! }
//! ```
//!
//! [`WorkflowDocument`] keeps node insertion order so the document we
//! submit (and the outputs the backend reports back) line up with the
//! template on disk.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Workflow kinds
// ---------------------------------------------------------------------------

/// Node class type whose `filename_prefix` is rewritten before submission.
pub const SAVE_IMAGE_CLASS: &str = "SaveImage";

/// Input key holding the output filename prefix on save nodes.
const FILENAME_PREFIX_INPUT: &str = "filename_prefix";

/// The closed set of workflows a job may request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WorkflowKind {
    #[default]
    Txt2Img,
    Img2Img,
    /// The caller supplies the whole workflow document.
    Custom,
}

impl WorkflowKind {
    /// Every accepted workflow, in the order shown in validation errors.
    pub const ALL: [WorkflowKind; 3] = [Self::Txt2Img, Self::Img2Img, Self::Custom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Txt2Img => "txt2img",
            Self::Img2Img => "img2img",
            Self::Custom => "custom",
        }
    }

    /// Name of the template file backing this workflow, if any.
    ///
    /// `Custom` has no template: the job payload is the workflow.
    pub fn template_name(&self) -> Option<&'static str> {
        match self {
            Self::Txt2Img | Self::Img2Img => Some(self.as_str()),
            Self::Custom => None,
        }
    }

    /// Comma-separated list of accepted names, for error messages.
    pub fn allowed_names() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "workflow '{s}' is not one of: {}",
                    Self::allowed_names()
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

/// A single node in a workflow document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// ComfyUI class type (e.g. "KSampler", "SaveImage").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_type: Option<String>,
    /// Input values and node connections, keyed by input name.
    ///
    /// Kept as raw JSON so a node is re-encoded exactly as received: an
    /// absent field stays absent and an explicit `null` stays `null`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub inputs: Option<Value>,
    /// Any other node fields (`_meta`, etc.), passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Distinguish `"inputs": null` (present) from a missing field.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl WorkflowNode {
    pub fn class_type(&self) -> Option<&str> {
        self.class_type.as_deref()
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.as_ref()?.get(key)
    }

    /// Set one input. Missing or non-object `inputs` are replaced by an
    /// object holding just this key.
    pub fn set_input(&mut self, key: &str, value: Value) {
        let inputs = self
            .inputs
            .get_or_insert_with(|| Value::Object(Map::new()));
        if !inputs.is_object() {
            *inputs = Value::Object(Map::new());
        }
        if let Some(map) = inputs.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    pub fn is_save_image(&self) -> bool {
        self.class_type() == Some(SAVE_IMAGE_CLASS)
    }
}

/// An ordered map of node ID to node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowDocument {
    nodes: IndexMap<String, WorkflowNode>,
}

impl WorkflowDocument {
    /// Interpret a JSON value as a workflow document.
    ///
    /// The value must be an object whose values are node objects.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        if !value.is_object() {
            return Err(CoreError::Validation(
                "Workflow must be a JSON object keyed by node ID".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| CoreError::Validation(format!("Workflow is not a valid node map: {e}")))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    /// Iterate over `(node_id, node)` pairs in document order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Set one input on one node, creating the node if the template
    /// does not define it.
    pub fn set_input(&mut self, node_id: &str, key: &str, value: Value) {
        if !self.nodes.contains_key(node_id) {
            tracing::warn!(node_id, key, "Overlay target node missing from template, creating it");
        }
        self.nodes
            .entry(node_id.to_string())
            .or_default()
            .set_input(key, value);
    }

    /// Replace the filename prefix of every `SaveImage` node with a fresh
    /// UUID so concurrent jobs on one backend never share output names.
    ///
    /// Returns the number of nodes rewritten.
    pub fn assign_unique_prefixes(&mut self) -> usize {
        let mut rewritten = 0;
        for node in self.nodes.values_mut().filter(|n| n.is_save_image()) {
            node.set_input(
                FILENAME_PREFIX_INPUT,
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
            rewritten += 1;
        }
        rewritten
    }
}

// ---------------------------------------------------------------------------
// Parameter overlay
// ---------------------------------------------------------------------------

/// Caller-supplied parameters for the first-class workflows.
///
/// Values are raw JSON and copied into the template as given. Absent
/// (or `null`) fields leave the template value in place; unknown payload
/// keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParameterOverlay {
    pub seed: Option<Value>,
    pub steps: Option<Value>,
    pub cfg_scale: Option<Value>,
    pub sampler_name: Option<Value>,
    pub ckpt_name: Option<Value>,
    pub batch_size: Option<Value>,
    pub width: Option<Value>,
    pub height: Option<Value>,
    pub prompt: Option<Value>,
    pub negative_prompt: Option<Value>,
    pub scheduler: Option<Value>,
    pub denoise: Option<Value>,
}

/// One recognised overlay field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayField {
    Seed,
    Steps,
    CfgScale,
    SamplerName,
    CkptName,
    BatchSize,
    Width,
    Height,
    Prompt,
    NegativePrompt,
    Scheduler,
    Denoise,
}

/// Where an overlay field lands in a template: `(field, node_id, input)`.
pub type SlotTarget = (OverlayField, &'static str, &'static str);

const TXT2IMG_SLOTS: &[SlotTarget] = &[
    (OverlayField::Seed, "3", "seed"),
    (OverlayField::Steps, "3", "steps"),
    (OverlayField::CfgScale, "3", "cfg"),
    (OverlayField::SamplerName, "3", "sampler_name"),
    (OverlayField::Scheduler, "3", "scheduler"),
    (OverlayField::Denoise, "3", "denoise"),
    (OverlayField::CkptName, "4", "ckpt_name"),
    (OverlayField::BatchSize, "5", "batch_size"),
    (OverlayField::Width, "5", "width"),
    (OverlayField::Height, "5", "height"),
    (OverlayField::Prompt, "6", "text"),
    (OverlayField::NegativePrompt, "7", "text"),
];

const IMG2IMG_SLOTS: &[SlotTarget] = &[
    (OverlayField::Seed, "13", "seed"),
    (OverlayField::Steps, "13", "steps"),
    (OverlayField::CfgScale, "13", "cfg"),
    (OverlayField::SamplerName, "13", "sampler_name"),
    (OverlayField::Scheduler, "13", "scheduler"),
    (OverlayField::Denoise, "13", "denoise"),
    (OverlayField::CkptName, "1", "ckpt_name"),
    (OverlayField::Width, "2", "width"),
    (OverlayField::Height, "2", "height"),
    (OverlayField::Width, "2", "target_width"),
    (OverlayField::Height, "2", "target_height"),
    (OverlayField::Width, "4", "width"),
    (OverlayField::Height, "4", "height"),
    (OverlayField::Width, "4", "target_width"),
    (OverlayField::Height, "4", "target_height"),
    (OverlayField::Prompt, "6", "text"),
    (OverlayField::NegativePrompt, "7", "text"),
];

impl ParameterOverlay {
    /// Read the overlay fields out of a job payload.
    pub fn from_payload(payload: &Value) -> Result<Self, CoreError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| CoreError::Validation(format!("Invalid workflow parameters: {e}")))
    }

    pub fn get(&self, field: OverlayField) -> Option<&Value> {
        let value = match field {
            OverlayField::Seed => &self.seed,
            OverlayField::Steps => &self.steps,
            OverlayField::CfgScale => &self.cfg_scale,
            OverlayField::SamplerName => &self.sampler_name,
            OverlayField::CkptName => &self.ckpt_name,
            OverlayField::BatchSize => &self.batch_size,
            OverlayField::Width => &self.width,
            OverlayField::Height => &self.height,
            OverlayField::Prompt => &self.prompt,
            OverlayField::NegativePrompt => &self.negative_prompt,
            OverlayField::Scheduler => &self.scheduler,
            OverlayField::Denoise => &self.denoise,
        };
        value.as_ref()
    }

    /// Write every present field into its template slots.
    ///
    /// Returns the number of inputs written. `Custom` workflows have no
    /// slot map and are left untouched.
    pub fn apply(&self, kind: WorkflowKind, document: &mut WorkflowDocument) -> usize {
        let mut written = 0;
        for &(field, node_id, input) in slot_targets(kind) {
            if let Some(value) = self.get(field) {
                document.set_input(node_id, input, value.clone());
                written += 1;
            }
        }
        written
    }
}

/// Slot map for a workflow kind.
pub fn slot_targets(kind: WorkflowKind) -> &'static [SlotTarget] {
    match kind {
        WorkflowKind::Txt2Img => TXT2IMG_SLOTS,
        WorkflowKind::Img2Img => IMG2IMG_SLOTS,
        WorkflowKind::Custom => &[],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn txt2img_template() -> WorkflowDocument {
        WorkflowDocument::from_value(json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 1, "steps": 10, "cfg": 5.0, "sampler_name": "ddim",
                    "scheduler": "normal", "denoise": 1.0,
                    "model": ["4", 0], "positive": ["6", 0], "negative": ["7", 0],
                    "latent_image": ["5", 0]
                }
            },
            "4": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": "base.safetensors" } },
            "5": { "class_type": "EmptyLatentImage", "inputs": { "batch_size": 1, "width": 256, "height": 256 } },
            "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["4", 1] } },
            "7": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["4", 1] } },
            "8": { "class_type": "VAEDecode", "inputs": { "samples": ["3", 0], "vae": ["4", 2] } },
            "9": {
                "class_type": "SaveImage",
                "inputs": { "filename_prefix": "ComfyUI", "images": ["8", 0] },
                "_meta": { "title": "Save Image" }
            }
        }))
        .unwrap()
    }

    fn is_uuid_like(s: &str) -> bool {
        s.len() == 36 && s.matches('-').count() == 4
    }

    // -- WorkflowKind ---------------------------------------------------------

    #[test]
    fn parses_every_known_workflow() {
        assert_eq!("txt2img".parse::<WorkflowKind>().unwrap(), WorkflowKind::Txt2Img);
        assert_eq!("img2img".parse::<WorkflowKind>().unwrap(), WorkflowKind::Img2Img);
        assert_eq!("custom".parse::<WorkflowKind>().unwrap(), WorkflowKind::Custom);
    }

    #[test]
    fn unknown_workflow_is_validation_error() {
        let err = "invalid_workflow".parse::<WorkflowKind>().unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("txt2img, img2img, custom"));
    }

    #[test]
    fn default_workflow_is_txt2img() {
        assert_eq!(WorkflowKind::default(), WorkflowKind::Txt2Img);
    }

    #[test]
    fn custom_has_no_template() {
        assert_eq!(WorkflowKind::Custom.template_name(), None);
        assert_eq!(WorkflowKind::Img2Img.template_name(), Some("img2img"));
    }

    // -- Document model -------------------------------------------------------

    #[test]
    fn document_preserves_node_order() {
        let doc = WorkflowDocument::from_value(json!({
            "10": { "class_type": "A", "inputs": {} },
            "2": { "class_type": "B", "inputs": {} },
            "7": { "class_type": "C", "inputs": {} }
        }))
        .unwrap();
        let ids: Vec<&str> = doc.nodes().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["10", "2", "7"]);
    }

    #[test]
    fn document_round_trips_extra_fields() {
        let doc = txt2img_template();
        let value = doc.to_value();
        assert_eq!(value["9"]["_meta"]["title"], "Save Image");
        assert_eq!(value["3"]["inputs"]["model"], json!(["4", 0]));
    }

    #[test]
    fn nodes_round_trip_exactly() {
        let value = json!({
            "1": { "class_type": "Note", "_meta": { "title": "n" } },
            "2": { "class_type": "PrimitiveNode", "inputs": null, "widgets_values": [3] },
            "3": { "inputs": { "seed": 1 } }
        });
        let doc = WorkflowDocument::from_value(value.clone()).unwrap();
        assert_eq!(doc.to_value(), value);
        assert_eq!(doc.node("2").unwrap().input("seed"), None);
    }

    #[test]
    fn set_input_replaces_non_object_inputs() {
        let mut node: WorkflowNode =
            serde_json::from_value(json!({ "class_type": "SaveImage", "inputs": null })).unwrap();
        node.set_input("filename_prefix", json!("x"));
        assert_eq!(node.input("filename_prefix"), Some(&json!("x")));

        let mut node = WorkflowNode::default();
        node.set_input("text", json!("hi"));
        assert_eq!(serde_json::to_value(&node).unwrap(), json!({ "inputs": { "text": "hi" } }));
    }

    #[test]
    fn non_object_document_is_rejected() {
        assert!(WorkflowDocument::from_value(json!([1, 2, 3])).is_err());
        assert!(WorkflowDocument::from_value(json!({ "3": "not a node" })).is_err());
    }

    // -- Overlay --------------------------------------------------------------

    #[test]
    fn txt2img_overlay_sets_all_expected_fields() {
        let mut doc = WorkflowDocument::from_value(json!({
            "3": { "inputs": {} },
            "4": { "inputs": {} },
            "5": { "inputs": {} },
            "6": { "inputs": {} },
            "7": { "inputs": {} }
        }))
        .unwrap();
        let overlay = ParameterOverlay::from_payload(&json!({
            "seed": 12345,
            "steps": 20,
            "cfg_scale": 7.5,
            "sampler_name": "euler",
            "ckpt_name": "model.safetensors",
            "batch_size": 1,
            "width": 512,
            "height": 512,
            "prompt": "test prompt",
            "negative_prompt": "ugly"
        }))
        .unwrap();

        overlay.apply(WorkflowKind::Txt2Img, &mut doc);

        let input = |node: &str, key: &str| doc.node(node).unwrap().input(key).cloned();
        assert_eq!(input("3", "seed"), Some(json!(12345)));
        assert_eq!(input("3", "steps"), Some(json!(20)));
        assert_eq!(input("3", "cfg"), Some(json!(7.5)));
        assert_eq!(input("3", "sampler_name"), Some(json!("euler")));
        assert_eq!(input("4", "ckpt_name"), Some(json!("model.safetensors")));
        assert_eq!(input("5", "batch_size"), Some(json!(1)));
        assert_eq!(input("5", "width"), Some(json!(512)));
        assert_eq!(input("5", "height"), Some(json!(512)));
        assert_eq!(input("6", "text"), Some(json!("test prompt")));
        assert_eq!(input("7", "text"), Some(json!("ugly")));
    }

    #[test]
    fn overlay_touches_only_its_target() {
        let original = txt2img_template();
        let mut doc = original.clone();
        let overlay = ParameterOverlay {
            prompt: Some(json!("a cat")),
            ..Default::default()
        };

        assert_eq!(overlay.apply(WorkflowKind::Txt2Img, &mut doc), 1);

        let mut expected = original.to_value();
        expected["6"]["inputs"]["text"] = json!("a cat");
        assert_eq!(doc.to_value(), expected);
    }

    #[test]
    fn img2img_width_fans_out_to_resize_nodes() {
        let mut doc = WorkflowDocument::default();
        let overlay = ParameterOverlay {
            width: Some(json!(768)),
            ..Default::default()
        };

        assert_eq!(overlay.apply(WorkflowKind::Img2Img, &mut doc), 4);
        for (node, key) in [("2", "width"), ("2", "target_width"), ("4", "width"), ("4", "target_width")] {
            assert_eq!(doc.node(node).unwrap().input(key), Some(&json!(768)));
        }
    }

    #[test]
    fn overlay_copies_values_without_coercion() {
        let mut doc = txt2img_template();
        let overlay = ParameterOverlay {
            width: Some(json!("512")),
            ..Default::default()
        };
        overlay.apply(WorkflowKind::Txt2Img, &mut doc);
        assert_eq!(doc.node("5").unwrap().input("width"), Some(&json!("512")));
    }

    #[test]
    fn custom_overlay_is_a_no_op() {
        let original = txt2img_template();
        let mut doc = original.clone();
        let overlay = ParameterOverlay {
            seed: Some(json!(99)),
            ..Default::default()
        };
        assert_eq!(overlay.apply(WorkflowKind::Custom, &mut doc), 0);
        assert_eq!(doc, original);
    }

    #[test]
    fn null_overlay_values_are_ignored() {
        let overlay = ParameterOverlay::from_payload(&json!({ "seed": null, "unknown": 1 })).unwrap();
        assert_eq!(overlay, ParameterOverlay::default());
    }

    // -- Unique prefixes ------------------------------------------------------

    #[test]
    fn save_image_prefix_becomes_uuid() {
        let mut doc = txt2img_template();
        assert_eq!(doc.assign_unique_prefixes(), 1);

        let prefix = doc.node("9").unwrap().input("filename_prefix").unwrap();
        let prefix = prefix.as_str().unwrap();
        assert_ne!(prefix, "ComfyUI");
        assert!(is_uuid_like(prefix));
    }

    #[test]
    fn non_save_nodes_are_untouched() {
        let original = WorkflowDocument::from_value(json!({
            "3": { "class_type": "KSampler", "inputs": { "seed": 12345 } }
        }))
        .unwrap();
        let mut doc = original.clone();
        assert_eq!(doc.assign_unique_prefixes(), 0);
        assert_eq!(doc, original);
    }

    #[test]
    fn multiple_save_nodes_get_distinct_prefixes() {
        let mut doc = WorkflowDocument::from_value(json!({
            "9": { "class_type": "SaveImage", "inputs": { "filename_prefix": "first" } },
            "10": { "class_type": "SaveImage", "inputs": { "filename_prefix": "second" } },
            "11": { "class_type": "SaveImage", "inputs": {} }
        }))
        .unwrap();

        assert_eq!(doc.assign_unique_prefixes(), 3);

        let prefixes: Vec<String> = doc
            .nodes()
            .map(|(_, n)| n.input("filename_prefix").unwrap().as_str().unwrap().to_string())
            .collect();
        assert!(prefixes.iter().all(|p| is_uuid_like(p)));
        assert_ne!(prefixes[0], prefixes[1]);
        assert_ne!(prefixes[1], prefixes[2]);
        assert_ne!(prefixes[0], prefixes[2]);
    }
}
