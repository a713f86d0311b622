//! Workflow template loading and payload construction.

use std::path::PathBuf;

use serde_json::Value;
use snap_core::error::CoreError;
use snap_core::workflow::{ParameterOverlay, WorkflowDocument, WorkflowKind};

/// Reads `<name>.json` workflow templates from a directory.
///
/// Templates are read from disk on every call so an edited file takes
/// effect on the next job without a restart.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Load the named template.
    pub fn load(&self, name: &str) -> Result<WorkflowDocument, CoreError> {
        let path = self.path_for(name);
        let contents = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::TemplateNotFound(path.display().to_string()),
            _ => CoreError::Template {
                name: name.to_string(),
                reason: e.to_string(),
            },
        })?;

        let value: Value = serde_json::from_str(&contents).map_err(|e| CoreError::Template {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        WorkflowDocument::from_value(value).map_err(|e| CoreError::Template {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Build the document submitted to ComfyUI for one job.
    ///
    /// `txt2img` and `img2img` start from their template with the payload
    /// overlaid; `custom` uses the payload itself as the document. Every
    /// `SaveImage` node then gets a fresh filename prefix.
    pub fn build_payload(
        &self,
        kind: WorkflowKind,
        payload: &Value,
    ) -> Result<WorkflowDocument, CoreError> {
        let mut document = match kind.template_name() {
            Some(name) => {
                let mut document = self.load(name)?;
                let overlay = ParameterOverlay::from_payload(payload)?;
                let written = overlay.apply(kind, &mut document);
                tracing::debug!(workflow = %kind, written, "Applied parameter overlay");
                document
            }
            None => WorkflowDocument::from_value(payload.clone())?,
        };

        let prefixes = document.assign_unique_prefixes();
        tracing::debug!(
            workflow = %kind,
            nodes = document.len(),
            save_nodes = prefixes,
            "Workflow payload built",
        );
        Ok(document)
    }
}
