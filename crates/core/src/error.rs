#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Workflow template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid workflow template '{name}': {reason}")]
    Template { name: String, reason: String },
}
