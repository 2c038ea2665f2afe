use thiserror::Error;

#[derive(Debug, Error)]
pub enum PodwireError {
    // Graph errors
    #[error("Pod not found: {0}")]
    PodNotFound(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Invalid canvas: {0}")]
    InvalidCanvas(String),

    #[error("Graph store error: {0}")]
    GraphStore(String),

    // Collaborator errors
    #[error("Pod run failed: {pod}: {message}")]
    PodRun { pod: String, message: String },

    #[error("Approval request failed for source {source_pod}: {message}")]
    Approval { source_pod: String, message: String },

    #[error("Run cleanup failed: {0}")]
    Cleanup(String),

    #[error("Summarizer failed: {0}")]
    Summarizer(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PodwireError>;
