//! Error types for the generate → compile → render pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PreviewError>;

/// Everything that can go wrong between a prompt and a rendered preview.
///
/// None of these are fatal: generation errors become notifications and
/// render errors are shown inside the preview surface.
#[derive(Error, Debug)]
pub enum PreviewError {
    /// No API key could be resolved from any source.
    #[error("Please add your Gemini API key in settings")]
    CredentialMissing,

    /// The generation service answered with an error.
    #[error("{0}")]
    Service(String),

    /// The service answered successfully but without any text.
    #[error("No code was generated")]
    EmptyGeneration,

    /// The isolated context never fired its load event.
    #[error("Preview timed out. The code might contain an infinite loop or other runtime errors.")]
    RenderTimeout,

    /// Generated code threw while it was being evaluated or mounted.
    #[error("Error rendering preview: {message}")]
    RenderException { message: String, stack: Option<String> },

    /// The document loaded but no component could be mounted.
    #[error("{0}")]
    MountFailure(String),

    /// Network transport failure.
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PreviewError {
    /// Title used for the user-facing notification.
    pub fn notification_title(&self) -> &'static str {
        match self {
            PreviewError::CredentialMissing => "API Key Missing",
            PreviewError::RenderTimeout
            | PreviewError::RenderException { .. }
            | PreviewError::MountFailure(_) => "Preview Error",
            _ => "Generation Failed",
        }
    }

    /// Whether this error is reported inline in the preview surface rather
    /// than as a notification.
    pub fn is_render_error(&self) -> bool {
        matches!(
            self,
            PreviewError::RenderTimeout
                | PreviewError::RenderException { .. }
                | PreviewError::MountFailure(_)
        )
    }
}

impl From<anyhow::Error> for PreviewError {
    fn from(err: anyhow::Error) -> Self {
        PreviewError::Transport(err.to_string())
    }
}
