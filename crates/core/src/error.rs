//! Error type shared by every stage of the evaluation pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the edit evaluation pipeline.
///
/// Every variant aborts the current run; nothing in the pipeline retries or
/// skips a sample.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EditError {
    /// Invalid or missing configuration, detected before the affected work runs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Policy failure or a trajectory that violates the expected tensor shapes.
    #[error(transparent)]
    Inference(#[from] anyhow::Error),

    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to process image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

pub type Result<T, E = EditError> = std::result::Result<T, E>;

impl EditError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn shape(message: impl std::fmt::Display) -> Self {
        Self::Inference(anyhow::anyhow!("trajectory shape mismatch: {message}"))
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_inference(&self) -> bool {
        matches!(self, Self::Inference(_))
    }

    /// Directory, file, image codec and archive failures.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Image { .. } | Self::Archive { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_pass_through_unmodified() {
        let err: EditError = anyhow::anyhow!("policy exploded at step 3").into();
        assert!(err.is_inference());
        assert_eq!(err.to_string(), "policy exploded at step 3");
    }

    #[test]
    fn shape_errors_are_inference_errors() {
        let err = EditError::shape("expected 5 steps, got 4");
        assert!(err.is_inference());
        assert!(err.to_string().contains("expected 5 steps, got 4"));
    }

    #[test]
    fn io_family_classification() {
        let err = EditError::io(
            "create directory",
            "/nope/results/000",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_io());
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("create directory /nope/results/000"));
    }
}
