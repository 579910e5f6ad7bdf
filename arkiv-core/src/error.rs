use thiserror::Error;

/// Errors produced by the conversion and compliance pipeline.
#[derive(Error, Debug)]
pub enum ArkivError {
    /// The caller supplied input the pipeline refuses to process. Surfaced
    /// to HTTP clients as a 400.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The rendering stage failed after input validation passed.
    #[error("Rendering failed: {0}")]
    Render(String),

    /// Attachment embedding failed (malformed PDF, serialization error).
    #[error("Attachment embedding failed: {0}")]
    Embed(String),

    /// The validation engine failed unexpectedly. A failing conformance
    /// check is a report entry, never this error.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An embedded font or color-profile resource could not be loaded.
    /// Fatal at warmup: the pipeline cannot produce conforming output
    /// without it.
    #[error("Resource load failed: {0}")]
    ResourceLoad(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
}

impl ArkivError {
    /// Whether this error is the caller's fault (maps to HTTP 400) rather
    /// than a processing failure (500).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ArkivError::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, ArkivError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = ArkivError::InvalidInput("html must not be blank".to_string());
        assert_eq!(err.to_string(), "Invalid input: html must not be blank");
    }

    #[test]
    fn test_client_error_classification() {
        assert!(ArkivError::InvalidInput("x".to_string()).is_client_error());
        assert!(!ArkivError::Render("x".to_string()).is_client_error());
        assert!(!ArkivError::Embed("x".to_string()).is_client_error());
        assert!(!ArkivError::Validation("x".to_string()).is_client_error());
        assert!(!ArkivError::ResourceLoad("x".to_string()).is_client_error());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = ArkivError::from(io);
        match err {
            ArkivError::Io(inner) => assert_eq!(inner.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("expected Io variant"),
        }
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ArkivError>();
    }
}
