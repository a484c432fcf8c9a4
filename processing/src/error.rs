use std::fmt::{Display, Formatter};

use services::ExtractionError;

/// Error that can occur while transforming a document.
///
/// `Ingestion`, `Rejected`, `InvalidState`, `InvalidConfiguration`, `UnsupportedMediaType` and `DuplicateRequest`
/// are returned synchronously to whoever submits a request. All other errors only ever reach the
/// [`CallbackHandler`](crate::CallbackHandler).
///
#[derive(Debug)]
pub enum TransformError {
    /// The inbound content couldn't be buffered.
    ///
    Ingestion(std::io::Error),

    /// No worker is available to take the job.
    ///
    Rejected,

    /// The operation isn't allowed in the transformer's current state.
    ///
    InvalidState(String),

    /// The pool settings are inconsistent.
    ///
    InvalidConfiguration(String),

    /// The media type can't be transformed.
    ///
    UnsupportedMediaType(String),

    /// A request with the same id is still active.
    ///
    DuplicateRequest(String),

    /// The extraction engine failed to extract the document.
    ///
    Extraction(anyhow::Error),

    /// The extraction result couldn't be written.
    ///
    Write(anyhow::Error),

    /// The extraction was interrupted.
    ///
    Interrupted,

    /// An unexpected error occurred.
    ///
    Unexpected(anyhow::Error),
}

impl TransformError {
    /// Whether the error is reported to the submitter rather than to the callback.
    ///
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            Self::Ingestion(_)
                | Self::Rejected
                | Self::InvalidState(_)
                | Self::InvalidConfiguration(_)
                | Self::UnsupportedMediaType(_)
                | Self::DuplicateRequest(_)
        )
    }
}

impl Display for TransformError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingestion(err) => write!(f, "Unable to buffer request content: {}", err),
            Self::Rejected => write!(f, "No worker available to accept the request"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Self::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::UnsupportedMediaType(media_type) => write!(f, "Unsupported media type: {}", media_type),
            Self::DuplicateRequest(id) => write!(f, "Request {} is already active", id),
            Self::Extraction(err) => write!(f, "Extraction failed: {}", err),
            Self::Write(err) => write!(f, "Writing the result failed: {}", err),
            Self::Interrupted => write!(f, "Transformation was interrupted"),
            Self::Unexpected(err) => write!(f, "Unexpected error: {}", err),
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ingestion(err) => Some(err),
            Self::Extraction(err) | Self::Write(err) | Self::Unexpected(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<ExtractionError> for TransformError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::Extraction(err) => Self::Extraction(err),
            ExtractionError::Write(err) => Self::Write(err),
            ExtractionError::Io(err) => Self::Extraction(anyhow::Error::from(err)),
            ExtractionError::Interrupted => Self::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_from_extraction_error() {
        assert!(matches!(TransformError::from(ExtractionError::Extraction(anyhow!("bad"))), TransformError::Extraction(_)));
        assert!(matches!(TransformError::from(ExtractionError::Write(anyhow!("full"))), TransformError::Write(_)));
        assert!(matches!(TransformError::from(ExtractionError::Interrupted), TransformError::Interrupted));

        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated");
        match TransformError::from(ExtractionError::Io(io)) {
            TransformError::Extraction(err) => assert_eq!(err.to_string(), "truncated"),
            other => panic!("expected extraction error, got {:?}", other),
        }
    }

    #[test]
    fn test_is_synchronous() {
        assert!(TransformError::Rejected.is_synchronous());
        assert!(TransformError::DuplicateRequest("a".to_string()).is_synchronous());
        assert!(!TransformError::Interrupted.is_synchronous());
        assert!(!TransformError::Unexpected(anyhow!("boom")).is_synchronous());
    }
}
