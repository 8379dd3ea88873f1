/// Errors raised by a [`ContentSource`](crate::ContentSource).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SourceError {
    /// Path does not exist.
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Path is not a directory (for list operations).
    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    /// Path escapes the content root.
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Returns true if this error is transient and the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SourceError::NotFound(_) => true,
            SourceError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Errors raised by a [`VectorStore`](crate::VectorStore).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store could not be reached or opened.
    #[error("Vector store '{store}' unavailable: {message}")]
    Unavailable { store: String, message: String },

    /// A write or delete was rejected.
    #[error("Vector store write failed: {0}")]
    Write(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_not_found_variants() {
        assert!(SourceError::NotFound("a.md".to_string()).is_not_found());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(SourceError::Io(io).is_not_found());
        assert!(!SourceError::PathTraversal("../x".to_string()).is_not_found());
    }

    #[test]
    fn test_source_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr");
        assert!(SourceError::Io(io).is_transient());
        assert!(!SourceError::NotFound("a.md".to_string()).is_transient());
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Unavailable {
            store: "sqlite".to_string(),
            message: "locked".to_string(),
        };
        assert_eq!(err.to_string(), "Vector store 'sqlite' unavailable: locked");
    }
}
