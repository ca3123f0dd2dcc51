use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error as ThisError;

#[non_exhaustive]
#[derive(Clone, Debug, ThisError)]
pub(crate) enum BridgeError {
    #[error("io error")]
    IoError(#[from] Arc<std::io::Error>),

    #[error("writable file is closed. path=`{0}`")]
    FileClosed(String),

    #[error("native cursor reported an error. message=`{0}`")]
    CursorError(String),

    #[error("invalid handle table capacity. capacity=`{0}`")]
    InvalidHandleCapacity(usize),

    #[error("invalid arena sizes, they must be non-zero and min must not exceed max. min_arena_size=`{min}`, max_arena_size=`{max}`")]
    InvalidArenaSize { min: usize, max: usize },

    #[error("the global observer registry is already initialized")]
    GlobalRegistryInitialized,

    #[error("unknown configuration file format. path=`{0}`")]
    UnknownConfigurationFormat(PathBuf),

    #[error("invalid configuration format")]
    InvalidConfigurationFormat(#[from] Box<figment::Error>),
}

impl From<std::io::Error> for BridgeError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(Arc::new(value))
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Represents the kind of public errors that can be returned to the user.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The filesystem or another host service failed. The caller may retry or drop
    /// the operation.
    Unavailable,

    /// The caller made an invalid request, such as an invalid configuration or a
    /// write to a closed file.
    Invalid,

    /// The native range-scan cursor reported a failure. Iteration stopped early and
    /// the visited records may be incomplete.
    Iterator,

    /// An unexpected internal error occurred.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Unavailable => write!(f, "Unavailable error"),
            ErrorKind::Invalid => write!(f, "Invalid error"),
            ErrorKind::Iterator => write!(f, "Iterator error"),
            ErrorKind::Internal => write!(f, "Internal error"),
        }
    }
}

/// Represents a public error that can be returned to the user.
#[non_exhaustive]
#[derive(Debug)]
pub struct Error {
    msg: String,
    kind: ErrorKind,
    source: Option<BoxError>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)?;
        if let Some(source) = self.source.as_ref() {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl Error {
    /// Creates a new unavailable error.
    pub fn unavailable(msg: String) -> Self {
        Self {
            msg,
            kind: ErrorKind::Unavailable,
            source: None,
        }
    }

    /// Creates a new invalid-request error.
    pub fn invalid(msg: String) -> Self {
        Self {
            msg,
            kind: ErrorKind::Invalid,
            source: None,
        }
    }

    /// Creates a new iterator error.
    pub fn iterator(msg: String) -> Self {
        Self {
            msg,
            kind: ErrorKind::Iterator,
            source: None,
        }
    }

    /// Creates a new internal error.
    pub fn internal(msg: String) -> Self {
        Self {
            msg,
            kind: ErrorKind::Internal,
            source: None,
        }
    }

    /// Adds a source to the error.
    pub fn with_source(mut self, source: BoxError) -> Self {
        self.source = Some(source);
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message without the kind prefix.
    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl From<BridgeError> for Error {
    fn from(err: BridgeError) -> Self {
        let msg = err.to_string();
        match err {
            // Unavailable errors
            BridgeError::IoError(err) => Error::unavailable(msg).with_source(Box::new(err)),

            // Invalid errors
            BridgeError::FileClosed(_) => Error::invalid(msg),
            BridgeError::InvalidHandleCapacity(_) => Error::invalid(msg),
            BridgeError::InvalidArenaSize { .. } => Error::invalid(msg),
            BridgeError::GlobalRegistryInitialized => Error::invalid(msg),
            BridgeError::UnknownConfigurationFormat(_) => Error::invalid(msg),
            BridgeError::InvalidConfigurationFormat(err) => {
                Error::invalid(msg).with_source(Box::new(err))
            }

            // Iterator errors
            BridgeError::CursorError(_) => Error::iterator(msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        BridgeError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_io_error_maps_to_unavailable_with_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Unavailable error: io error (gone)");
    }

    #[test]
    fn test_cursor_error_maps_to_iterator() {
        let err: Error = BridgeError::CursorError("corruption".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Iterator);
        assert!(err.message().contains("corruption"));
    }

    #[test]
    fn test_arena_size_error_maps_to_invalid() {
        let err: Error = BridgeError::InvalidArenaSize { min: 8, max: 4 }.into();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert!(err.source().is_none());
    }
}
