use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::hooks::HookStage;
use crate::database::StoreError;
use crate::schema::FieldError;

/// Outcome of comparing a caller's version with the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionConflict {
    /// The caller holds a version the document has not reached
    Behind { document_version: i64, supplied_version: i64 },
    /// The document moved on since the caller read it
    Modified { document_version: i64, supplied_version: i64 },
}

impl VersionConflict {
    /// Compare the version of the document about to be written with the caller's
    pub fn check(document_version: i64, supplied_version: i64) -> Result<(), VersionConflict> {
        if document_version < supplied_version {
            Err(VersionConflict::Behind {
                document_version,
                supplied_version,
            })
        } else if document_version > supplied_version {
            Err(VersionConflict::Modified {
                document_version,
                supplied_version,
            })
        } else {
            Ok(())
        }
    }

    /// Compare a written document with the caller's version. A write bumps the version by one.
    pub fn check_result(result_version: i64, supplied_version: i64) -> Result<(), VersionConflict> {
        Self::check(result_version - 1, supplied_version)
    }

    pub fn document_version(&self) -> i64 {
        match self {
            VersionConflict::Behind { document_version, .. }
            | VersionConflict::Modified { document_version, .. } => *document_version,
        }
    }
}

impl fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConflict::Behind {
                document_version,
                supplied_version,
            } => write!(
                f,
                "Document version {} is behind the supplied version {}",
                document_version, supplied_version
            ),
            VersionConflict::Modified {
                document_version,
                supplied_version,
            } => write!(
                f,
                "Document has been modified since version {}; latest version is {}",
                supplied_version, document_version
            ),
        }
    }
}

impl std::error::Error for VersionConflict {}

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Malformed input to an internal method. Never shown to clients.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("More than one document found: {0}")]
    MoreThanOneFound(String),

    #[error(transparent)]
    VersionConflict(#[from] VersionConflict),

    #[error("Hook {stage} timed out after {timeout:?}")]
    HookTimeout { stage: HookStage, timeout: Duration },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidArgument(message) => ServiceError::InvalidArgument(message),
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServiceError::BadRequest(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ServiceError::InvalidArgument(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_way_version_check() {
        assert!(VersionConflict::check(3, 3).is_ok());
        assert!(matches!(VersionConflict::check(2, 3), Err(VersionConflict::Behind { .. })));
        assert!(matches!(VersionConflict::check(4, 3), Err(VersionConflict::Modified { .. })));
        assert!(VersionConflict::check_result(4, 3).is_ok());
    }

    #[test]
    fn messages_name_both_versions() {
        let behind = VersionConflict::check(1, 5).unwrap_err().to_string();
        assert_eq!(behind, "Document version 1 is behind the supplied version 5");
        let modified = VersionConflict::check(2, 0).unwrap_err().to_string();
        assert_eq!(modified, "Document has been modified since version 0; latest version is 2");
    }

    #[test]
    fn store_argument_errors_stay_argument_errors() {
        let err: ServiceError = StoreError::InvalidArgument("bad".into()).into();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
        let err: ServiceError = StoreError::driver("down").into();
        assert!(matches!(err, ServiceError::Store(_)));
    }
}
