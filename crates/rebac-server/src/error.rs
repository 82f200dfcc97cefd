use rebac_core::engine::CheckError;
use rebac_core::index::IndexError;
use rebac_core::policy::{PolicyError, PolicyParseError};
use rebac_core::tuple::TupleParseError;
use rebac_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("configuration error: {0}")]
    Configuration(#[from] PolicyError),

    #[error("policy parse error: {0}")]
    PolicyParse(#[from] PolicyParseError),

    #[error("invalid tuple: {0}")]
    InvalidTuple(#[from] TupleParseError),

    #[error(
        "subject type '{subject_type}' is not allowed for relation '{relation}' on '{resource_type}'"
    )]
    InvalidSubject {
        resource_type: String,
        relation: String,
        subject_type: String,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("index job failed: {0}")]
    IndexJob(#[from] IndexError),
}

impl From<StorageError> for AuthzError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(msg) => AuthzError::StoreUnavailable(msg),
            other => AuthzError::Storage(other),
        }
    }
}

impl From<CheckError> for AuthzError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Policy(e) => AuthzError::Configuration(e),
            CheckError::StorageError(msg) => AuthzError::StoreUnavailable(msg),
        }
    }
}

impl AuthzError {
    /// Whether the error comes from policy setup rather than the request.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AuthzError::Configuration(_) | AuthzError::PolicyParse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_policy_error_becomes_configuration_error() {
        let err: AuthzError =
            CheckError::Policy(PolicyError::TypeNotFound("folder".to_string())).into();

        assert!(err.is_configuration());
        assert!(
            err.to_string().contains("folder"),
            "expected 'folder' in error message, got: {err}"
        );
    }

    #[test]
    fn check_storage_error_becomes_store_unavailable() {
        let err: AuthzError = CheckError::StorageError("connection reset".to_string()).into();

        assert!(matches!(err, AuthzError::StoreUnavailable(ref msg) if msg == "connection reset"));
    }

    #[test]
    fn unavailable_storage_error_is_store_unavailable() {
        let err: AuthzError = StorageError::Unavailable("pool timed out".to_string()).into();

        assert!(matches!(err, AuthzError::StoreUnavailable(_)));
        assert!(!err.is_configuration());
    }

    #[test]
    fn other_storage_errors_keep_their_kind() {
        let err: AuthzError = StorageError::DuplicateTuple.into();

        assert!(matches!(err, AuthzError::Storage(StorageError::DuplicateTuple)));
    }

    #[test]
    fn invalid_subject_names_relation_and_type() {
        let err = AuthzError::InvalidSubject {
            resource_type: "file".to_string(),
            relation: "owner".to_string(),
            subject_type: "robot".to_string(),
        };
        let msg = err.to_string();

        assert!(msg.contains("robot"), "should contain subject type: {msg}");
        assert!(msg.contains("owner"), "should contain relation: {msg}");
    }
}
