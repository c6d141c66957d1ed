//! Error types for the Tyk route operator

use thiserror::Error;

/// Main error type for route reconciliation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error on the route resource itself (status, finalizers)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for a route spec
    #[error("validation error: {0}")]
    Validation(String),

    /// Another route already owns the listen path in the target document
    #[error("listen path {listen_path} already claimed by {owner}")]
    ListenPathClaimed {
        /// The contested listen path
        listen_path: String,
        /// Document key of the entry that owns it
        owner: String,
    },

    /// A single compare-and-swap write lost against a concurrent writer
    #[error("conflict writing {document}: version is stale")]
    Conflict {
        /// Document being written
        document: String,
    },

    /// Compare-and-swap retries were exhausted
    #[error("conflict writing {document}: gave up after {attempts} attempts")]
    ConflictExceeded {
        /// Document being written
        document: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Target object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The operator lacks RBAC permission for the target object
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other store failure (timeouts, 5xx, transport)
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Deletion cleanup failed; the finalizer stays in place
    #[error("finalizer error: {0}")]
    Finalizer(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a store-unavailable error with the given message
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a finalizer error with the given message
    pub fn finalizer(msg: impl Into<String>) -> Self {
        Self::Finalizer(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Classify a kube API error raised while touching `object`.
    ///
    /// 409 becomes [`Error::Conflict`], 403 [`Error::PermissionDenied`],
    /// 404 [`Error::NotFound`]; everything else is [`Error::StoreUnavailable`].
    pub fn from_kube(object: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                document: object.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 403 => {
                Self::PermissionDenied(format!("no permission to access {object}"))
            }
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(format!("{object} not found")),
            _ => Self::StoreUnavailable(format!("error accessing {object}: {err}")),
        }
    }

    /// Whether retrying without a spec change can help
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::ListenPathClaimed { .. })
    }

    /// Whether this is a single stale-version write
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("code {code}"),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Story: store errors are classified by HTTP code so the reconciler can
    /// decide between CAS retry, status reporting and resync.
    #[rstest]
    #[case::conflict(409, "conflict")]
    #[case::forbidden(403, "permission denied")]
    #[case::missing(404, "not found")]
    #[case::server_error(500, "store unavailable")]
    #[case::throttled(429, "store unavailable")]
    fn story_kube_errors_are_classified_by_code(#[case] code: u16, #[case] expected: &str) {
        let err = Error::from_kube("gateway/tyk-apps", api_error(code));
        assert!(
            err.to_string().contains(expected),
            "{err} should contain {expected}"
        );
        assert!(err.to_string().contains("gateway/tyk-apps"));
    }

    #[test]
    fn story_only_conflicts_feed_the_cas_loop() {
        assert!(Error::from_kube("d", api_error(409)).is_conflict());
        assert!(!Error::from_kube("d", api_error(500)).is_conflict());
        assert!(!Error::not_found("d").is_conflict());
    }

    /// Story: validation-type failures wait for a spec edit, everything else
    /// is retried.
    #[test]
    fn story_validation_failures_are_not_retryable() {
        assert!(!Error::validation("missing target").is_retryable());
        assert!(!Error::ListenPathClaimed {
            listen_path: "/api/users/".to_string(),
            owner: "users-api.json".to_string(),
        }
        .is_retryable());

        assert!(Error::ConflictExceeded {
            document: "d".to_string(),
            attempts: 5
        }
        .is_retryable());
        assert!(Error::store_unavailable("timeout").is_retryable());
        assert!(Error::finalizer("cleanup failed").is_retryable());
        assert!(Error::PermissionDenied("x".to_string()).is_retryable());
    }

    #[test]
    fn story_conflict_exceeded_reports_attempts() {
        let err = Error::ConflictExceeded {
            document: "gateway/tyk-apps".to_string(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "conflict writing gateway/tyk-apps: gave up after 5 attempts"
        );
    }

    #[test]
    fn story_error_construction_ergonomics() {
        let route = "users-api";
        let err = Error::finalizer(format!("cleanup failed for {}", route));
        assert!(err.to_string().contains("users-api"));

        let err = Error::serialization("bad json");
        assert_eq!(err.to_string(), "serialization error: bad json");
    }
}
