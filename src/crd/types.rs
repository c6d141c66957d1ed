//! Supporting types for the TykRoute CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Convergence state of a route as reported in its status
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteState {
    /// No reconcile has completed since creation
    #[default]
    Pending,
    /// Validation in progress; only ever seen in logs, never persisted
    Validating,
    /// The shared document reflects the current spec generation
    Active,
    /// Compare-and-swap retries were exhausted; will retry
    Conflict,
    /// Validation or store access failed
    Failed,
}

impl std::fmt::Display for RouteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Validating => write!(f, "Validating"),
            Self::Active => write!(f, "Active"),
            Self::Conflict => write!(f, "Conflict"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// True when type, status, reason and message match, ignoring the timestamp
    pub fn same_as(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Reference to the shared configuration document (a ConfigMap)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    /// ConfigMap name
    pub name: String,
    /// ConfigMap namespace
    pub namespace: String,
}

impl DocumentRef {
    /// Create a document reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference to a restartable gateway workload (a Deployment)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    /// Deployment name
    pub name: String,
    /// Deployment namespace
    pub namespace: String,
}

impl WorkloadRef {
    /// Create a workload reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_state_defaults_to_pending() {
        assert_eq!(RouteState::default(), RouteState::Pending);
    }

    #[test]
    fn test_route_state_serializes_as_variant_name() {
        let json = serde_json::to_string(&RouteState::Active).unwrap();
        assert_eq!(json, "\"Active\"");
        let parsed: RouteState = serde_json::from_str("\"Conflict\"").unwrap();
        assert_eq!(parsed, RouteState::Conflict);
    }

    #[test]
    fn test_condition_comparison_ignores_timestamp() {
        let a = Condition::new("Ready", ConditionStatus::True, "Synced", "ok");
        let mut b = a.clone();
        b.last_transition_time = a.last_transition_time - chrono::Duration::hours(1);
        assert!(a.same_as(&b));

        b.reason = "ValidationFailed".to_string();
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_refs_display_as_namespace_slash_name() {
        assert_eq!(
            DocumentRef::new("gateway", "tyk-apps").to_string(),
            "gateway/tyk-apps"
        );
        assert_eq!(WorkloadRef::new("gateway", "gw").to_string(), "gateway/gw");
    }
}
