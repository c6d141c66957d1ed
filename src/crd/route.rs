//! TykRoute Custom Resource Definition
//!
//! A TykRoute publishes one Tyk API definition into a shared gateway
//! ConfigMap, optionally restarting the gateway Deployment when the ConfigMap
//! content changes.

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::api_definition::{preserve_unknown_fields, ApiDefinition};
use super::types::{Condition, DocumentRef, RouteState, WorkloadRef};
use crate::document::RouteKey;

/// Specification for a TykRoute
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "vourteen14.labs",
    version = "v1",
    kind = "TykRoute",
    plural = "tykroutes",
    shortname = "tr",
    status = "TykRouteStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"ConfigMap","type":"string","jsonPath":".spec.target.configMapName"}"#,
    printcolumn = r#"{"name":"Listen Path","type":"string","jsonPath":".status.listenPath"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TykRouteSpec {
    /// Where the API definition is published
    pub target: RouteTarget,

    /// The Tyk API definition, stored opaquely apart from the fields the
    /// operator validates
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub api_definition: ApiDefinition,
}

/// Target ConfigMap and optional gateway workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTarget {
    /// Name of the shared ConfigMap
    #[serde(default)]
    pub config_map_name: String,

    /// Namespace of the ConfigMap and workload; defaults to the route's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Deployment restarted when the ConfigMap changes
    #[serde(default, alias = "tykDeployment", skip_serializing_if = "Option::is_none")]
    pub workload_name: Option<String>,
}

impl TykRouteSpec {
    /// Namespace holding the ConfigMap and workload
    pub fn target_namespace<'a>(&'a self, route_namespace: &'a str) -> &'a str {
        self.target
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(route_namespace)
    }

    /// The shared document this route writes to
    pub fn document_ref(&self, route_namespace: &str) -> DocumentRef {
        DocumentRef::new(
            self.target_namespace(route_namespace),
            self.target.config_map_name.trim(),
        )
    }

    /// The workload to restart, if one is configured
    pub fn workload_ref(&self, route_namespace: &str) -> Option<WorkloadRef> {
        let name = self.target.workload_name.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        Some(WorkloadRef::new(self.target_namespace(route_namespace), name))
    }
}

impl TykRoute {
    /// Document key this route owns in `document`
    pub fn route_key(&self, document: &DocumentRef) -> RouteKey {
        RouteKey::for_route(
            &self.name_any(),
            self.namespace().as_deref().unwrap_or_default(),
            &document.namespace,
        )
    }

    /// Whether the route is being deleted
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

/// Status for a TykRoute
///
/// Optional fields serialize as `null` rather than being skipped so that a
/// merge patch clears values left over from an earlier outcome.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TykRouteStatus {
    /// Current convergence state
    #[serde(default)]
    pub state: RouteState,

    /// ConfigMap the route's entry was last written to
    #[serde(default)]
    pub target_document: Option<String>,

    /// Namespace of `target_document`
    #[serde(default)]
    pub target_namespace: Option<String>,

    /// Key of the route's entry inside the ConfigMap
    #[serde(default)]
    pub document_key: Option<String>,

    /// Workload restarted on change
    #[serde(default)]
    pub workload_name: Option<String>,

    /// Listen path currently published
    #[serde(default)]
    pub listen_path: Option<String>,

    /// Generation last written to the ConfigMap
    #[serde(default)]
    pub last_synced_generation: Option<i64>,

    /// Generation the status describes
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// A restart is owed for an earlier change
    #[serde(default)]
    pub reload_pending: bool,

    /// When the workload was last restarted by this route
    #[serde(default)]
    pub last_reload_time: Option<DateTime<Utc>>,

    /// Human-readable detail for the current state
    #[serde(default)]
    pub message: Option<String>,

    /// Machine-readable reason for the current state
    #[serde(default)]
    pub reason: Option<String>,

    /// When `state` last changed
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Conditions (Ready)
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl TykRouteStatus {
    /// Create a new status with the given state
    pub fn with_state(state: RouteState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Set the reason and return self for chaining
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        // Remove existing condition of the same type
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
        self
    }

    /// Look up a condition by type
    pub fn find_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Document and key of the entry this status says the route owns
    pub fn placement(&self) -> Option<(DocumentRef, RouteKey)> {
        let document = DocumentRef::new(
            self.target_namespace.as_deref()?,
            self.target_document.as_deref()?,
        );
        Some((document, RouteKey::from(self.document_key.as_deref()?)))
    }

    /// Whether two statuses describe the same outcome.
    ///
    /// `last_transition_time` and condition timestamps are ignored; the
    /// reload timestamp is not, since it only moves when a restart happened.
    pub fn same_outcome(&self, other: &TykRouteStatus) -> bool {
        self.state == other.state
            && self.target_document == other.target_document
            && self.target_namespace == other.target_namespace
            && self.document_key == other.document_key
            && self.workload_name == other.workload_name
            && self.listen_path == other.listen_path
            && self.last_synced_generation == other.last_synced_generation
            && self.observed_generation == other.observed_generation
            && self.reload_pending == other.reload_pending
            && self.last_reload_time == other.last_reload_time
            && self.message == other.message
            && self.reason == other.reason
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .zip(&other.conditions)
                .all(|(a, b)| a.same_as(b))
    }
}
