//! Status reporting for TykRoute
//!
//! The reconciler describes what happened as an [`Outcome`]; this module turns
//! it into a [`TykRouteStatus`] and writes it only when it differs from what
//! the resource already records.

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::route::RouteClient;
use crate::crd::{Condition, ConditionStatus, DocumentRef, RouteState, TykRoute, TykRouteStatus};
use crate::document::RouteKey;
use crate::Error;

const READY: &str = "Ready";
const SYNCED: &str = "Synced";

/// Why a route is not Active
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The route is invalid or its listen path is taken
    ValidationFailed,
    /// The target ConfigMap does not exist
    TargetNotFound,
    /// The operator may not read or write the target
    PermissionDenied,
    /// The API server could not be reached or failed
    StoreUnavailable,
    /// Compare-and-swap retries ran out
    ConflictExceeded,
    /// The gateway Deployment to restart does not exist
    WorkloadNotFound,
    /// Patching the gateway Deployment failed
    RestartFailed,
}

impl FailureReason {
    /// Reason string written to status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "ValidationFailed",
            Self::TargetNotFound => "TargetNotFound",
            Self::PermissionDenied => "PermissionDenied",
            Self::StoreUnavailable => "StoreUnavailable",
            Self::ConflictExceeded => "ConflictExceeded",
            Self::WorkloadNotFound => "WorkloadNotFound",
            Self::RestartFailed => "RestartFailed",
        }
    }

    /// Classify an error raised while reconciling
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Validation(_) | Error::ListenPathClaimed { .. } => Self::ValidationFailed,
            Error::NotFound(_) => Self::TargetNotFound,
            Error::PermissionDenied(_) => Self::PermissionDenied,
            Error::Conflict { .. } | Error::ConflictExceeded { .. } => Self::ConflictExceeded,
            _ => Self::StoreUnavailable,
        }
    }
}

/// Why the last gateway restart did not land
#[derive(Clone, Debug, PartialEq)]
pub struct RestartFailure {
    /// `WorkloadNotFound` or `RestartFailed`
    pub reason: FailureReason,
    /// Error detail
    pub message: String,
}

impl RestartFailure {
    /// Classify an error returned by the workload client
    pub fn from_error(error: &Error) -> Self {
        let reason = match error {
            Error::NotFound(_) => FailureReason::WorkloadNotFound,
            _ => FailureReason::RestartFailed,
        };
        Self {
            reason,
            message: error.to_string(),
        }
    }
}

/// Where an Active route's entry lives
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    /// Shared document holding the entry
    pub document: DocumentRef,
    /// Entry key
    pub key: RouteKey,
    /// Published listen path
    pub listen_path: String,
    /// Workload restarted on change
    pub workload: Option<String>,
    /// Set while a restart is still owed
    pub restart_failure: Option<RestartFailure>,
    /// When a restart was just triggered
    pub reloaded_at: Option<DateTime<Utc>>,
}

/// Terminal result of one reconcile
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The document reflects the current generation
    Active(Placement),
    /// Lost every compare-and-swap attempt
    Conflict {
        /// Error detail
        message: String,
    },
    /// Validation or store failure
    Failed {
        /// Machine-readable reason
        reason: FailureReason,
        /// Error detail
        message: String,
    },
}

impl Outcome {
    /// Shorthand for a failed outcome
    pub fn failed(reason: FailureReason, message: impl Into<String>) -> Self {
        Self::Failed {
            reason,
            message: message.into(),
        }
    }

    fn state(&self) -> RouteState {
        match self {
            Self::Active(_) => RouteState::Active,
            Self::Conflict { .. } => RouteState::Conflict,
            Self::Failed { .. } => RouteState::Failed,
        }
    }
}

/// Compute the status for `outcome` given what the route currently records.
///
/// Placement fields survive failures so that cleanup still knows which entry
/// the route owns.
pub fn build_status(
    previous: Option<&TykRouteStatus>,
    outcome: &Outcome,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> TykRouteStatus {
    let prev = previous.cloned().unwrap_or_default();

    let mut status = match outcome {
        Outcome::Active(placement) => {
            let mut message = format!("Route synced to ConfigMap {}", placement.document);
            let mut reason = SYNCED;
            if let Some(failure) = &placement.restart_failure {
                message.push_str(&format!("; gateway restart pending: {}", failure.message));
                reason = failure.reason.as_str();
            }
            TykRouteStatus {
                target_document: Some(placement.document.name.clone()),
                target_namespace: Some(placement.document.namespace.clone()),
                document_key: Some(placement.key.to_string()),
                workload_name: placement.workload.clone(),
                listen_path: Some(placement.listen_path.clone()),
                last_synced_generation: generation,
                observed_generation: generation,
                reload_pending: placement.restart_failure.is_some(),
                last_reload_time: placement.reloaded_at.or(prev.last_reload_time),
                ..TykRouteStatus::with_state(RouteState::Active)
            }
            .message(message.clone())
            .reason(reason)
            .condition(Condition::new(READY, ConditionStatus::True, reason, message))
        }
        Outcome::Conflict { message } => {
            failed_status(&prev, RouteState::Conflict, generation, FailureReason::ConflictExceeded, message)
        }
        Outcome::Failed { reason, message } => {
            failed_status(&prev, RouteState::Failed, generation, *reason, message)
        }
    };

    status.last_transition_time = match previous {
        Some(p) if p.state == status.state => p.last_transition_time.or(Some(now)),
        _ => Some(now),
    };
    for condition in &mut status.conditions {
        condition.last_transition_time = match prev.find_condition(&condition.type_) {
            Some(old) if old.status == condition.status => old.last_transition_time,
            _ => now,
        };
    }
    status
}

fn failed_status(
    prev: &TykRouteStatus,
    state: RouteState,
    generation: Option<i64>,
    reason: FailureReason,
    message: &str,
) -> TykRouteStatus {
    TykRouteStatus {
        target_document: prev.target_document.clone(),
        target_namespace: prev.target_namespace.clone(),
        document_key: prev.document_key.clone(),
        workload_name: prev.workload_name.clone(),
        listen_path: prev.listen_path.clone(),
        last_synced_generation: prev.last_synced_generation,
        observed_generation: generation,
        reload_pending: prev.reload_pending,
        last_reload_time: prev.last_reload_time,
        ..TykRouteStatus::with_state(state)
    }
    .message(message)
    .reason(reason.as_str())
    .condition(Condition::new(
        READY,
        ConditionStatus::False,
        reason.as_str(),
        message,
    ))
}

/// Write the status for `outcome` onto `route` if it changed.
///
/// Returns whether a write happened.
pub async fn report(
    routes: &dyn RouteClient,
    route: &TykRoute,
    outcome: &Outcome,
) -> Result<bool, Error> {
    let status = build_status(
        route.status.as_ref(),
        outcome,
        route.metadata.generation,
        Utc::now(),
    );
    if route
        .status
        .as_ref()
        .is_some_and(|current| current.same_outcome(&status))
    {
        debug!(state = %status.state, "status unchanged");
        return Ok(false);
    }

    let namespace = route.namespace().unwrap_or_default();
    routes
        .patch_status(&namespace, &route.name_any(), &status)
        .await?;

    let from = route.status.as_ref().map(|s| s.state).unwrap_or_default();
    match outcome.state() {
        RouteState::Active => info!(%from, to = %status.state, "updated status"),
        _ => warn!(
            %from,
            to = %status.state,
            reason = status.reason.as_deref().unwrap_or_default(),
            message = status.message.as_deref().unwrap_or_default(),
            "updated status"
        ),
    }
    Ok(true)
}

/// True when the route failed validation and its spec has not changed since
pub fn awaiting_spec_change(route: &TykRoute) -> bool {
    route.status.as_ref().is_some_and(|status| {
        status.state == RouteState::Failed
            && status.reason.as_deref() == Some(FailureReason::ValidationFailed.as_str())
            && status.observed_generation.is_some()
            && status.observed_generation == route.metadata.generation
    })
}
