//! Controller implementation for TykRoute
//!
//! This module contains the reconciliation logic, status reporting and
//! deletion handling for TykRoute resources.

mod finalizer;
mod route;
mod status;

pub use finalizer::{has_finalizer, ROUTE_FINALIZER};
pub use route::{
    error_policy, reconcile, Context, ContextBuilder, KubeRouteClient, RouteClient,
    DEFAULT_RESYNC_INTERVAL,
};
pub use status::{
    awaiting_spec_change, build_status, report, FailureReason, Outcome, Placement, RestartFailure,
};
