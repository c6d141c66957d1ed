//! Deletion handling for TykRoute
//!
//! The finalizer keeps a deleted route around until its entry is gone from
//! the shared document. Cleanup covers both the document `.spec.target` names
//! and the one recorded in status, in case the route was retargeted while a
//! sync was failing.

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, warn};

use super::route::{object_key, Context};
use crate::crd::{DocumentRef, TykRoute, WorkloadRef};
use crate::document::RouteKey;
use crate::Error;

/// Finalizer guarding removal of a route's document entry
pub const ROUTE_FINALIZER: &str = "tyk-route-operator.vourteen14.labs/finalizer";

/// Check if a route has our finalizer
pub fn has_finalizer(route: &TykRoute) -> bool {
    route.finalizers().iter().any(|f| f == ROUTE_FINALIZER)
}

/// Every entry the route may own, with the workload to restart after removal
fn owned_entries(route: &TykRoute, namespace: &str) -> Vec<(DocumentRef, RouteKey, Option<WorkloadRef>)> {
    let mut entries = Vec::new();

    if !route.spec.target.config_map_name.trim().is_empty() {
        let document = route.spec.document_ref(namespace);
        let key = route.route_key(&document);
        entries.push((document, key, route.spec.workload_ref(namespace)));
    }

    if let Some(status) = &route.status {
        if let Some((document, key)) = status.placement() {
            if !entries.iter().any(|(d, k, _)| *d == document && *k == key) {
                let workload = status
                    .workload_name
                    .as_deref()
                    .map(|name| WorkloadRef::new(&document.namespace, name));
                entries.push((document, key, workload));
            }
        }
    }

    entries
}

/// Remove the route's entries and release the finalizer.
///
/// A failed removal keeps the finalizer and surfaces as [`Error::Finalizer`]
/// so the controller retries. Restarts after removal are best effort.
pub(crate) async fn cleanup(route: &TykRoute, namespace: &str, ctx: &Context) -> Result<Action, Error> {
    if !has_finalizer(route) {
        return Ok(Action::await_change());
    }
    info!("route deleted, cleaning up");

    for (document, key, workload) in owned_entries(route, namespace) {
        let removed = ctx
            .synchronizer
            .remove(&document, &key)
            .await
            .map_err(|e| Error::finalizer(format!("failed to remove {key} from {document}: {e}")))?;

        if removed.changed {
            if let Err(e) = ctx.reload.maybe_trigger(workload.as_ref(), true).await {
                warn!(error = %e, "failed to restart gateway after removing route");
            }
        }
    }

    ctx.routes
        .remove_finalizer(namespace, &route.name_any(), ROUTE_FINALIZER)
        .await?;
    ctx.backoff.reset(&object_key(route));
    info!("finalizer released");
    Ok(Action::await_change())
}
