//! TykRoute controller implementation
//!
//! Each reconcile walks one route through validation, syncing and reload:
//!
//! ```text
//! Pending -> Validating -> Failed
//!                       -> Syncing -> Active | Conflict
//! ```
//!
//! Only the terminal state is written back. Deletion is handled by the
//! finalizer, which removes the route's entry before the object goes away.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::finalizer::{self, ROUTE_FINALIZER};
use super::status::{
    awaiting_spec_change, report, FailureReason, Outcome, Placement, RestartFailure,
};
use crate::crd::{RouteState, TykRoute, TykRouteStatus, WorkloadRef};
use crate::document::{DocumentStore, KubeDocumentStore};
use crate::reload::{KubeWorkloadClient, ReloadTrigger, WorkloadClient};
use crate::retry::{RequeueBackoff, RetryConfig};
use crate::sync::{ConfigSynchronizer, DEFAULT_SYNC_ATTEMPTS};
use crate::validation::{summarize, validate};
use crate::{Error, FIELD_MANAGER};

/// Default interval between periodic reconciles of a healthy route
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue delay after adding the finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Trait abstracting Kubernetes operations on TykRoute objects
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RouteClient: Send + Sync {
    /// Patch the status of a TykRoute
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TykRouteStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to a TykRoute
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from a TykRoute
    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeRouteClient {
    client: Client,
}

impl KubeRouteClient {
    /// Create a new KubeRouteClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<TykRoute> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl RouteClient for KubeRouteClient {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TykRouteStatus,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({
            "status": status
        });

        self.api(namespace)
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?;

        Ok(())
    }

    async fn add_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.api(namespace);

        // Get current route to read existing finalizers
        let route = api.get(name).await?;
        let mut finalizers = route.metadata.finalizers.unwrap_or_default();

        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.api(namespace);

        let route = match api.get_opt(name).await? {
            Some(route) => route,
            None => return Ok(()),
        };
        let finalizers: Vec<String> = route
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }
}

/// Controller context shared by every reconcile
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .resync_interval(Duration::from_secs(60))
///     .build();
/// ```
pub struct Context {
    /// TykRoute operations (trait object for testability)
    pub routes: Arc<dyn RouteClient>,
    /// Writes route entries into shared documents
    pub synchronizer: ConfigSynchronizer,
    /// Restarts gateway workloads
    pub reload: ReloadTrigger,
    /// Per-route failure backoff
    pub backoff: RequeueBackoff,
    /// Interval between periodic reconciles
    pub resync_interval: Duration,
}

impl Context {
    /// Create a builder backed by the real Kubernetes API
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(
            Arc::new(KubeRouteClient::new(client.clone())),
            Arc::new(KubeDocumentStore::new(client.clone())),
            Arc::new(KubeWorkloadClient::new(client)),
        )
    }
}

/// Builder for constructing [`Context`] instances
///
/// Testing with in-memory clients:
/// ```ignore
/// let ctx = ContextBuilder::new(routes, documents, workloads)
///     .sync_retry(RetryConfig::with_max_attempts(3))
///     .build();
/// ```
pub struct ContextBuilder {
    routes: Arc<dyn RouteClient>,
    documents: Arc<dyn DocumentStore>,
    workloads: Arc<dyn WorkloadClient>,
    resync_interval: Duration,
    sync_retry: RetryConfig,
    requeue_backoff: RetryConfig,
}

impl ContextBuilder {
    /// Create a builder from explicit clients
    pub fn new(
        routes: Arc<dyn RouteClient>,
        documents: Arc<dyn DocumentStore>,
        workloads: Arc<dyn WorkloadClient>,
    ) -> Self {
        Self {
            routes,
            documents,
            workloads,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            sync_retry: RetryConfig::with_max_attempts(DEFAULT_SYNC_ATTEMPTS),
            requeue_backoff: RetryConfig {
                max_attempts: 0,
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(300),
                backoff_multiplier: 2.0,
            },
        }
    }

    /// Set the periodic resync interval
    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Set the compare-and-swap retry policy
    pub fn sync_retry(mut self, retry: RetryConfig) -> Self {
        self.sync_retry = retry;
        self
    }

    /// Set the per-route requeue backoff policy
    pub fn requeue_backoff(mut self, backoff: RetryConfig) -> Self {
        self.requeue_backoff = backoff;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            routes: self.routes,
            synchronizer: ConfigSynchronizer::new(self.documents, self.sync_retry),
            reload: ReloadTrigger::new(self.workloads),
            backoff: RequeueBackoff::new(self.requeue_backoff),
            resync_interval: self.resync_interval,
        }
    }
}

/// Key identifying a route in the backoff tracker
pub(crate) fn object_key(route: &TykRoute) -> String {
    format!(
        "{}/{}",
        route.namespace().unwrap_or_default(),
        route.name_any()
    )
}

/// Reconcile a TykRoute resource
///
/// Returns an `Action` indicating when to requeue the resource, or an error
/// if the route's own status or finalizer could not be updated.
#[instrument(
    skip(route, ctx),
    fields(route = %route.name_any(), namespace = %route.namespace().unwrap_or_default())
)]
pub async fn reconcile(route: Arc<TykRoute>, ctx: Arc<Context>) -> Result<Action, Error> {
    let Some(namespace) = route.namespace() else {
        return Err(Error::validation("TykRoute has no namespace"));
    };

    if route.is_deleting() {
        return finalizer::cleanup(&route, &namespace, &ctx).await;
    }

    if !finalizer::has_finalizer(&route) {
        info!("adding finalizer");
        ctx.routes
            .add_finalizer(&namespace, &route.name_any(), ROUTE_FINALIZER)
            .await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    if awaiting_spec_change(&route) {
        debug!("validation failed for this generation, waiting for a spec change");
        return Ok(Action::await_change());
    }

    let current = route.status.as_ref().map(|s| s.state).unwrap_or_default();
    debug!(from = %current, to = %RouteState::Validating, "state transition");

    let spec = &route.spec;
    let document = spec.document_ref(&namespace);
    let key = route.route_key(&document);

    let snapshot = if document.name.is_empty() {
        None
    } else {
        match ctx.synchronizer.store().get(&document).await {
            Ok(snapshot) => snapshot,
            Err(e) => return settle_error(&route, &ctx, e).await,
        }
    };
    let siblings = snapshot
        .as_ref()
        .map(|doc| doc.sibling_listen_paths(&key))
        .unwrap_or_default();

    let normalized = match validate(spec, &siblings).into_result() {
        Ok(normalized) => normalized,
        Err(errors) => {
            return settle_error(&route, &ctx, Error::validation(summarize(&errors))).await;
        }
    };
    if snapshot.is_none() {
        let missing = Error::not_found(format!("ConfigMap {document} not found"));
        return settle_error(&route, &ctx, missing).await;
    }

    // Retargeted: drop the entry from the previous document first
    if let Some(status) = &route.status {
        if let Some((old_document, old_key)) = status.placement() {
            if old_document != document || old_key != key {
                info!(from = %old_document, to = %document, "route retargeted, removing old entry");
                match ctx.synchronizer.remove(&old_document, &old_key).await {
                    Ok(removed) if removed.changed => {
                        let old_workload = status
                            .workload_name
                            .as_deref()
                            .map(|name| WorkloadRef::new(&old_document.namespace, name));
                        if let Err(e) = ctx.reload.maybe_trigger(old_workload.as_ref(), true).await {
                            warn!(error = %e, "failed to restart previous gateway");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => return settle_error(&route, &ctx, e).await,
                }
            }
        }
    }

    debug!(from = %RouteState::Validating, to = "Syncing", "state transition");
    let synced = match ctx.synchronizer.sync(&document, &key, &normalized).await {
        Ok(synced) => synced,
        Err(e) => return settle_error(&route, &ctx, e).await,
    };

    let workload = spec.workload_ref(&namespace);
    let owed = route.status.as_ref().is_some_and(|s| s.reload_pending);
    let (restart_failure, reloaded_at) = match ctx
        .reload
        .maybe_trigger(workload.as_ref(), synced.changed || owed)
        .await
    {
        Ok(triggered) => (None, triggered.at),
        Err(e) => {
            warn!(error = %e, "gateway restart failed, will retry");
            (Some(RestartFailure::from_error(&e)), None)
        }
    };
    let reload_pending = restart_failure.is_some();

    let outcome = Outcome::Active(Placement {
        document,
        key,
        listen_path: normalized.listen_path().to_string(),
        workload: workload.map(|w| w.name),
        restart_failure,
        reloaded_at,
    });
    report(ctx.routes.as_ref(), &route, &outcome).await?;

    let object_key = object_key(&route);
    if reload_pending {
        Ok(Action::requeue(ctx.backoff.next_delay(&object_key)))
    } else {
        ctx.backoff.reset(&object_key);
        Ok(Action::requeue(ctx.resync_interval))
    }
}

/// Record a failed reconcile on the route and pick the requeue.
///
/// Validation-type failures wait for a spec change; conflicts back off per
/// route; store failures retry on the resync interval.
async fn settle_error(route: &TykRoute, ctx: &Context, error: Error) -> Result<Action, Error> {
    let object_key = object_key(route);

    if let Error::ConflictExceeded { .. } = error {
        warn!(error = %error, "document write kept conflicting");
        let outcome = Outcome::Conflict {
            message: error.to_string(),
        };
        report(ctx.routes.as_ref(), route, &outcome).await?;
        return Ok(Action::requeue(ctx.backoff.next_delay(&object_key)));
    }

    let reason = FailureReason::from_error(&error);
    warn!(error = %error, reason = reason.as_str(), "route not synced");
    report(
        ctx.routes.as_ref(),
        route,
        &Outcome::failed(reason, error.to_string()),
    )
    .await?;

    if error.is_retryable() {
        Ok(Action::requeue(ctx.resync_interval))
    } else {
        ctx.backoff.reset(&object_key);
        Ok(Action::await_change())
    }
}

/// Error policy for the controller
///
/// Errors reaching here are failures to update the route itself or to clean
/// up on deletion. Retryable ones requeue with per-route exponential backoff.
pub fn error_policy(route: Arc<TykRoute>, error: &Error, ctx: Arc<Context>) -> Action {
    let retryable = error.is_retryable();
    error!(
        ?error,
        route = %route.name_any(),
        retryable,
        "reconciliation failed"
    );

    if retryable {
        Action::requeue(ctx.backoff.next_delay(&object_key(&route)))
    } else {
        Action::await_change()
    }
}
