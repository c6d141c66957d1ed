//! In-memory stand-ins for the Kubernetes API used by the integration tests
//!
//! The document store enforces version checks like the API server does and
//! yields between read and write so concurrent reconciles interleave.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;
use kube::runtime::controller::Action;
use serde_json::{json, Value};

use tyk_route_operator::controller::{reconcile, Context, ContextBuilder, RouteClient, ROUTE_FINALIZER};
use tyk_route_operator::crd::{DocumentRef, RouteState, TykRoute, TykRouteStatus, WorkloadRef};
use tyk_route_operator::document::{DocumentStore, RouteKey, SharedDocument};
use tyk_route_operator::reload::WorkloadClient;
use tyk_route_operator::retry::RetryConfig;
use tyk_route_operator::Error;

// =============================================================================
// Document store
// =============================================================================

/// ConfigMaps held in memory with integer resource versions
#[derive(Default)]
pub struct InMemoryDocuments {
    docs: Mutex<HashMap<DocumentRef, (BTreeMap<String, String>, u64)>>,
    writes: AtomicUsize,
}

impl InMemoryDocuments {
    pub fn create(&self, document: &DocumentRef) {
        self.docs
            .lock()
            .unwrap()
            .insert(document.clone(), (BTreeMap::new(), 1));
    }

    pub fn create_with(&self, document: &DocumentRef, entries: &[(&str, &str)]) {
        let entries = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.docs
            .lock()
            .unwrap()
            .insert(document.clone(), (entries, 1));
    }

    pub fn delete(&self, document: &DocumentRef) {
        self.docs.lock().unwrap().remove(document);
    }

    pub fn entries(&self, document: &DocumentRef) -> Option<BTreeMap<String, String>> {
        self.docs
            .lock()
            .unwrap()
            .get(document)
            .map(|(entries, _)| entries.clone())
    }

    pub fn entry_json(&self, document: &DocumentRef, key: &str) -> Option<Value> {
        let entries = self.entries(document)?;
        serde_json::from_str(entries.get(key)?).ok()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocuments {
    async fn get(&self, document: &DocumentRef) -> Result<Option<SharedDocument>, Error> {
        let snapshot = self
            .docs
            .lock()
            .unwrap()
            .get(document)
            .map(|(entries, version)| SharedDocument::new(entries.clone(), version.to_string()));
        tokio::task::yield_now().await;
        Ok(snapshot)
    }

    async fn write_entry(
        &self,
        document: &DocumentRef,
        key: &RouteKey,
        value: Option<String>,
        expected_version: &str,
    ) -> Result<String, Error> {
        let mut docs = self.docs.lock().unwrap();
        let Some((entries, version)) = docs.get_mut(document) else {
            return Err(Error::not_found(format!("ConfigMap {document} not found")));
        };
        if version.to_string() != expected_version {
            return Err(Error::Conflict {
                document: document.to_string(),
            });
        }
        match value {
            Some(value) => {
                entries.insert(key.as_str().to_string(), value);
            }
            None => {
                entries.remove(key.as_str());
            }
        }
        *version += 1;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(version.to_string())
    }
}

// =============================================================================
// Route objects
// =============================================================================

/// TykRoute objects keyed by (namespace, name)
#[derive(Default)]
pub struct InMemoryRoutes {
    objects: Mutex<BTreeMap<(String, String), TykRoute>>,
    status_writes: AtomicUsize,
}

fn object_id(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

impl InMemoryRoutes {
    /// Create the route, or update its spec and bump the generation
    pub fn apply(&self, route: TykRoute) {
        let id = object_id(
            route.metadata.namespace.as_deref().unwrap_or_default(),
            route.metadata.name.as_deref().unwrap_or_default(),
        );
        let mut objects = self.objects.lock().unwrap();
        match objects.get_mut(&id) {
            Some(existing) if existing.spec != route.spec => {
                existing.spec = route.spec;
                existing.metadata.generation = existing.metadata.generation.map(|g| g + 1);
            }
            Some(_) => {}
            None => {
                objects.insert(id, route);
            }
        }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<TykRoute> {
        self.objects
            .lock()
            .unwrap()
            .get(&object_id(namespace, name))
            .cloned()
    }

    pub fn status(&self, namespace: &str, name: &str) -> Option<TykRouteStatus> {
        self.get(namespace, name)?.status
    }

    pub fn state(&self, namespace: &str, name: &str) -> Option<RouteState> {
        Some(self.status(namespace, name)?.state)
    }

    /// Mark the route deleted; it disappears once its finalizers are gone
    pub fn request_delete(&self, namespace: &str, name: &str) {
        if let Some(route) = self
            .objects
            .lock()
            .unwrap()
            .get_mut(&object_id(namespace, name))
        {
            route.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteClient for InMemoryRoutes {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TykRouteStatus,
    ) -> Result<(), Error> {
        let mut objects = self.objects.lock().unwrap();
        let route = objects
            .get_mut(&object_id(namespace, name))
            .ok_or_else(|| Error::not_found(format!("TykRoute {namespace}/{name}")))?;
        route.status = Some(status.clone());
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<(), Error> {
        let mut objects = self.objects.lock().unwrap();
        let route = objects
            .get_mut(&object_id(namespace, name))
            .ok_or_else(|| Error::not_found(format!("TykRoute {namespace}/{name}")))?;
        let finalizers = route.metadata.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == finalizer) {
            finalizers.push(finalizer.to_string());
        }
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let id = object_id(namespace, name);
        let mut objects = self.objects.lock().unwrap();
        let Some(route) = objects.get_mut(&id) else {
            return Ok(());
        };
        if let Some(finalizers) = route.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
        let released = route
            .metadata
            .finalizers
            .as_ref()
            .map_or(true, |f| f.is_empty());
        if route.metadata.deletion_timestamp.is_some() && released {
            objects.remove(&id);
        }
        Ok(())
    }
}

// =============================================================================
// Workloads
// =============================================================================

/// Records every restart marker applied
#[derive(Default)]
pub struct RecordingWorkloads {
    markers: Mutex<Vec<(WorkloadRef, String)>>,
    failing: AtomicBool,
    missing: Mutex<Vec<WorkloadRef>>,
}

impl RecordingWorkloads {
    pub fn markers_for(&self, workload: &WorkloadRef) -> Vec<String> {
        self.markers
            .lock()
            .unwrap()
            .iter()
            .filter(|(w, _)| w == workload)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.markers.lock().unwrap().len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Patches to `workload` fail as if the Deployment did not exist
    pub fn remove(&self, workload: &WorkloadRef) {
        self.missing.lock().unwrap().push(workload.clone());
    }
}

#[async_trait]
impl WorkloadClient for RecordingWorkloads {
    async fn set_restart_marker(&self, workload: &WorkloadRef, marker: &str) -> Result<(), Error> {
        if self.missing.lock().unwrap().contains(workload) {
            return Err(Error::not_found(format!("Deployment {workload} not found")));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::store_unavailable(format!(
                "error accessing Deployment {workload}: connection refused"
            )));
        }
        self.markers
            .lock()
            .unwrap()
            .push((workload.clone(), marker.to_string()));
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub routes: Arc<InMemoryRoutes>,
    pub documents: Arc<InMemoryDocuments>,
    pub workloads: Arc<RecordingWorkloads>,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new() -> Self {
        let routes = Arc::new(InMemoryRoutes::default());
        let documents = Arc::new(InMemoryDocuments::default());
        let workloads = Arc::new(RecordingWorkloads::default());
        let ctx = ContextBuilder::new(routes.clone(), documents.clone(), workloads.clone())
            .sync_retry(RetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                backoff_multiplier: 2.0,
            })
            .requeue_backoff(RetryConfig {
                max_attempts: 0,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                backoff_multiplier: 2.0,
            })
            .build();
        Self {
            routes,
            documents,
            workloads,
            ctx: Arc::new(ctx),
        }
    }

    /// Run one reconcile against the stored object
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, Error> {
        let route = self
            .routes
            .get(namespace, name)
            .ok_or_else(|| Error::not_found(format!("TykRoute {namespace}/{name}")))?;
        reconcile(Arc::new(route), self.ctx.clone()).await
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A route that already carries the finalizer
pub fn route(namespace: &str, name: &str, spec: Value) -> TykRoute {
    TykRoute {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            generation: Some(1),
            finalizers: Some(vec![ROUTE_FINALIZER.to_string()]),
            ..Default::default()
        },
        spec: serde_json::from_value(spec).expect("route spec should deserialize"),
        status: None,
    }
}

/// Spec targeting `config_map` with the given listen path and upstream
pub fn route_spec(config_map: &str, listen_path: &str, target_url: &str) -> Value {
    json!({
        "target": {"configMapName": config_map},
        "apiDefinition": {
            "name": listen_path.trim_matches('/'),
            "proxy": {"listenPath": listen_path, "targetUrl": target_url},
        }
    })
}

/// Same as [`route_spec`] but restarting `workload` on change
pub fn route_spec_with_workload(
    config_map: &str,
    listen_path: &str,
    target_url: &str,
    workload: &str,
) -> Value {
    let mut spec = route_spec(config_map, listen_path, target_url);
    spec["target"]["workloadName"] = json!(workload);
    spec
}
