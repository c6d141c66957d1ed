//! Gateway reload trigger
//!
//! Tyk only rereads its app directory on start, so a changed ConfigMap is
//! picked up by rolling the gateway Deployment: stamping a fresh timestamp
//! into a pod-template annotation changes the template hash and Kubernetes
//! replaces the pods.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::WorkloadRef;
use crate::{Error, FIELD_MANAGER};

/// Pod-template annotation carrying the restart marker
pub const RESTARTED_AT_ANNOTATION: &str = "tyk.vourteen14.labs/restartedAt";

/// Workload operations needed to force a restart
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Set the restart annotation on the workload's pod template to `marker`
    async fn set_restart_marker(&self, workload: &WorkloadRef, marker: &str) -> Result<(), Error>;
}

/// Real workload client talking to the Kubernetes API
pub struct KubeWorkloadClient {
    client: Client,
}

impl KubeWorkloadClient {
    /// Create a new client wrapping the given kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn set_restart_marker(&self, workload: &WorkloadRef, marker: &str) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &workload.namespace);
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            RESTARTED_AT_ANNOTATION: marker
                        }
                    }
                }
            }
        });
        api.patch(
            &workload.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| Error::from_kube(&format!("Deployment {workload}"), e))?;
        Ok(())
    }
}

/// Result of [`ReloadTrigger::maybe_trigger`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerResult {
    /// Whether a restart was requested
    pub triggered: bool,
    /// When the restart was requested
    pub at: Option<DateTime<Utc>>,
}

impl TriggerResult {
    fn skipped() -> Self {
        Self {
            triggered: false,
            at: None,
        }
    }
}

/// Restarts the gateway workload after a document change
pub struct ReloadTrigger {
    workloads: Arc<dyn WorkloadClient>,
    last_marker: Mutex<Option<DateTime<Utc>>>,
}

impl ReloadTrigger {
    /// Create a trigger using `workloads` to patch Deployments
    pub fn new(workloads: Arc<dyn WorkloadClient>) -> Self {
        Self {
            workloads,
            last_marker: Mutex::new(None),
        }
    }

    /// Restart `workload` if `changed` is true and a workload is configured.
    ///
    /// Never touches the workload when nothing changed.
    pub async fn maybe_trigger(
        &self,
        workload: Option<&WorkloadRef>,
        changed: bool,
    ) -> Result<TriggerResult, Error> {
        let Some(workload) = workload else {
            return Ok(TriggerResult::skipped());
        };
        if !changed {
            debug!(workload = %workload, "document unchanged, no restart");
            return Ok(TriggerResult::skipped());
        }

        let at = self.next_marker();
        let marker = at.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.workloads.set_restart_marker(workload, &marker).await?;
        info!(workload = %workload, marker = %marker, "triggered gateway restart");
        Ok(TriggerResult {
            triggered: true,
            at: Some(at),
        })
    }

    /// A timestamp strictly later than any marker this process issued before,
    /// so back-to-back triggers always change the pod template.
    fn next_marker(&self) -> DateTime<Utc> {
        // Markers are rendered with microsecond precision
        let now = Utc::now().trunc_subsecs(6);
        let mut last = self
            .last_marker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = match *last {
            Some(prev) if prev >= now => prev + chrono::Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> WorkloadRef {
        WorkloadRef::new("gateway", "tyk-gateway")
    }

    #[tokio::test]
    async fn test_fires_only_when_changed() {
        let mut client = MockWorkloadClient::new();
        client
            .expect_set_restart_marker()
            .withf(|w, _| w.name == "tyk-gateway")
            .times(1)
            .returning(|_, _| Ok(()));
        let trigger = ReloadTrigger::new(Arc::new(client));

        let skipped = trigger.maybe_trigger(Some(&gateway()), false).await.unwrap();
        assert!(!skipped.triggered);

        let fired = trigger.maybe_trigger(Some(&gateway()), true).await.unwrap();
        assert!(fired.triggered);
        assert!(fired.at.is_some());
    }

    #[tokio::test]
    async fn test_no_workload_never_fires() {
        let mut client = MockWorkloadClient::new();
        client.expect_set_restart_marker().never();
        let trigger = ReloadTrigger::new(Arc::new(client));

        assert!(!trigger.maybe_trigger(None, true).await.unwrap().triggered);
    }

    #[tokio::test]
    async fn test_marker_is_rfc3339_and_strictly_increasing() {
        let markers = Arc::new(Mutex::new(Vec::new()));
        let seen = markers.clone();
        let mut client = MockWorkloadClient::new();
        client
            .expect_set_restart_marker()
            .times(3)
            .returning(move |_, marker| {
                seen.lock().unwrap().push(marker.to_string());
                Ok(())
            });
        let trigger = ReloadTrigger::new(Arc::new(client));

        for _ in 0..3 {
            trigger.maybe_trigger(Some(&gateway()), true).await.unwrap();
        }

        let markers = markers.lock().unwrap();
        let parsed: Vec<DateTime<Utc>> = markers
            .iter()
            .map(|m| {
                DateTime::parse_from_rfc3339(m)
                    .unwrap()
                    .with_timezone(&Utc)
            })
            .collect();
        assert!(parsed.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_patch_failure_is_reported() {
        let mut client = MockWorkloadClient::new();
        client
            .expect_set_restart_marker()
            .returning(|_, _| Err(Error::PermissionDenied("no permission".to_string())));
        let trigger = ReloadTrigger::new(Arc::new(client));

        let err = trigger
            .maybe_trigger(Some(&gateway()), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }
}
