//! ConfigMap-backed document store

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{DocumentStore, RouteKey, SharedDocument};
use crate::crd::DocumentRef;
use crate::{Error, FIELD_MANAGER};

/// Real document store talking to the Kubernetes API
pub struct KubeDocumentStore {
    client: Client,
}

impl KubeDocumentStore {
    /// Create a new store wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, document: &DocumentRef) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &document.namespace)
    }
}

/// Merge patch touching a single data key, guarded by `resourceVersion`.
///
/// The API server rejects the patch with 409 when the ConfigMap moved past
/// `expected_version`, which makes it a compare-and-swap on the whole object.
fn entry_patch(key: &RouteKey, value: Option<String>, expected_version: &str) -> Value {
    let mut data = Map::new();
    data.insert(
        key.as_str().to_string(),
        value.map(Value::String).unwrap_or(Value::Null),
    );
    json!({
        "metadata": { "resourceVersion": expected_version },
        "data": data,
    })
}

fn snapshot(document: &DocumentRef, cm: ConfigMap) -> Result<SharedDocument, Error> {
    let version = cm.metadata.resource_version.ok_or_else(|| {
        Error::store_unavailable(format!("ConfigMap {document} has no resourceVersion"))
    })?;
    Ok(SharedDocument::new(cm.data.unwrap_or_default(), version))
}

#[async_trait]
impl DocumentStore for KubeDocumentStore {
    async fn get(&self, document: &DocumentRef) -> Result<Option<SharedDocument>, Error> {
        let cm = self
            .api(document)
            .get_opt(&document.name)
            .await
            .map_err(|e| Error::from_kube(&format!("ConfigMap {document}"), e))?;
        cm.map(|cm| snapshot(document, cm)).transpose()
    }

    async fn write_entry(
        &self,
        document: &DocumentRef,
        key: &RouteKey,
        value: Option<String>,
        expected_version: &str,
    ) -> Result<String, Error> {
        let patch = entry_patch(key, value, expected_version);
        let updated = self
            .api(document)
            .patch(
                &document.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| Error::from_kube(&format!("ConfigMap {document}"), e))?;

        let version = updated.metadata.resource_version.unwrap_or_default();
        debug!(document = %document, key = %key, version = %version, "wrote document entry");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn test_put_patch_carries_version_precondition() {
        let patch = entry_patch(
            &RouteKey::from("users-api.json"),
            Some("{}".to_string()),
            "17",
        );
        assert_eq!(patch["metadata"]["resourceVersion"], "17");
        assert_eq!(patch["data"]["users-api.json"], "{}");
        assert_eq!(patch["data"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_patch_nulls_only_the_key() {
        let patch = entry_patch(&RouteKey::from("users-api.json"), None, "17");
        assert!(patch["data"]["users-api.json"].is_null());
        assert!(patch["data"]
            .as_object()
            .unwrap()
            .contains_key("users-api.json"));
    }

    #[test]
    fn test_snapshot_requires_resource_version() {
        let doc = DocumentRef::new("gateway", "tyk-apps");
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("tyk-apps".to_string()),
                resource_version: Some("5".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("a.json".to_string(), "{}".to_string())])),
            ..Default::default()
        };
        let snap = snapshot(&doc, cm).unwrap();
        assert_eq!(snap.version, "5");
        assert_eq!(snap.entries.len(), 1);

        let err = snapshot(&doc, ConfigMap::default()).unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[test]
    fn test_snapshot_of_empty_configmap_has_no_entries() {
        let doc = DocumentRef::new("gateway", "tyk-apps");
        let cm = ConfigMap {
            metadata: ObjectMeta {
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(snapshot(&doc, cm).unwrap().entries.is_empty());
    }
}
