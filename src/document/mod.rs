//! Shared configuration document abstraction
//!
//! The gateway reads all API definitions from one ConfigMap. Every route owns
//! exactly one key in it; the ConfigMap's `resourceVersion` is the version
//! token for compare-and-swap writes.

mod configmap;

pub use configmap::KubeDocumentStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::crd::{listen_path_of, DocumentRef};
use crate::Error;

/// Key of a route's entry in the shared document
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    /// Derive the key for route `name` in `route_namespace` writing to a
    /// document in `document_namespace`.
    ///
    /// Same-namespace routes get `<name>.json`; cross-namespace routes are
    /// prefixed with their namespace so two teams can reuse a route name.
    pub fn for_route(name: &str, route_namespace: &str, document_namespace: &str) -> Self {
        if route_namespace == document_namespace {
            Self(format!("{name}.json"))
        } else {
            Self(format!("{route_namespace}.{name}.json"))
        }
    }

    /// The key as stored in the ConfigMap
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RouteKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot of the shared document at one version
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharedDocument {
    /// Entries keyed by route key
    pub entries: BTreeMap<String, String>,
    /// Version token the snapshot was read at
    pub version: String,
}

impl SharedDocument {
    /// Create a snapshot
    pub fn new(entries: BTreeMap<String, String>, version: impl Into<String>) -> Self {
        Self {
            entries,
            version: version.into(),
        }
    }

    /// The stored value for `key`
    pub fn entry(&self, key: &RouteKey) -> Option<&str> {
        self.entries.get(key.as_str()).map(String::as_str)
    }

    /// Listen paths of every entry except `key`, mapped to the key owning them
    pub fn sibling_listen_paths(&self, key: &RouteKey) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key.as_str())
            .filter_map(|(k, v)| listen_path_of(v).map(|path| (path, k.clone())))
            .collect()
    }

    /// Key of a sibling entry already publishing `listen_path`
    pub fn claimant_of(&self, listen_path: &str, key: &RouteKey) -> Option<String> {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key.as_str())
            .find(|(_, v)| listen_path_of(v).as_deref() == Some(listen_path))
            .map(|(k, _)| k.clone())
    }
}

/// Versioned key/value store holding the shared document
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the document; `Ok(None)` when it does not exist
    async fn get(&self, document: &DocumentRef) -> Result<Option<SharedDocument>, Error>;

    /// Set (`Some`) or delete (`None`) the entry for `key`, only if the
    /// document is still at `expected_version`.
    ///
    /// Returns the new version. A stale version fails with [`Error::Conflict`].
    async fn write_entry(
        &self,
        document: &DocumentRef,
        key: &RouteKey,
        value: Option<String>,
        expected_version: &str,
    ) -> Result<String, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::same_namespace("users-api", "gateway", "gateway", "users-api.json")]
    #[case::cross_namespace("users-api", "team-a", "gateway", "team-a.users-api.json")]
    fn test_route_key_derivation(
        #[case] name: &str,
        #[case] route_ns: &str,
        #[case] doc_ns: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(RouteKey::for_route(name, route_ns, doc_ns).as_str(), expected);
    }

    fn document() -> SharedDocument {
        SharedDocument::new(
            BTreeMap::from([
                (
                    "users-api.json".to_string(),
                    r#"{"proxy":{"listen_path":"/api/users/"}}"#.to_string(),
                ),
                (
                    "orders-api.json".to_string(),
                    r#"{"proxy":{"listen_path":"/api/orders/"}}"#.to_string(),
                ),
                ("README".to_string(), "not an api definition".to_string()),
            ]),
            "42",
        )
    }

    #[test]
    fn test_sibling_listen_paths_excludes_own_entry() {
        let doc = document();
        let siblings = doc.sibling_listen_paths(&RouteKey::from("users-api.json"));
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings["/api/orders/"], "orders-api.json");
    }

    #[test]
    fn test_claimant_of_finds_other_owner_only() {
        let doc = document();
        assert_eq!(
            doc.claimant_of("/api/users/", &RouteKey::from("other.json")),
            Some("users-api.json".to_string())
        );
        assert_eq!(
            doc.claimant_of("/api/users/", &RouteKey::from("users-api.json")),
            None
        );
        assert_eq!(
            doc.claimant_of("/api/none/", &RouteKey::from("other.json")),
            None
        );
    }

    #[test]
    fn test_entry_lookup() {
        let doc = document();
        assert!(doc.entry(&RouteKey::from("users-api.json")).is_some());
        assert!(doc.entry(&RouteKey::from("missing.json")).is_none());
    }
}
