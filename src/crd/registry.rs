//! Kind registry
//!
//! Maps kind names to the API metadata needed to talk to them. The registry is
//! built once at start-up and handed to whatever needs it (the CLI `wait`
//! command, `crdgen`); the window and approval logic never looks at it.

use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::{ApiResource, GroupVersionKind};
use kube::{CustomResourceExt, Resource};

use super::MaintenanceWindow;
use crate::error::{Error, Result};

/// API group of the kubedb database kinds the supervisor waits on
pub const KUBEDB_GROUP: &str = "kubedb.com";
pub const KUBEDB_VERSION: &str = "v1alpha2";

/// A registered kind
#[derive(Clone, Debug)]
pub struct KindEntry {
    pub resource: ApiResource,
    pub namespaced: bool,
    /// Present for kinds this crate defines
    pub crd: Option<CustomResourceDefinition>,
}

#[derive(Clone, Debug, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<String, KindEntry>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the supervisor's own CRD and the database kinds it supervises
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_crd::<MaintenanceWindow>()?;
        registry.register_external(KUBEDB_GROUP, KUBEDB_VERSION, "MongoDB", "mongodbs", true)?;
        registry.register_external(KUBEDB_GROUP, KUBEDB_VERSION, "Postgres", "postgreses", true)?;
        Ok(registry)
    }

    /// Register a kind defined in this crate
    pub fn register_crd<K>(&mut self) -> Result<()>
    where
        K: CustomResourceExt + Resource<DynamicType = ()>,
    {
        let crd = K::crd();
        let namespaced = crd.spec.scope == "Namespaced";
        self.insert(KindEntry {
            resource: ApiResource::erase::<K>(&()),
            namespaced,
            crd: Some(crd),
        })
    }

    /// Register a kind owned by some other controller
    pub fn register_external(
        &mut self,
        group: &str,
        version: &str,
        kind: &str,
        plural: &str,
        namespaced: bool,
    ) -> Result<()> {
        let gvk = GroupVersionKind::gvk(group, version, kind);
        self.insert(KindEntry {
            resource: ApiResource::from_gvk_with_plural(&gvk, plural),
            namespaced,
            crd: None,
        })
    }

    fn insert(&mut self, entry: KindEntry) -> Result<()> {
        let kind = entry.resource.kind.clone();
        if self.kinds.contains_key(&kind) {
            return Err(Error::ConfigError(format!("kind {kind} registered twice")));
        }
        self.kinds.insert(kind, entry);
        Ok(())
    }

    /// Look up a kind by name; falls back to a case-insensitive match
    pub fn get(&self, kind: &str) -> Option<&KindEntry> {
        self.kinds.get(kind).or_else(|| {
            self.kinds
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(kind))
                .map(|(_, entry)| entry)
        })
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// CRDs for every kind defined in this crate
    pub fn crds(&self) -> Vec<CustomResourceDefinition> {
        self.kinds
            .values()
            .filter_map(|entry| entry.crd.clone())
            .collect()
    }
}
