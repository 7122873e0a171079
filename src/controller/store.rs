//! Object store abstraction
//!
//! The supervisor talks to the outside world through [`ObjectStore`]: reads,
//! creates, idempotent deletes and status writes guarded by the object's
//! resourceVersion. [`KubeStore`] backs it with the Kubernetes API.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject, NamespaceResourceScope};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Field manager recorded on status writes
pub const FIELD_MANAGER: &str = "maintenance-supervisor";

/// Identity of a namespaced object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object, defaulting the namespace like the API server does
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_else(|| "default".to_string()),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Kind name used in logs and errors
    fn kind(&self) -> &str;

    /// Current state of the object, `None` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Delete the object; deleting an absent object succeeds
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Write only the status of `obj`
    ///
    /// Fails with [`Error::Conflict`] when the object changed since `obj` was read.
    async fn update_status(&self, obj: &K) -> Result<K>;
}

type ApiFactory<K> = Arc<dyn Fn(&str) -> Api<K> + Send + Sync>;

/// [`ObjectStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore<K> {
    kind: String,
    api: ApiFactory<K>,
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + 'static,
{
    /// Store for a statically typed namespaced resource
    pub fn namespaced(client: Client) -> Self {
        Self {
            kind: K::kind(&()).to_string(),
            api: Arc::new(move |ns: &str| Api::namespaced(client.clone(), ns)),
        }
    }
}

impl KubeStore<DynamicObject> {
    /// Store for a kind only known at runtime (e.g. from the kind registry)
    pub fn dynamic(client: Client, resource: ApiResource) -> Self {
        Self {
            kind: resource.kind.clone(),
            api: Arc::new(move |ns: &str| Api::namespaced_with(client.clone(), ns, &resource)),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        let api = (self.api)(&key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let api = (self.api)(&key.namespace);
        let created = api.create(&PostParams::default(), obj).await?;
        debug!("Created {} {}", self.kind, key);
        Ok(created)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let api = (self.api)(&key.namespace);
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!("Deleted {} {}", self.kind, key);
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("{} {} already absent", self.kind, key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let resource_version = obj.resource_version().ok_or_else(|| {
            Error::ConfigError(format!(
                "{} {} has no resourceVersion; status writes need a fresh read",
                self.kind, key
            ))
        })?;

        let value = serde_json::to_value(obj)?;
        let status = value.get("status").cloned().unwrap_or(serde_json::Value::Null);

        // A resourceVersion inside a merge patch is a precondition: the API
        // server answers 409 when the object moved on since our read.
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });

        let api = (self.api)(&key.namespace);
        match api
            .patch_status(&key.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(updated) => Ok(updated),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(Error::Conflict {
                namespace: key.namespace,
                name: key.name,
                message: e.message,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read-modify-write of an object's status with retry on conflict
///
/// `mutate` sees a fresh read on every attempt and returns the object to
/// write, or `None` when nothing needs writing. Returns the written object,
/// or `None` if `mutate` declined.
pub async fn update_status_with_retry<K, S, F>(
    store: &S,
    key: &ObjectKey,
    max_attempts: u32,
    mut mutate: F,
) -> Result<Option<K>>
where
    K: Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
    F: FnMut(&K) -> Result<Option<K>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let current = store.get(key).await?.ok_or_else(|| Error::NotFound {
            kind: store.kind().to_string(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        })?;

        let Some(updated) = mutate(&current)? else {
            return Ok(None);
        };

        match store.update_status(&updated).await {
            Ok(written) => return Ok(Some(written)),
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                warn!(
                    "Status write for {} {} conflicted (attempt {}/{}), retrying with a fresh read",
                    store.kind(),
                    key,
                    attempt,
                    max_attempts
                );
            }
            Err(e) => return Err(e),
        }
    }
}
