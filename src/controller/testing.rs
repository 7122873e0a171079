//! In-memory object store for unit tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::store::{ObjectKey, ObjectStore};
use crate::error::{Error, Result};

/// Scripted answer for one `get` call
pub enum Step {
    /// Pretend the object does not exist
    Absent,
    /// Fail the read
    Fail(Error),
}

struct Inner<K> {
    objects: BTreeMap<ObjectKey, K>,
    next_version: u64,
    script: VecDeque<Step>,
    gets: usize,
    status_writes: usize,
    conflicts: usize,
}

/// Stores objects in a map and versions every write like the API server
pub struct MemoryStore<K> {
    kind: String,
    inner: Mutex<Inner<K>>,
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned,
{
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                next_version: 1,
                script: VecDeque::new(),
                gets: 0,
                status_writes: 0,
                conflicts: 0,
            }),
        }
    }

    /// Store `obj` as-is apart from a fresh resourceVersion
    pub fn insert(&self, mut obj: K) -> K {
        let mut inner = self.inner.lock().unwrap();
        stamp(&mut inner.next_version, &mut obj);
        inner.objects.insert(ObjectKey::of(&obj), obj.clone());
        obj
    }

    /// Change a stored object out of band, as another writer would
    pub fn modify(&self, key: &ObjectKey, f: impl FnOnce(&mut K)) {
        let mut inner = self.inner.lock().unwrap();
        let Inner {
            objects,
            next_version,
            ..
        } = &mut *inner;
        let obj = objects.get_mut(key).expect("object to modify");
        f(obj);
        stamp(next_version, obj);
    }

    pub fn remove(&self, key: &ObjectKey) {
        self.inner.lock().unwrap().objects.remove(key);
    }

    pub fn stored(&self, key: &ObjectKey) -> Option<K> {
        self.inner.lock().unwrap().objects.get(key).cloned()
    }

    /// Queue answers consumed by the next `get` calls before real lookups resume
    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.inner.lock().unwrap().script.extend(steps);
    }

    /// Fail the next `n` status writes with a conflict
    pub fn inject_conflicts(&self, n: usize) {
        self.inner.lock().unwrap().conflicts = n;
    }

    pub fn get_count(&self) -> usize {
        self.inner.lock().unwrap().gets
    }

    pub fn status_write_count(&self) -> usize {
        self.inner.lock().unwrap().status_writes
    }
}

fn stamp<K: Resource>(next_version: &mut u64, obj: &mut K) {
    obj.meta_mut().resource_version = Some(next_version.to_string());
    *next_version += 1;
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        let mut inner = self.inner.lock().unwrap();
        inner.gets += 1;
        match inner.script.pop_front() {
            Some(Step::Absent) => Ok(None),
            Some(Step::Fail(e)) => Err(e),
            None => Ok(inner.objects.get(key).cloned()),
        }
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut inner = self.inner.lock().unwrap();
        if inner.objects.contains_key(&key) {
            return Err(Error::Conflict {
                namespace: key.namespace,
                name: key.name,
                message: "already exists".into(),
            });
        }
        let mut created = obj.clone();
        created.meta_mut().generation = Some(1);
        stamp(&mut inner.next_version, &mut created);
        inner.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.inner.lock().unwrap().objects.remove(key);
        Ok(())
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut inner = self.inner.lock().unwrap();
        inner.status_writes += 1;

        let conflict = |message: &str| Error::Conflict {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            message: message.to_string(),
        };

        if inner.conflicts > 0 {
            inner.conflicts -= 1;
            return Err(conflict("injected conflict"));
        }

        let Inner {
            objects,
            next_version,
            ..
        } = &mut *inner;
        let Some(stored) = objects.get_mut(&key) else {
            return Err(Error::NotFound {
                kind: self.kind.clone(),
                namespace: key.namespace.clone(),
                name: key.name.clone(),
            });
        };
        if stored.meta().resource_version != obj.meta().resource_version {
            return Err(conflict("the object has been modified"));
        }

        // Only the status travels; everything else stays as stored.
        let mut merged = serde_json::to_value(&*stored)?;
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        merged["status"] = status;
        let mut updated: K = serde_json::from_value(merged)?;
        stamp(next_version, &mut updated);
        *stored = updated.clone();
        Ok(updated)
    }
}
