//! Create/delete helpers that block until the cluster catches up

use kube::core::DynamicObject;
use kube::Resource;
use tracing::info;

use super::poller::{wait_for, wait_for_deletion, CancelToken, PollOptions};
use super::store::{ObjectKey, ObjectStore};
use crate::error::Result;

/// Phase most database kinds report once they serve traffic
pub const PHASE_READY: &str = "Ready";

/// Create `obj`, then wait until `predicate` holds for it
pub async fn create_and_wait<K, S, P>(
    store: &S,
    obj: &K,
    opts: &PollOptions,
    cancel: &CancelToken,
    predicate: P,
) -> Result<K>
where
    K: Resource + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
    P: FnMut(&K) -> Result<bool>,
{
    let created = store.create(obj).await?;
    let key = ObjectKey::of(&created);
    info!("Created {} {}, waiting for it to become ready", store.kind(), key);
    wait_for(store, &key, opts, cancel, predicate).await
}

/// Delete the object at `key` and wait until it is gone
pub async fn delete_and_wait<K, S>(
    store: &S,
    key: &ObjectKey,
    opts: &PollOptions,
    cancel: &CancelToken,
) -> Result<()>
where
    K: Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    store.delete(key).await?;
    info!("Deleted {} {}, waiting for it to disappear", store.kind(), key);
    wait_for_deletion(store, key, opts, cancel).await
}

/// A string field under `status` of a dynamic object
pub fn status_field<'a>(obj: &'a DynamicObject, field: &str) -> Option<&'a str> {
    obj.data.get("status")?.get(field)?.as_str()
}

/// `status.phase` of a dynamic object, if it reports one
pub fn phase(obj: &DynamicObject) -> Option<&str> {
    status_field(obj, "phase")
}

pub fn phase_is(obj: &DynamicObject, expected: &str) -> bool {
    phase(obj) == Some(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::MemoryStore;
    use crate::crd::registry::{KUBEDB_GROUP, KUBEDB_VERSION};
    use crate::error::Error;
    use kube::core::{ApiResource, GroupVersionKind};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn postgres(name: &str) -> DynamicObject {
        let gvk = GroupVersionKind::gvk(KUBEDB_GROUP, KUBEDB_VERSION, "Postgres");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "postgreses");
        DynamicObject::new(name, &resource)
            .within("demo")
            .data(json!({ "spec": { "version": "16.1" } }))
    }

    fn opts() -> PollOptions {
        PollOptions::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    #[test]
    fn test_phase_is_reads_status_phase() {
        let mut pg = postgres("pg");
        assert_eq!(phase(&pg), None);
        assert!(!phase_is(&pg, PHASE_READY));

        pg.data["status"] = json!({ "phase": "Provisioning" });
        assert_eq!(phase(&pg), Some("Provisioning"));

        pg.data["status"]["phase"] = json!(PHASE_READY);
        assert!(phase_is(&pg, PHASE_READY));
    }

    #[test]
    fn test_status_field_ignores_non_strings() {
        let mut pg = postgres("pg");
        pg.data["status"] = json!({ "observedGeneration": 2, "status": "Approved" });
        assert_eq!(status_field(&pg, "status"), Some("Approved"));
        assert_eq!(status_field(&pg, "observedGeneration"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_wait_until_ready() {
        let store = Arc::new(MemoryStore::<DynamicObject>::new("Postgres"));

        let operator = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            operator.modify(&ObjectKey::new("demo", "pg"), |pg| {
                pg.data["status"] = json!({ "phase": PHASE_READY });
            });
        });

        let ready = create_and_wait(&*store, &postgres("pg"), &opts(), &CancelToken::never(), |pg| {
            Ok(phase_is(pg, PHASE_READY))
        })
        .await
        .unwrap();

        assert!(phase_is(&ready, PHASE_READY));
        assert_eq!(store.get_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_skips_the_wait() {
        let store = MemoryStore::<DynamicObject>::new("Postgres");
        store.insert(postgres("pg"));

        let err = create_and_wait(&store, &postgres("pg"), &opts(), &CancelToken::never(), |_| {
            Ok(true)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(store.get_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_wait_is_idempotent() {
        let store = MemoryStore::<DynamicObject>::new("Postgres");
        store.insert(postgres("pg"));
        let key = ObjectKey::new("demo", "pg");

        delete_and_wait(&store, &key, &opts(), &CancelToken::never())
            .await
            .unwrap();
        assert!(store.stored(&key).is_none());

        // Already gone: deleting again still succeeds on the first check.
        delete_and_wait(&store, &key, &opts(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(store.get_count(), 2);
    }
}
