//! In-memory object store with API-server-like write semantics

use crate::error::GatewayError;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Objects of one kind keyed by (namespace, name)
#[derive(Debug)]
pub(crate) struct ObjectStore<K> {
    kind: &'static str,
    objects: BTreeMap<(String, String), K>,
}

fn key_of<K: Resource>(object: &K) -> (String, String) {
    (object.namespace().unwrap_or_default(), object.name_any())
}

impl<K: Resource + Clone> ObjectStore<K> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            objects: BTreeMap::new(),
        }
    }

    fn describe(&self, namespace: &str, name: &str) -> String {
        format!("{} {}/{}", self.kind, namespace, name)
    }

    pub(crate) fn get(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub(crate) fn list(&self) -> Vec<K> {
        self.objects.values().cloned().collect()
    }

    /// Store `object` as-is for test setup, filling in uid and version.
    pub(crate) fn seed(&mut self, mut object: K, version: u64) -> K {
        if object.meta().uid.is_none() {
            object.meta_mut().uid = Some(uuid::Uuid::new_v4().to_string());
        }
        object.meta_mut().resource_version = Some(version.to_string());
        self.objects.insert(key_of(&object), object.clone());
        object
    }

    pub(crate) fn create(&mut self, object: &K, version: u64) -> Result<K, GatewayError> {
        let key = key_of(object);
        if self.objects.contains_key(&key) {
            return Err(GatewayError::AlreadyExists(self.describe(&key.0, &key.1)));
        }
        let mut stored = object.clone();
        stored.meta_mut().uid = Some(uuid::Uuid::new_v4().to_string());
        stored.meta_mut().resource_version = Some(version.to_string());
        self.objects.insert(key, stored.clone());
        Ok(stored)
    }

    /// Replace the stored object. A resourceVersion on `object` must match.
    pub(crate) fn replace(&mut self, object: &K, version: u64) -> Result<K, GatewayError> {
        self.update_with(object, version, |_, incoming| incoming.clone())
    }

    /// Apply `merge` to the stored object under the same precondition as
    /// [`ObjectStore::replace`].
    pub(crate) fn update_with(
        &mut self,
        object: &K,
        version: u64,
        merge: impl FnOnce(&K, &K) -> K,
    ) -> Result<K, GatewayError> {
        let key = key_of(object);
        let what = self.describe(&key.0, &key.1);
        let Some(current) = self.objects.get(&key) else {
            return Err(GatewayError::NotFound(what));
        };
        if let Some(expected) = object.resource_version() {
            if current.resource_version().as_deref() != Some(expected.as_str()) {
                return Err(GatewayError::Conflict(format!(
                    "{what}: resourceVersion {expected} is stale"
                )));
            }
        }
        let mut stored = merge(current, object);
        stored.meta_mut().uid = current.meta().uid.clone();
        stored.meta_mut().resource_version = Some(version.to_string());
        self.objects.insert(key, stored.clone());
        Ok(stored)
    }

    pub(crate) fn delete(&mut self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.objects
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(self.describe(namespace, name)))
    }
}
