//! # At-most-once load cache
//!
//! Wraps any `Storage` so that, within one `Core` run, each node/class URI
//! is parsed off disk (or out of a git blob) at most once even when many
//! nodes are built concurrently on the `rayon` pool — the class ancestry
//! DAG means popular base classes are requested by nearly every node.
//!
//! `dashmap` shards the key space across nodes/classes; each slot is a
//! `once_cell::sync::OnceCell` so concurrent first-requesters block on the
//! same in-flight load rather than racing to parse the same file twice.

use super::{ClassMappingRule, NodeRef, RawDocument, Storage, StorageResult};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;

type Key = (String, String);

pub struct CachedStorage<S> {
    inner: S,
    nodes: DashMap<Key, Arc<OnceCell<Arc<RawDocument>>>>,
    classes: DashMap<Key, Arc<OnceCell<Option<Arc<RawDocument>>>>>,
}

impl<S: Storage> CachedStorage<S> {
    pub fn new(inner: S) -> Self {
        CachedStorage {
            inner,
            nodes: DashMap::new(),
            classes: DashMap::new(),
        }
    }

    fn cell_for<V>(map: &DashMap<Key, Arc<OnceCell<V>>>, key: Key) -> Arc<OnceCell<V>> {
        map.entry(key).or_insert_with(|| Arc::new(OnceCell::new())).clone()
    }
}

impl<S: Storage> Storage for CachedStorage<S> {
    fn nodes(&self, environment: &str) -> StorageResult<Vec<NodeRef>> {
        self.inner.nodes(environment)
    }

    fn get_node(&self, environment: &str, name: &str) -> StorageResult<RawDocument> {
        let key = (environment.to_string(), name.to_string());
        let cell = Self::cell_for(&self.nodes, key);
        let doc = cell.get_or_try_init(|| self.inner.get_node(environment, name).map(Arc::new))?;
        Ok((**doc).clone())
    }

    fn get_class(&self, environment: &str, classname: &str) -> StorageResult<Option<RawDocument>> {
        let key = (environment.to_string(), classname.to_string());
        let cell = Self::cell_for(&self.classes, key);
        let doc = cell.get_or_try_init(|| {
            self.inner
                .get_class(environment, classname)
                .map(|opt| opt.map(Arc::new))
        })?;
        Ok(doc.as_ref().map(|d| (**d).clone()))
    }

    fn class_mappings(&self, environment: &str) -> StorageResult<Vec<ClassMappingRule>> {
        self.inner.class_mappings(environment)
    }

    fn environments(&self) -> StorageResult<Vec<String>> {
        self.inner.environments()
    }
}
