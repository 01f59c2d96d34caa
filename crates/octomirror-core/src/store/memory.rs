//! In-memory entity store implementation.
//!
//! Reference implementation of [`EntityStore`] for tests and single-process
//! deployments: a `RwLock`-guarded set of maps with secondary indexes on
//! `(kind, github_id)` and `(kind, natural_key)`. A transaction applies all
//! of its operations under one write guard, so readers never observe a
//! half-applied group.

use super::{EntityKind, EntityRecord, EntityStore, Link, StoreError, StoreOp};
use crate::EntityId;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Thread-safe in-memory entity store
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<EntityId, EntityRecord>,
    by_github: HashMap<(EntityKind, u64), EntityId>,
    by_natural: HashMap<(EntityKind, String), EntityId>,
    links: HashMap<(EntityId, String), BTreeSet<EntityId>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn remove_indexes(&mut self, record: &EntityRecord) {
        if let Some(github_id) = record.github_id {
            self.by_github.remove(&(record.kind, github_id));
        }
        if let Some(natural) = &record.natural_key {
            self.by_natural.remove(&(record.kind, natural.clone()));
        }
    }

    fn apply(&mut self, op: StoreOp) {
        match op {
            StoreOp::Upsert { record, links } => {
                if let Some(previous) = self.records.get(&record.id).cloned() {
                    self.remove_indexes(&previous);
                }
                if let Some(github_id) = record.github_id {
                    self.by_github
                        .insert((record.kind, github_id), record.id.clone());
                }
                if let Some(natural) = &record.natural_key {
                    self.by_natural
                        .insert((record.kind, natural.clone()), record.id.clone());
                }
                self.records.insert(record.id.clone(), record);
                for link in links {
                    self.add_link(link);
                }
            }
            StoreOp::Link(link) => self.add_link(link),
            StoreOp::Delete { id } => {
                if let Some(record) = self.records.remove(&id) {
                    self.remove_indexes(&record);
                }
                self.links.retain(|(from, _), targets| {
                    if from == &id {
                        return false;
                    }
                    targets.remove(&id);
                    !targets.is_empty()
                });
            }
        }
    }

    fn add_link(&mut self, link: Link) {
        self.links
            .entry((link.from, link.name))
            .or_default()
            .insert(link.to);
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, id: &EntityId) -> Result<Option<EntityRecord>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.records.get(id).cloned())
    }

    async fn find_by_github_id(
        &self,
        kind: EntityKind,
        github_id: u64,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .by_github
            .get(&(kind, github_id))
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn find_by_natural_key(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .by_natural
            .get(&(kind, key.to_string()))
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn query_prefix(
        &self,
        kind: EntityKind,
        prefix: &str,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<EntityRecord> = inner
            .records
            .values()
            .filter(|record| {
                record.kind == kind
                    && record
                        .natural_key
                        .as_deref()
                        .is_some_and(|key| key.starts_with(prefix))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
        Ok(rows)
    }

    async fn query_kind(&self, kind: EntityKind) -> Result<Vec<EntityRecord>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<EntityRecord> = inner
            .records
            .values()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn links_from(&self, id: &EntityId, name: &str) -> Result<Vec<EntityId>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .links
            .get(&(id.clone(), name.to_string()))
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn transact(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for op in ops {
            inner.apply(op);
        }
        Ok(())
    }
}
