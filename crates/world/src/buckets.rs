//! Type-bucketed entity lists shared by playfield cells and inventories.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entity::{Entity, EntityKind, EntityType};

/// Entities grouped by concrete kind, each bucket in insertion order.
///
/// Empty buckets are removed eagerly so [`KindBuckets::is_empty`] is exact.
#[derive(Clone, Debug, Default)]
pub struct KindBuckets {
    buckets: BTreeMap<EntityKind, Vec<Arc<Entity>>>,
}

impl KindBuckets {
    pub fn insert(&mut self, entity: Arc<Entity>) {
        self.buckets
            .entry(entity.kind())
            .or_default()
            .push(entity);
    }

    /// Removes the entity; returns it if it was present.
    pub fn remove(&mut self, entity: &Entity) -> Option<Arc<Entity>> {
        let kind = entity.kind();
        let bucket = self.buckets.get_mut(&kind)?;
        let index = bucket.iter().position(|e| e.id() == entity.id())?;
        let removed = bucket.remove(index);
        if bucket.is_empty() {
            self.buckets.remove(&kind);
        }
        Some(removed)
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.buckets
            .get(&entity.kind())
            .is_some_and(|bucket| bucket.iter().any(|e| e.id() == entity.id()))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> + '_ {
        self.buckets.values().flatten()
    }

    pub fn of_type(&self, ty: &EntityType, include_subtypes: bool) -> Vec<Arc<Entity>> {
        self.buckets
            .iter()
            .filter(|(kind, _)| ty.matches(kind, include_subtypes))
            .flat_map(|(_, bucket)| bucket.iter().cloned())
            .collect()
    }
}
