use std::sync::Arc;

use crate::buckets::KindBuckets;
use crate::entity::{Entity, EntityType};

/// Entities carried by a collector, partitioned by kind like a playfield cell.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    items: KindBuckets,
}

impl Inventory {
    pub fn add(&mut self, entity: Arc<Entity>) {
        self.items.insert(entity);
    }

    pub fn remove(&mut self, entity: &Entity) -> Option<Arc<Entity>> {
        self.items.remove(entity)
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.items.contains(entity)
    }

    pub fn get(&self, ty: &EntityType, include_subtypes: bool) -> Vec<Arc<Entity>> {
        self.items.of_type(ty, include_subtypes)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
