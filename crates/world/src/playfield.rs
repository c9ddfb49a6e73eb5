//! The spatial store: canonical entity positions plus a per-cell type index.
//!
//! Both indexes live behind one coarse lock, so every mutation is observed
//! atomically. Each mutation appends the matching [`Action`] to the shared
//! [`ActionLog`] while the lock is still held, so log order equals mutation
//! order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::action::{Action, ActionLog};
use crate::buckets::KindBuckets;
use crate::entity::{Entity, EntityType};
use crate::error::PlayfieldError;
use crate::types::{Direction, EntityId, PlayfieldId, Position, Tick};

static NEXT_PLAYFIELD_ID: AtomicU32 = AtomicU32::new(1);

/// Supplies the simulation tick stamped onto actions the playfield logs.
pub trait TickSource: Send + Sync {
    fn current_tick(&self) -> Tick;
}

/// Tick source advanced by hand. Used by tools and tests that drive a
/// playfield without a clock.
#[derive(Debug, Default)]
pub struct ManualTicks(AtomicU64);

impl ManualTicks {
    pub fn new(start: Tick) -> Self {
        Self(AtomicU64::new(start.value()))
    }

    pub fn set(&self, tick: Tick) {
        self.0.store(tick.value(), Ordering::Release);
    }

    pub fn advance(&self, by: u64) -> Tick {
        Tick(self.0.fetch_add(by, Ordering::AcqRel).saturating_add(by))
    }
}

impl TickSource for ManualTicks {
    fn current_tick(&self) -> Tick {
        Tick(self.0.load(Ordering::Acquire))
    }
}

/// Drawable state of one placed entity, handed to the render hook.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: &'static str,
    pub position: Position,
    pub facing: Direction,
}

#[derive(Default)]
struct Index {
    positions: HashMap<EntityId, (Position, Arc<Entity>)>,
    cells: HashMap<Position, KindBuckets>,
}

impl Index {
    fn insert_at(&mut self, position: Position, entity: Arc<Entity>) {
        self.cells
            .entry(position)
            .or_default()
            .insert(entity.clone());
        self.positions.insert(entity.id(), (position, entity));
    }

    fn remove_from_cell(&mut self, position: Position, entity: &Entity) {
        if let Some(cell) = self.cells.get_mut(&position) {
            cell.remove(entity);
            if cell.is_empty() {
                self.cells.remove(&position);
            }
        }
    }

    fn position_of(&self, entity: &Entity) -> Result<Position, PlayfieldError> {
        self.positions
            .get(&entity.id())
            .map(|(position, _)| *position)
            .ok_or(PlayfieldError::NotPlaced {
                entity: entity.id(),
            })
    }

    fn sorted_entities(&self) -> Vec<Arc<Entity>> {
        let mut entities: Vec<Arc<Entity>> = self
            .positions
            .values()
            .map(|(_, entity)| entity.clone())
            .collect();
        entities.sort_by_key(|entity| entity.id());
        entities
    }
}

/// Shared 2-D world.
pub struct Playfield {
    id: PlayfieldId,
    index: Mutex<Index>,
    log: Arc<ActionLog>,
    ticks: Arc<dyn TickSource>,
}

impl Playfield {
    pub fn new(log: Arc<ActionLog>, ticks: Arc<dyn TickSource>) -> Self {
        Self {
            id: PlayfieldId(NEXT_PLAYFIELD_ID.fetch_add(1, Ordering::Relaxed)),
            index: Mutex::new(Index::default()),
            log,
            ticks,
        }
    }

    pub fn id(&self) -> PlayfieldId {
        self.id
    }

    pub fn log(&self) -> &Arc<ActionLog> {
        &self.log
    }

    pub fn current_tick(&self) -> Tick {
        self.ticks.current_tick()
    }

    /// Places a standalone entity and logs a Spawn action.
    pub fn add_entity(&self, position: Position, entity: Arc<Entity>) -> Result<(), PlayfieldError> {
        let mut index = self.lock();
        if index.positions.contains_key(&entity.id()) {
            return Err(PlayfieldError::AlreadyPlaced {
                entity: entity.id(),
            });
        }
        entity.attach(self.id)?;

        self.log
            .log_action(Action::spawn(self.current_tick(), &entity, self.id, position));
        index.insert_at(position, entity);
        Ok(())
    }

    /// Moves a placed entity and logs a Teleport action.
    pub fn move_entity(&self, entity: &Entity, to: Position) -> Result<Position, PlayfieldError> {
        self.move_entity_with(entity, to, None)
    }

    /// Moves a placed entity, logging `action` instead of the default Teleport.
    ///
    /// The supplied action must be a move of `entity` from its current
    /// position to `to`; otherwise nothing changes. Returns the old position.
    pub fn move_entity_with(
        &self,
        entity: &Entity,
        to: Position,
        action: Option<Action>,
    ) -> Result<Position, PlayfieldError> {
        let mut index = self.lock();
        let from = index.position_of(entity)?;

        let action = match action {
            Some(action) => {
                let describes_move = action.movement() == Some((from, to))
                    && action.entity().map(|e| e.id) == Some(entity.id());
                if !describes_move {
                    return Err(PlayfieldError::MoveActionMismatch {
                        entity: entity.id(),
                        from,
                        to,
                    });
                }
                action
            }
            None => Action::teleport(self.current_tick(), entity, from, to),
        };

        let Some((_, handle)) = index.positions.remove(&entity.id()) else {
            return Err(PlayfieldError::NotPlaced {
                entity: entity.id(),
            });
        };
        index.remove_from_cell(from, entity);
        index.insert_at(to, handle);
        self.log.log_action(action);
        Ok(from)
    }

    /// Takes an entity off the field and logs a Despawn action. Returns the
    /// position it was removed from.
    pub fn remove_entity(&self, entity: &Entity) -> Result<Position, PlayfieldError> {
        let mut index = self.lock();
        let position = index.position_of(entity)?;

        index.positions.remove(&entity.id());
        index.remove_from_cell(position, entity);
        entity.detach(self.id);
        self.log
            .log_action(Action::despawn(self.current_tick(), entity, self.id, position));
        Ok(position)
    }

    pub fn entities_at(&self, position: Position) -> Vec<Arc<Entity>> {
        self.lock()
            .cells
            .get(&position)
            .map(|cell| cell.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entities_of_type_at(
        &self,
        position: Position,
        ty: &EntityType,
        include_subtypes: bool,
    ) -> Vec<Arc<Entity>> {
        self.lock()
            .cells
            .get(&position)
            .map(|cell| cell.of_type(ty, include_subtypes))
            .unwrap_or_default()
    }

    /// Every placed entity, ordered by id.
    pub fn all_entities(&self) -> Vec<Arc<Entity>> {
        self.lock().sorted_entities()
    }

    pub fn all_entities_of_type(&self, ty: &EntityType, include_subtypes: bool) -> Vec<Arc<Entity>> {
        self.lock()
            .sorted_entities()
            .into_iter()
            .filter(|entity| ty.matches(&entity.kind(), include_subtypes))
            .collect()
    }

    pub fn entity_position(&self, entity: &Entity) -> Result<Position, PlayfieldError> {
        self.lock().position_of(entity)
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.lock().positions.contains_key(&entity.id())
    }

    /// True iff some entity at `position` has the Solid tag and currently
    /// reports itself solid.
    pub fn is_solid_at(&self, position: Position) -> bool {
        self.lock()
            .cells
            .get(&position)
            .is_some_and(|cell| cell.iter().any(|entity| entity.is_currently_solid()))
    }

    /// Number of occupied cells.
    pub fn occupied_cells(&self) -> usize {
        self.lock().cells.len()
    }

    pub fn len(&self) -> usize {
        self.lock().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().positions.is_empty()
    }

    pub fn snapshot(&self) -> Vec<EntitySnapshot> {
        let index = self.lock();
        let mut snapshot: Vec<EntitySnapshot> = index
            .positions
            .values()
            .map(|(position, entity)| EntitySnapshot {
                id: entity.id(),
                kind: entity.kind().name(),
                position: *position,
                facing: entity.facing(),
            })
            .collect();
        snapshot.sort_by_key(|s| s.id);
        snapshot
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Playfield {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playfield")
            .field("id", &self.id)
            .field("entities", &self.len())
            .finish()
    }
}
