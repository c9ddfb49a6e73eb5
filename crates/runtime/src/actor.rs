//! Entity action primitives.
//!
//! An [`EntityActor`] binds one entity to the clock and the playfield it
//! lives on. Tick-synchronized primitives (`sleep`, `move_forward`,
//! `turn_clockwise`) suspend the calling task until their target tick and
//! apply their effect while the clock is held at that tick. Inventory
//! primitives (`collect`, `drop`) are not tick-synchronized; they only take
//! the entity's inventory lock.
//!
//! All primitives of one entity run one after the other, in call order, even
//! when they are issued from several tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use world_core::{
    Action, ActionLog, Capabilities, Direction, Entity, EntityId, EntityType, ErrorSeverity,
    Inventory, Playfield, PlayfieldError, Position, SimError, Tick,
};

use crate::cancel::CancelToken;
use crate::clock::{Clock, ClockError, operation};

/// Simulation ticks a single step takes.
pub const DEFAULT_MOVE_DURATION: u64 = 4;

/// Failures of the entity action primitives.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("sleep duration must be > 0")]
    InvalidSleep,

    #[error("entity {entity} lacks the {capability:?} capability")]
    MissingCapability {
        entity: EntityId,
        capability: Capabilities,
    },

    #[error("illegal move of {entity} from {from} to {to}: cell is solid")]
    IllegalMove {
        entity: EntityId,
        from: Position,
        to: Position,
    },

    #[error("{entity} at {from} cannot move {direction}: edge of the grid")]
    EdgeOfGrid {
        entity: EntityId,
        from: Position,
        direction: Direction,
    },

    #[error("{target} is not collectable")]
    NotCollectable { target: EntityId },

    #[error("{entity} is at {expected} but the target location is {actual}")]
    LocationMismatch {
        entity: EntityId,
        expected: Position,
        actual: Position,
    },

    #[error("{target} is not in the inventory of {entity}")]
    NotInInventory { entity: EntityId, target: EntityId },

    #[error(transparent)]
    Playfield(#[from] PlayfieldError),

    #[error(transparent)]
    Clock(#[from] ClockError),
}

impl SimError for ActionError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidSleep | Self::MissingCapability { .. } => ErrorSeverity::Precondition,
            Self::IllegalMove { .. }
            | Self::EdgeOfGrid { .. }
            | Self::NotCollectable { .. }
            | Self::LocationMismatch { .. }
            | Self::NotInInventory { .. } => ErrorSeverity::DomainRule,
            Self::Playfield(err) => err.severity(),
            Self::Clock(err) => err.severity(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSleep => "ACTION_INVALID_SLEEP",
            Self::MissingCapability { .. } => "ACTION_MISSING_CAPABILITY",
            Self::IllegalMove { .. } => "ACTION_ILLEGAL_MOVE",
            Self::EdgeOfGrid { .. } => "ACTION_EDGE_OF_GRID",
            Self::NotCollectable { .. } => "ACTION_NOT_COLLECTABLE",
            Self::LocationMismatch { .. } => "ACTION_LOCATION_MISMATCH",
            Self::NotInInventory { .. } => "ACTION_NOT_IN_INVENTORY",
            Self::Playfield(err) => err.error_code(),
            Self::Clock(err) => err.error_code(),
        }
    }
}

type OperationQueue = Arc<tokio::sync::Mutex<()>>;

/// Shared wiring for building actors: one clock, one playfield and the
/// per-entity operation queues.
#[derive(Clone)]
pub struct ActorContext {
    clock: Clock,
    playfield: Arc<Playfield>,
    queues: Arc<Mutex<HashMap<EntityId, OperationQueue>>>,
    move_duration: u64,
}

impl ActorContext {
    pub fn new(clock: Clock, playfield: Arc<Playfield>) -> Self {
        Self {
            clock,
            playfield,
            queues: Arc::new(Mutex::new(HashMap::new())),
            move_duration: DEFAULT_MOVE_DURATION,
        }
    }

    /// Overrides the number of ticks a step takes (at least one).
    pub fn with_move_duration(mut self, ticks: u64) -> Self {
        self.move_duration = ticks.max(1);
        self
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn playfield(&self) -> &Arc<Playfield> {
        &self.playfield
    }

    /// Actor for `entity`. Actors for the same entity share one queue.
    pub fn actor(&self, entity: Arc<Entity>) -> EntityActor {
        let queue = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity.id())
            .or_default()
            .clone();

        EntityActor {
            entity,
            clock: self.clock.clone(),
            playfield: self.playfield.clone(),
            queue,
            move_duration: self.move_duration,
        }
    }
}

/// Primitives a program uses to act on the world through its entity.
#[derive(Clone)]
pub struct EntityActor {
    entity: Arc<Entity>,
    clock: Clock,
    playfield: Arc<Playfield>,
    queue: OperationQueue,
    move_duration: u64,
}

impl EntityActor {
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn playfield(&self) -> &Arc<Playfield> {
        &self.playfield
    }

    pub fn log(&self) -> &Arc<ActionLog> {
        self.playfield.log()
    }

    pub fn position(&self) -> Result<Position, ActionError> {
        Ok(self.playfield.entity_position(&self.entity)?)
    }

    pub fn facing(&self) -> Direction {
        self.entity.facing()
    }

    /// Fails with [`ClockError::Interrupted`] if the running program was
    /// cancelled. Long computations between primitives call this to stay
    /// responsive to `force_stop`.
    pub fn check_cancelled(&self) -> Result<(), ActionError> {
        if CancelToken::current_is_cancelled() {
            Err(ClockError::Interrupted.into())
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Tick-synchronized primitives
    // ------------------------------------------------------------------

    /// Suspends for `ticks` simulation ticks. Returns the tick woken at.
    pub async fn sleep(&self, ticks: u64) -> Result<Tick, ActionError> {
        if ticks == 0 {
            return Err(ActionError::InvalidSleep);
        }
        let _turn = self.queue.lock().await;

        let (handle, completion) = operation();
        let target = self.clock.schedule_operation_in_ticks(ticks, completion).await?;
        handle.complete();
        Ok(target)
    }

    /// Whether the cell in front of the entity is free of solid entities.
    pub fn can_move(&self) -> bool {
        if !self.entity.has(Capabilities::MOVABLE) {
            return false;
        }
        self.playfield
            .entity_position(&self.entity)
            .is_ok_and(|here| self.free_cell_ahead(here).is_ok())
    }

    /// Steps one cell in the facing direction.
    ///
    /// The step is applied `move_duration` ticks from now. The target cell is
    /// checked before scheduling. When the barrier opens the step starts from
    /// the entity's position and facing at that tick, and the cell ahead is
    /// checked again.
    pub async fn move_forward(&self) -> Result<Position, ActionError> {
        self.require(Capabilities::MOVABLE)?;
        let _turn = self.queue.lock().await;

        let from = self.playfield.entity_position(&self.entity)?;
        self.free_cell_ahead(from)?;

        let (handle, completion) = operation();
        let target = self.clock.last_tick() + self.move_duration;
        self.clock
            .schedule_operation_at_tick(target, completion)
            .await?;

        match self.apply_step() {
            Ok(position) => {
                handle.complete();
                Ok(position)
            }
            Err(err) => {
                handle.fail(err.to_string());
                Err(err)
            }
        }
    }

    /// Moves forward when possible. `Ok(None)` means the way was blocked.
    pub async fn move_if_possible(&self) -> Result<Option<Position>, ActionError> {
        if !self.can_move() {
            return Ok(None);
        }
        match self.move_forward().await {
            Ok(position) => Ok(Some(position)),
            Err(ActionError::IllegalMove { .. } | ActionError::EdgeOfGrid { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Rotates the facing direction clockwise at the next tick.
    pub async fn turn_clockwise(&self) -> Result<Direction, ActionError> {
        self.require(Capabilities::MOVABLE)?;
        let _turn = self.queue.lock().await;

        let (handle, completion) = operation();
        self.clock.schedule_operation_at_next_tick(completion).await?;

        let (from, to) = self.entity.turn_clockwise();
        self.log()
            .log_action(Action::turn(self.clock.last_tick(), &self.entity, from, to));
        handle.complete();
        Ok(to)
    }

    // ------------------------------------------------------------------
    // Inventory primitives
    // ------------------------------------------------------------------

    /// Collectable entities on the entity's own cell.
    pub fn collectable_entities(
        &self,
        ty: &EntityType,
        include_subtypes: bool,
    ) -> Result<Vec<Arc<Entity>>, ActionError> {
        let here = self.position()?;
        Ok(self
            .playfield
            .entities_of_type_at(here, ty, include_subtypes)
            .into_iter()
            .filter(|e| e.has(Capabilities::COLLECTABLE) && e.id() != self.entity.id())
            .collect())
    }

    /// Entities in the inventory matching `ty`.
    pub fn droppable_entities(
        &self,
        ty: &EntityType,
        include_subtypes: bool,
    ) -> Result<Vec<Arc<Entity>>, ActionError> {
        let inventory = self.inventory()?;
        Ok(inventory.get(ty, include_subtypes))
    }

    /// Takes `target` off the entity's cell into the inventory.
    pub async fn collect(&self, target: &Arc<Entity>) -> Result<(), ActionError> {
        self.require(Capabilities::COLLECTOR)?;
        if !target.has(Capabilities::COLLECTABLE) {
            return Err(ActionError::NotCollectable {
                target: target.id(),
            });
        }
        let _turn = self.queue.lock().await;
        let mut inventory = self.inventory()?;

        let here = self.playfield.entity_position(&self.entity)?;
        let there = self.playfield.entity_position(target)?;
        if here != there {
            return Err(ActionError::LocationMismatch {
                entity: self.entity.id(),
                expected: here,
                actual: there,
            });
        }

        self.playfield.remove_entity(target)?;
        inventory.add(target.clone());
        self.log().log_action(Action::collect(
            self.clock.last_tick(),
            &self.entity,
            target,
            here,
            there,
        ));
        debug!(target: "runtime::actor", collector = %self.entity, collected = %target, "collected");
        Ok(())
    }

    /// Places `target` from the inventory onto `position`, which must be the
    /// entity's own cell.
    pub async fn drop(&self, target: &Arc<Entity>, position: Position) -> Result<(), ActionError> {
        self.require(Capabilities::COLLECTOR)?;
        let _turn = self.queue.lock().await;
        let mut inventory = self.inventory()?;

        let here = self.playfield.entity_position(&self.entity)?;
        if here != position {
            return Err(ActionError::LocationMismatch {
                entity: self.entity.id(),
                expected: here,
                actual: position,
            });
        }
        let Some(item) = inventory.remove(target) else {
            return Err(ActionError::NotInInventory {
                entity: self.entity.id(),
                target: target.id(),
            });
        };

        if let Err(err) = self.playfield.add_entity(position, item.clone()) {
            inventory.add(item);
            return Err(err.into());
        }
        self.log().log_action(Action::drop_entity(
            self.clock.last_tick(),
            &self.entity,
            target,
            here,
            position,
        ));
        debug!(target: "runtime::actor", dropper = %self.entity, dropped = %target, "dropped");
        Ok(())
    }

    /// Drops `target` on the entity's own cell.
    pub async fn drop_here(&self, target: &Arc<Entity>) -> Result<(), ActionError> {
        let here = self.position()?;
        self.drop(target, here).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require(&self, capability: Capabilities) -> Result<(), ActionError> {
        if self.entity.has(capability) {
            Ok(())
        } else {
            Err(ActionError::MissingCapability {
                entity: self.entity.id(),
                capability,
            })
        }
    }

    fn free_cell_ahead(&self, from: Position) -> Result<Position, ActionError> {
        let direction = self.entity.facing();
        let Some(to) = from.adjacent(direction) else {
            return Err(ActionError::EdgeOfGrid {
                entity: self.entity.id(),
                from,
                direction,
            });
        };
        if self.playfield.is_solid_at(to) {
            return Err(ActionError::IllegalMove {
                entity: self.entity.id(),
                from,
                to,
            });
        }
        Ok(to)
    }

    fn apply_step(&self) -> Result<Position, ActionError> {
        let from = self.playfield.entity_position(&self.entity)?;
        let to = self.free_cell_ahead(from)?;
        let step = Action::step(self.clock.last_tick(), &self.entity, from, to);
        self.playfield
            .move_entity_with(&self.entity, to, Some(step))?;
        Ok(to)
    }

    fn inventory(&self) -> Result<MutexGuard<'_, Inventory>, ActionError> {
        self.entity
            .lock_inventory()
            .ok_or(ActionError::MissingCapability {
                entity: self.entity.id(),
                capability: Capabilities::COLLECTOR,
            })
    }
}

impl std::fmt::Debug for EntityActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityActor")
            .field("entity", &self.entity)
            .field("move_duration", &self.move_duration)
            .finish_non_exhaustive()
    }
}
