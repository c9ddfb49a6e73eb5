//! Immutable records of world-mutating events.
//!
//! Actions are created by the playfield and by entity primitives at the moment
//! an effect is applied and are never mutated afterwards. [`ActionType`] forms
//! a small hierarchy so verifiers can ask for "every move" as well as "every
//! step".

mod log;

pub use log::ActionLog;

use std::fmt;

use crate::entity::Entity;
use crate::types::{Direction, EntityId, PlayfieldId, Position, Tick};

/// Lightweight reference to the entity an action is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EntityRef {
    pub id: EntityId,
    pub kind: &'static str,
}

impl From<&Entity> for EntityRef {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id(),
            kind: entity.kind().name(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.id)
    }
}

/// Payload of an [`Action`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ActionKind {
    Spawn {
        playfield: PlayfieldId,
        position: Position,
    },
    Despawn {
        playfield: PlayfieldId,
        position: Position,
    },
    Step {
        from: Position,
        to: Position,
    },
    Teleport {
        from: Position,
        to: Position,
    },
    Turn {
        from: Direction,
        to: Direction,
    },
    Collect {
        collected: EntityRef,
        collector_position: Position,
        collected_position: Position,
    },
    Drop {
        dropped: EntityRef,
        dropper_position: Position,
        dropped_position: Position,
    },
    /// Free-form record written by tasks and verifiers.
    Custom { description: String },
}

/// Action type tags used for log queries.
///
/// ```text
/// Any
/// ├── Entity
/// │   ├── Spawn, Despawn, Turn, Collect, Drop
/// │   └── Move
/// │       ├── Step
/// │       └── Teleport
/// └── Custom
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum ActionType {
    Any,
    Entity,
    Spawn,
    Despawn,
    Move,
    Step,
    Teleport,
    Turn,
    Collect,
    Drop,
    Custom,
}

impl ActionType {
    pub const fn parent(self) -> Option<ActionType> {
        match self {
            ActionType::Any => None,
            ActionType::Entity | ActionType::Custom => Some(ActionType::Any),
            ActionType::Spawn
            | ActionType::Despawn
            | ActionType::Move
            | ActionType::Turn
            | ActionType::Collect
            | ActionType::Drop => Some(ActionType::Entity),
            ActionType::Step | ActionType::Teleport => Some(ActionType::Move),
        }
    }

    /// Reflexive: every type is a subtype of itself.
    pub fn is_subtype_of(self, ancestor: ActionType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == ancestor {
                return true;
            }
            current = ty.parent();
        }
        false
    }

    pub fn matches(self, concrete: ActionType, include_subtypes: bool) -> bool {
        if include_subtypes {
            concrete.is_subtype_of(self)
        } else {
            concrete == self
        }
    }
}

/// One world-mutating event at a specific simulation tick.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Action {
    tick: Tick,
    entity: Option<EntityRef>,
    kind: ActionKind,
}

impl Action {
    pub fn new(tick: Tick, entity: Option<EntityRef>, kind: ActionKind) -> Self {
        Self { tick, entity, kind }
    }

    pub fn spawn(tick: Tick, entity: &Entity, playfield: PlayfieldId, position: Position) -> Self {
        Self::new(
            tick,
            Some(entity.into()),
            ActionKind::Spawn {
                playfield,
                position,
            },
        )
    }

    pub fn despawn(
        tick: Tick,
        entity: &Entity,
        playfield: PlayfieldId,
        position: Position,
    ) -> Self {
        Self::new(
            tick,
            Some(entity.into()),
            ActionKind::Despawn {
                playfield,
                position,
            },
        )
    }

    pub fn step(tick: Tick, entity: &Entity, from: Position, to: Position) -> Self {
        Self::new(tick, Some(entity.into()), ActionKind::Step { from, to })
    }

    pub fn teleport(tick: Tick, entity: &Entity, from: Position, to: Position) -> Self {
        Self::new(tick, Some(entity.into()), ActionKind::Teleport { from, to })
    }

    pub fn turn(tick: Tick, entity: &Entity, from: Direction, to: Direction) -> Self {
        Self::new(tick, Some(entity.into()), ActionKind::Turn { from, to })
    }

    pub fn collect(
        tick: Tick,
        collector: &Entity,
        collected: &Entity,
        collector_position: Position,
        collected_position: Position,
    ) -> Self {
        Self::new(
            tick,
            Some(collector.into()),
            ActionKind::Collect {
                collected: collected.into(),
                collector_position,
                collected_position,
            },
        )
    }

    pub fn drop_entity(
        tick: Tick,
        dropper: &Entity,
        dropped: &Entity,
        dropper_position: Position,
        dropped_position: Position,
    ) -> Self {
        Self::new(
            tick,
            Some(dropper.into()),
            ActionKind::Drop {
                dropped: dropped.into(),
                dropper_position,
                dropped_position,
            },
        )
    }

    pub fn custom(tick: Tick, entity: Option<&Entity>, description: impl Into<String>) -> Self {
        Self::new(
            tick,
            entity.map(EntityRef::from),
            ActionKind::Custom {
                description: description.into(),
            },
        )
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn entity(&self) -> Option<EntityRef> {
        self.entity
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    /// Concrete type tag of this action.
    pub fn action_type(&self) -> ActionType {
        match self.kind {
            ActionKind::Spawn { .. } => ActionType::Spawn,
            ActionKind::Despawn { .. } => ActionType::Despawn,
            ActionKind::Step { .. } => ActionType::Step,
            ActionKind::Teleport { .. } => ActionType::Teleport,
            ActionKind::Turn { .. } => ActionType::Turn,
            ActionKind::Collect { .. } => ActionType::Collect,
            ActionKind::Drop { .. } => ActionType::Drop,
            ActionKind::Custom { .. } => ActionType::Custom,
        }
    }

    /// `(from, to)` for step and teleport actions.
    pub fn movement(&self) -> Option<(Position, Position)> {
        match self.kind {
            ActionKind::Step { from, to } | ActionKind::Teleport { from, to } => Some((from, to)),
            _ => None,
        }
    }

    pub fn description(&self) -> String {
        let actor = self
            .entity
            .map(|e| e.to_string())
            .unwrap_or_else(|| "simulation".to_string());

        match &self.kind {
            ActionKind::Spawn {
                playfield,
                position,
            } => format!("{actor} spawned in {playfield} at {position}"),
            ActionKind::Despawn {
                playfield,
                position,
            } => format!("{actor} despawned from {playfield} at {position}"),
            ActionKind::Step { from, to } => format!("{actor} stepped from {from} to {to}"),
            ActionKind::Teleport { from, to } => {
                format!("{actor} teleported from {from} to {to}")
            }
            ActionKind::Turn { from, to } => format!("{actor} turned from {from} to {to}"),
            ActionKind::Collect {
                collected,
                collector_position,
                collected_position,
            } => format!(
                "{actor} (at {collector_position}) collected {collected} at {collected_position}"
            ),
            ActionKind::Drop {
                dropped,
                dropper_position,
                dropped_position,
            } => format!(
                "{actor} (at {dropper_position}) dropped {dropped} at {dropped_position}"
            ),
            ActionKind::Custom { description } => format!("{actor}: {description}"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[tick {}] {}", self.tick, self.description())
    }
}
