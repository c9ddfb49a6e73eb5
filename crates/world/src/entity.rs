//! Entities and the capability tags they are classified by.
//!
//! An [`Entity`] never stores its own position. The playfield it is placed on
//! owns the position index; the entity only remembers *which* playfield (by
//! [`PlayfieldId`]) so a second placement can be rejected.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;

use crate::error::PlayfieldError;
use crate::inventory::Inventory;
use crate::types::{Direction, EntityId, PlayfieldId};

static NEXT_ENTITY_ID: AtomicU32 = AtomicU32::new(1);

bitflags! {
    /// Capability tags an entity kind can carry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Capabilities: u8 {
        const MOVABLE      = 1 << 0;
        const SOLID        = 1 << 1;
        const COLLECTABLE  = 1 << 2;
        const PROGRAM_HOST = 1 << 3;
        const COLLECTOR    = 1 << 4;
    }
}

/// Concrete entity variant.
///
/// Exact-type queries compare the whole kind (name and capabilities); the
/// capability set alone answers "any entity that is Solid"-style queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EntityKind {
    name: &'static str,
    capabilities: Capabilities,
}

impl EntityKind {
    pub const fn new(name: &'static str, capabilities: Capabilities) -> Self {
        Self { name, capabilities }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

/// Type filter for playfield and inventory queries.
///
/// `include_subtypes = false` matches only the exact concrete kind, so the
/// abstract filters ([`EntityType::Any`], [`EntityType::With`]) only ever
/// match when subtypes are included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityType {
    Any,
    With(Capabilities),
    Kind(EntityKind),
}

impl EntityType {
    pub fn matches(&self, kind: &EntityKind, include_subtypes: bool) -> bool {
        match self {
            EntityType::Any => include_subtypes,
            EntityType::With(required) => {
                include_subtypes && kind.capabilities().contains(*required)
            }
            EntityType::Kind(expected) => expected == kind,
        }
    }
}

impl From<EntityKind> for EntityType {
    fn from(kind: EntityKind) -> Self {
        EntityType::Kind(kind)
    }
}

/// A world object. Shared as `Arc<Entity>` between the playfield, inventories
/// and the programs driving it.
pub struct Entity {
    id: EntityId,
    kind: EntityKind,
    solid: AtomicBool,
    facing: Mutex<Direction>,
    placement: Mutex<Option<PlayfieldId>>,
    inventory: Option<Mutex<Inventory>>,
}

impl Entity {
    /// Creates a standalone (not yet placed) entity.
    pub fn new(kind: EntityKind) -> Arc<Self> {
        let id = EntityId(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed));
        let inventory = kind
            .capabilities()
            .contains(Capabilities::COLLECTOR)
            .then(|| Mutex::new(Inventory::default()));

        Arc::new(Self {
            id,
            kind,
            solid: AtomicBool::new(true),
            facing: Mutex::new(Direction::default()),
            placement: Mutex::new(None),
            inventory,
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        self.kind.capabilities()
    }

    pub fn has(&self, capability: Capabilities) -> bool {
        self.capabilities().contains(capability)
    }

    /// True iff the kind is Solid and the entity currently reports itself solid.
    pub fn is_currently_solid(&self) -> bool {
        self.has(Capabilities::SOLID) && self.solid.load(Ordering::Acquire)
    }

    /// Toggles conditional solidity. Has no effect on non-Solid kinds.
    pub fn set_solid(&self, solid: bool) {
        self.solid.store(solid, Ordering::Release);
    }

    pub fn facing(&self) -> Direction {
        *lock(&self.facing)
    }

    /// Rotates clockwise and returns `(from, to)`.
    pub fn turn_clockwise(&self) -> (Direction, Direction) {
        let mut facing = lock(&self.facing);
        let from = *facing;
        *facing = from.clockwise_next();
        (from, *facing)
    }

    /// Playfield this entity is currently placed on.
    pub fn placement(&self) -> Option<PlayfieldId> {
        *lock(&self.placement)
    }

    /// Locks the inventory of a collector entity.
    ///
    /// Returns `None` for kinds without the `COLLECTOR` capability.
    pub fn lock_inventory(&self) -> Option<MutexGuard<'_, Inventory>> {
        self.inventory.as_ref().map(lock)
    }

    pub(crate) fn attach(&self, playfield: PlayfieldId) -> Result<(), PlayfieldError> {
        let mut placement = lock(&self.placement);
        match *placement {
            Some(current) if current == playfield => {
                Err(PlayfieldError::AlreadyPlaced { entity: self.id })
            }
            Some(current) => Err(PlayfieldError::OnAnotherPlayfield {
                entity: self.id,
                playfield: current,
            }),
            None => {
                *placement = Some(playfield);
                Ok(())
            }
        }
    }

    pub(crate) fn detach(&self, playfield: PlayfieldId) {
        let mut placement = lock(&self.placement);
        if *placement == Some(playfield) {
            *placement = None;
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind.name())
            .field("placement", &self.placement())
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.name(), self.id)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
