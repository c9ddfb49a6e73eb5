//! Runtime-free world model for the tick simulation.
//!
//! `world-core` holds the data every other crate mutates or inspects: grid
//! positions, entities with their capability tags, the [`Playfield`] spatial
//! store and the append-only [`ActionLog`]. Nothing here spawns tasks or
//! waits on time; the current simulation tick is read through the
//! [`TickSource`] seam that the runtime's clock implements.
pub mod action;
pub mod buckets;
pub mod entity;
pub mod error;
pub mod inventory;
pub mod playfield;
pub mod types;

pub use action::{Action, ActionKind, ActionLog, ActionType, EntityRef};
pub use buckets::KindBuckets;
pub use entity::{Capabilities, Entity, EntityKind, EntityType};
pub use error::{ErrorSeverity, PlayfieldError, SimError};
pub use inventory::Inventory;
pub use playfield::{EntitySnapshot, ManualTicks, Playfield, TickSource};
pub use types::{Direction, EntityId, PlayfieldId, Position, Tick};
