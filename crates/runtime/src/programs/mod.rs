//! Entity programs and their lifecycle.
//!
//! Programs are looked up by name in a [`ProgramRegistry`] and executed by a
//! [`ProgramRunner`], one task per running program. A program is either a
//! single shared instance (one run at a time) or a factory producing a fresh
//! instance per run.
//!
//! ```text
//! New ──run──▶ Running ──body returns Ok──▶ Finished
//!                 │
//!                 └──cancelled / error / panic──▶ Killed
//! ```
//!
//! Factory programs have no persistent instance and always report
//! [`ProgramState::IsFactory`].

mod error;
mod registry;
mod runner;

pub use error::{CannotRunReason, ProgramError, RegistryError, RunError};
pub use registry::ProgramRegistry;
pub use runner::{ProgramRunner, RunningProgram};

pub(crate) use registry::ProgramSource;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use world_core::{Capabilities, Entity};

use crate::actor::EntityActor;

/// Student-authored control routine attached to one entity.
#[async_trait]
pub trait EntityProgram: Send + Sync {
    /// Whether this program accepts `entity`. Defaults to program hosts.
    fn can_run_on(&self, entity: &Entity) -> bool {
        entity.has(Capabilities::PROGRAM_HOST)
    }

    /// Program body. Runs on its own task until it returns.
    async fn run(&self, actor: EntityActor) -> Result<(), ProgramError>;
}

/// Lifecycle state of a program instance.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramState {
    /// Factory program; no single persistent instance exists.
    IsFactory,
    New,
    Running,
    Finished,
    Killed,
}

impl ProgramState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, ProgramState::Finished | ProgramState::Killed)
    }
}
