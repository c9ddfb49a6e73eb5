//! Event types for different topics.

use serde::Serialize;
use world_core::{EntityId, Tick};

use crate::programs::ProgramState;

/// Events related to the clock's timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ClockEvent {
    /// The periodic timer was started.
    Started { render_tick: u64, period_ms: u64 },

    /// The timer was halted; the counter is kept.
    Paused { render_tick: u64, last_tick: Tick },

    /// The render period changed.
    PeriodChanged { period_ms: u64 },

    /// The clock was torn down; no further ticks will be processed.
    ShutDown { last_tick: Tick },
}

/// Events related to entity program lifecycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProgramEvent {
    /// A tracked program instance entered a new state.
    StateChanged {
        program: String,
        entity: EntityId,
        state: ProgramState,
    },
}
