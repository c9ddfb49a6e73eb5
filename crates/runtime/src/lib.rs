//! Async simulation runtime.
//!
//! This crate drives the world defined in `world-core` on tokio:
//! - [`Clock`] fires render ticks, derives simulation ticks and exposes the
//!   scheduling barrier that lines program actions up with tick boundaries.
//! - [`EntityActor`] holds the primitives programs call (`sleep`,
//!   `move_forward`, `turn_clockwise`, `collect`, `drop`).
//! - [`ProgramRunner`] starts programs from a [`ProgramRegistry`], tracks
//!   their state and cancels them cooperatively through [`CancelToken`].
//! - [`Simulation`] assembles all of it through [`SimulationBuilder`].
pub mod actor;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod events;
pub mod hooks;
pub mod programs;
pub mod simulation;
pub mod verifier;

pub use actor::{ActionError, ActorContext, DEFAULT_MOVE_DURATION, EntityActor};
pub use cancel::CancelToken;
pub use clock::{
    Clock, ClockError, Completion, DEFAULT_RENDER_TICK, MAX_RENDER_TICK, MIN_RENDER_TICK,
    OperationHandle, RENDER_TICKS_PER_SIM_TICK, TickListener, operation,
};
pub use config::SimulationConfig;
pub use events::{ClockEvent, Event, EventBus, ProgramEvent, Topic};
pub use hooks::{RenderHook, TraceRenderHook, install_render_hook};
pub use programs::{
    CannotRunReason, EntityProgram, ProgramError, ProgramRegistry, ProgramRunner, ProgramState,
    RegistryError, RunError, RunningProgram,
};
pub use simulation::{BuildError, Simulation, SimulationBuilder};
pub use verifier::{TaskVerifier, VerificationStatus};
