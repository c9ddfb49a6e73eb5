//! Simulation assembly.
//!
//! A [`Simulation`] owns one run: the clock, the action log, the playfield,
//! the program registry and runner, and the event bus they publish on. The
//! clock is the playfield's tick source, so every logged action carries the
//! simulation tick it happened at.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;
use world_core::{ActionLog, Entity, Playfield};

use crate::actor::{ActorContext, EntityActor};
use crate::clock::{Clock, ClockError};
use crate::config::SimulationConfig;
use crate::events::{Event, EventBus, Topic};
use crate::hooks::{RenderHook, install_render_hook};
use crate::programs::{
    EntityProgram, ProgramRegistry, ProgramRunner, ProgramSource, RegistryError, RunError,
    RunningProgram,
};
use crate::verifier::{TaskVerifier, VerificationStatus};

/// Failures while assembling a simulation.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Clock(#[from] ClockError),
}

/// One assembled simulation run.
pub struct Simulation {
    config: SimulationConfig,
    clock: Clock,
    log: Arc<ActionLog>,
    playfield: Arc<Playfield>,
    actors: ActorContext,
    runner: ProgramRunner,
    events: EventBus,
}

impl Simulation {
    /// Create a new simulation builder
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn log(&self) -> &Arc<ActionLog> {
        &self.log
    }

    pub fn playfield(&self) -> &Arc<Playfield> {
        &self.playfield
    }

    pub fn registry(&self) -> &Arc<ProgramRegistry> {
        self.runner.registry()
    }

    pub fn runner(&self) -> &ProgramRunner {
        &self.runner
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to events from a specific topic
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.events.subscribe(topic)
    }

    /// Action primitives for `entity`.
    pub fn actor(&self, entity: Arc<Entity>) -> EntityActor {
        self.actors.actor(entity)
    }

    /// Starts the registered program `name` on `entity`.
    pub fn run_program(&self, name: &str, entity: Arc<Entity>) -> Result<RunningProgram, RunError> {
        self.runner.run(name, entity)
    }

    pub fn verify(&self, verifier: &dyn TaskVerifier) -> VerificationStatus {
        verifier.verify(&self.log, &self.playfield)
    }

    /// Requests every program to stop, then shuts the clock down.
    pub fn stop(&self) {
        self.runner.force_stop();
        self.clock.shutdown();
        info!(
            target: "runtime::simulation",
            actions = self.log.len(),
            last_tick = %self.clock.last_tick(),
            "simulation stopped"
        );
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("clock", &self.clock)
            .field("playfield", &self.playfield)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Simulation`] with flexible configuration.
pub struct SimulationBuilder {
    config: SimulationConfig,
    render_hook: Option<Arc<dyn RenderHook>>,
    programs: Vec<(String, ProgramSource)>,
}

impl SimulationBuilder {
    fn new() -> Self {
        Self {
            config: SimulationConfig::default(),
            render_hook: None,
            programs: Vec::new(),
        }
    }

    /// Override simulation configuration
    pub fn config(mut self, config: SimulationConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the hook fed with a playfield snapshot on every render tick
    pub fn render_hook(mut self, hook: impl RenderHook + 'static) -> Self {
        self.render_hook = Some(Arc::new(hook));
        self
    }

    /// Register a single-instance program
    pub fn program(mut self, name: impl Into<String>, program: impl EntityProgram + 'static) -> Self {
        self.programs
            .push((name.into(), ProgramSource::Single(Arc::new(program))));
        self
    }

    /// Register a program instantiated afresh for every run
    pub fn program_factory<F, P>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: EntityProgram + 'static,
    {
        self.programs.push((
            name.into(),
            ProgramSource::Factory(Arc::new(move || Box::new(factory()) as Box<dyn EntityProgram>)),
        ));
        self
    }

    /// Assemble the simulation. Starting the clock (when `autostart` is set)
    /// requires a tokio runtime.
    pub fn build(self) -> Result<Simulation, BuildError> {
        let config = self.config;
        let events = EventBus::with_capacity(config.event_buffer_size);

        let clock = Clock::with_events(config.render_tick, events.clone());
        let log = Arc::new(ActionLog::new());
        log.set_console_output(config.action_console);
        let playfield = Arc::new(Playfield::new(log.clone(), Arc::new(clock.clone())));

        let registry = Arc::new(ProgramRegistry::new());
        for (name, source) in self.programs {
            registry.insert(name, source)?;
        }

        let actors = ActorContext::new(clock.clone(), playfield.clone())
            .with_move_duration(config.move_duration_ticks);
        let runner = ProgramRunner::with_events(
            registry,
            actors.clone(),
            config.max_programs,
            events.clone(),
        );

        if let Some(hook) = self.render_hook {
            install_render_hook(&clock, &playfield, hook)?;
        }
        if config.autostart {
            clock.start()?;
        }

        info!(
            target: "runtime::simulation",
            period_ms = config.render_tick.as_millis() as u64,
            move_duration = config.move_duration_ticks,
            max_programs = config.max_programs,
            "simulation assembled"
        );

        Ok(Simulation {
            config,
            clock,
            log,
            playfield,
            actors,
            runner,
            events,
        })
    }
}
