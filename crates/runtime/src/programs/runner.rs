//! Program lifecycle manager.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinError;
use tracing::{error, info};
use world_core::{Entity, EntityId, SimError};

use super::error::{CannotRunReason, ProgramError, RunError};
use super::registry::ProgramRegistry;
use super::ProgramState;
use crate::actor::ActorContext;
use crate::cancel::CancelToken;
use crate::events::{EventBus, ProgramEvent};

/// Bookkeeping for one program instance.
struct Tracked {
    program: String,
    entity: EntityId,
    state: watch::Sender<ProgramState>,
    cancel: CancelToken,
}

impl Tracked {
    fn new(program: &str, entity: EntityId) -> Self {
        let (state, _) = watch::channel(ProgramState::Running);
        Self {
            program: program.to_string(),
            entity,
            state,
            cancel: CancelToken::new(),
        }
    }

    fn state(&self) -> ProgramState {
        *self.state.borrow()
    }

    fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }
}

#[derive(Default)]
struct Book {
    /// Latest run of each single-instance program.
    singles: HashMap<String, Arc<Tracked>>,
    /// Latest run on each entity.
    entities: HashMap<EntityId, Arc<Tracked>>,
}

struct RunnerInner {
    registry: Arc<ProgramRegistry>,
    actors: ActorContext,
    permits: Arc<Semaphore>,
    book: Mutex<Book>,
    events: Option<EventBus>,
}

impl RunnerInner {
    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, tracked: &Tracked) {
        if let Some(events) = &self.events {
            events.publish(ProgramEvent::StateChanged {
                program: tracked.program.clone(),
                entity: tracked.entity,
                state: tracked.state(),
            });
        }
    }
}

/// Starts, tracks and stops entity programs.
///
/// At most `max_programs` bodies execute at once; further runs are recorded
/// as Running and wait for a free slot.
#[derive(Clone)]
pub struct ProgramRunner {
    inner: Arc<RunnerInner>,
}

impl ProgramRunner {
    pub fn new(registry: Arc<ProgramRegistry>, actors: ActorContext, max_programs: usize) -> Self {
        Self::build(registry, actors, max_programs, None)
    }

    pub fn with_events(
        registry: Arc<ProgramRegistry>,
        actors: ActorContext,
        max_programs: usize,
        events: EventBus,
    ) -> Self {
        Self::build(registry, actors, max_programs, Some(events))
    }

    fn build(
        registry: Arc<ProgramRegistry>,
        actors: ActorContext,
        max_programs: usize,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                registry,
                actors,
                permits: Arc::new(Semaphore::new(max_programs.max(1))),
                book: Mutex::new(Book::default()),
                events,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ProgramRegistry> {
        &self.inner.registry
    }

    /// Current state of a registered program; `None` if unknown.
    pub fn state(&self, name: &str) -> Option<ProgramState> {
        let source = self.inner.registry.lookup(name)?;
        if source.is_factory() {
            return Some(ProgramState::IsFactory);
        }
        Some(
            self.inner
                .book()
                .singles
                .get(name)
                .map_or(ProgramState::New, |tracked| tracked.state()),
        )
    }

    /// Whether the program could be started at all right now.
    pub fn can_run_program(&self, name: &str) -> bool {
        matches!(self.state(name), Some(state) if state != ProgramState::Running)
    }

    /// Whether `run(name, entity)` would be accepted right now.
    pub fn can_run_program_on(&self, name: &str, entity: &Entity) -> bool {
        let Some(source) = self.inner.registry.lookup(name) else {
            return false;
        };
        self.can_run_program(name)
            && !self.entity_busy(entity.id())
            && source.instantiate().can_run_on(entity)
    }

    fn entity_busy(&self, entity: EntityId) -> bool {
        self.inner
            .book()
            .entities
            .get(&entity)
            .is_some_and(|tracked| tracked.is_active())
    }

    /// Program currently (or last) attached to `entity`, with its state.
    pub fn program_of(&self, entity: EntityId) -> Option<(String, ProgramState)> {
        self.inner
            .book()
            .entities
            .get(&entity)
            .map(|tracked| (tracked.program.clone(), tracked.state()))
    }

    /// Number of programs that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.inner
            .book()
            .entities
            .values()
            .filter(|tracked| tracked.is_active())
            .count()
    }

    /// Starts `name` on `entity` on the current tokio runtime.
    pub fn run(&self, name: &str, entity: Arc<Entity>) -> Result<RunningProgram, RunError> {
        let source = self
            .inner
            .registry
            .lookup(name)
            .ok_or_else(|| RunError::NoSuchProgram {
                name: name.to_string(),
            })?;
        let runtime = Handle::try_current().map_err(|_| RunError::NoRuntime)?;
        let program = source.instantiate();
        let cannot_run = |reason| RunError::CannotRun {
            name: name.to_string(),
            reason,
        };

        if !program.can_run_on(&entity) {
            return Err(cannot_run(CannotRunReason::RejectedEntity));
        }

        let tracked = {
            let mut book = self.inner.book();
            if !source.is_factory()
                && book.singles.get(name).is_some_and(|tracked| tracked.is_active())
            {
                return Err(cannot_run(CannotRunReason::AlreadyRunning));
            }
            if book
                .entities
                .get(&entity.id())
                .is_some_and(|tracked| tracked.is_active())
            {
                return Err(cannot_run(CannotRunReason::EntityBusy));
            }

            let tracked = Arc::new(Tracked::new(name, entity.id()));
            if !source.is_factory() {
                book.singles.insert(name.to_string(), tracked.clone());
            }
            book.entities.insert(entity.id(), tracked.clone());
            tracked
        };

        info!(target: "runtime::programs", program = name, entity = %entity, "program started");
        self.inner.publish(&tracked);

        let handle = RunningProgram {
            program: tracked.program.clone(),
            entity: tracked.entity,
            state: tracked.state.subscribe(),
            cancel: tracked.cancel.clone(),
        };

        let actor = self.inner.actors.actor(entity);
        let permits = self.inner.permits.clone();
        let cancel = tracked.cancel.clone();
        let body = async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProgramError::Interrupted),
                permit = permits.acquire_owned() => {
                    permit.map_err(|_| ProgramError::Interrupted)?
                }
            };
            program.run(actor).await
        };
        let task = runtime.spawn(tracked.cancel.clone().scope(body));

        let inner = self.inner.clone();
        runtime.spawn(async move {
            let outcome = task.await;
            let final_state = settle(&tracked, outcome);
            tracked.state.send_replace(final_state);
            inner.publish(&tracked);
        });

        Ok(handle)
    }

    /// Requests cancellation of every active program. Does not wait for them
    /// to stop.
    pub fn force_stop(&self) {
        let active: Vec<Arc<Tracked>> = self
            .inner
            .book()
            .entities
            .values()
            .filter(|tracked| tracked.is_active())
            .cloned()
            .collect();

        for tracked in &active {
            tracked.cancel.cancel();
        }
        info!(target: "runtime::programs", count = active.len(), "force stop requested");
    }
}

impl std::fmt::Debug for ProgramRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramRunner")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

/// Maps the task outcome to a terminal state, reporting defects.
fn settle(
    tracked: &Tracked,
    outcome: Result<Result<(), ProgramError>, JoinError>,
) -> ProgramState {
    let program = tracked.program.as_str();
    let entity = tracked.entity;
    match outcome {
        Ok(Ok(())) => {
            info!(target: "runtime::programs", program, %entity, "program finished");
            ProgramState::Finished
        }
        Ok(Err(err)) if err.is_cancellation() => {
            info!(target: "runtime::programs", program, %entity, reason = %err, "program killed");
            ProgramState::Killed
        }
        Ok(Err(err)) => {
            error!(
                target: "runtime::programs",
                program,
                %entity,
                code = err.error_code(),
                error = %err,
                "program failed"
            );
            ProgramState::Killed
        }
        Err(join) if join.is_panic() => {
            error!(target: "runtime::programs", program, %entity, "program panicked");
            ProgramState::Killed
        }
        Err(_) => {
            info!(target: "runtime::programs", program, %entity, "program task aborted");
            ProgramState::Killed
        }
    }
}

/// Handle to one started program.
#[derive(Clone, Debug)]
pub struct RunningProgram {
    program: String,
    entity: EntityId,
    state: watch::Receiver<ProgramState>,
    cancel: CancelToken,
}

impl RunningProgram {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn state(&self) -> ProgramState {
        *self.state.borrow()
    }

    /// Requests cooperative cancellation of this run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits until the run reaches Finished or Killed.
    pub async fn wait(&self) -> ProgramState {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if state.changed().await.is_err() {
                return *state.borrow();
            }
        }
    }
}
