//! Program registry and lifecycle management.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use runtime::{
    ActorContext, CannotRunReason, Clock, EntityActor, EntityProgram, Event, EventBus,
    ProgramError, ProgramEvent, ProgramRegistry, ProgramRunner, ProgramState, RegistryError,
    RunError, Topic,
};
use world_core::{ActionLog, Capabilities, Entity, EntityKind, Playfield, Position};

const ROBOT: EntityKind = EntityKind::new(
    "Robot",
    Capabilities::MOVABLE.union(Capabilities::PROGRAM_HOST),
);
const DRONE: EntityKind = EntityKind::new(
    "Drone",
    Capabilities::MOVABLE.union(Capabilities::PROGRAM_HOST),
);
const ROCK: EntityKind = EntityKind::new("Rock", Capabilities::SOLID);

/// Sleeps until cancelled.
struct Idle;

#[async_trait]
impl EntityProgram for Idle {
    async fn run(&self, actor: EntityActor) -> Result<(), ProgramError> {
        loop {
            actor.sleep(1).await?;
        }
    }
}

/// Busy-loops between primitives, polling for cancellation.
struct Spinning;

#[async_trait]
impl EntityProgram for Spinning {
    async fn run(&self, actor: EntityActor) -> Result<(), ProgramError> {
        loop {
            actor.check_cancelled()?;
            tokio::task::yield_now().await;
        }
    }
}

struct Quick;

#[async_trait]
impl EntityProgram for Quick {
    async fn run(&self, _actor: EntityActor) -> Result<(), ProgramError> {
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl EntityProgram for Failing {
    async fn run(&self, _actor: EntityActor) -> Result<(), ProgramError> {
        Err(ProgramError::failed("gave up"))
    }
}

struct Panicking;

#[async_trait]
impl EntityProgram for Panicking {
    async fn run(&self, _actor: EntityActor) -> Result<(), ProgramError> {
        panic!("program bug");
    }
}

/// Accepts robots only.
struct RobotsOnly;

#[async_trait]
impl EntityProgram for RobotsOnly {
    fn can_run_on(&self, entity: &Entity) -> bool {
        entity.kind() == ROBOT
    }

    async fn run(&self, _actor: EntityActor) -> Result<(), ProgramError> {
        Ok(())
    }
}

struct Marking(Arc<AtomicBool>);

#[async_trait]
impl EntityProgram for Marking {
    async fn run(&self, _actor: EntityActor) -> Result<(), ProgramError> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn runner_with(registry: ProgramRegistry, max_programs: usize) -> (ProgramRunner, Arc<Playfield>) {
    let clock = Clock::new(Duration::from_millis(10));
    let log = Arc::new(ActionLog::new());
    log.set_console_output(false);
    let playfield = Arc::new(Playfield::new(log, Arc::new(clock.clone())));
    let actors = ActorContext::new(clock, playfield.clone());
    (
        ProgramRunner::new(Arc::new(registry), actors, max_programs),
        playfield,
    )
}

fn placed(playfield: &Playfield, kind: EntityKind, x: i32) -> Arc<Entity> {
    let entity = Entity::new(kind);
    playfield
        .add_entity(Position::new(x, 0), entity.clone())
        .unwrap();
    entity
}

#[test]
fn registry_rejects_duplicate_names() {
    let registry = ProgramRegistry::new();
    registry.register("idle", Idle).unwrap();
    assert_eq!(
        registry.register("idle", Quick),
        Err(RegistryError::NameInUse {
            name: "idle".to_string()
        })
    );
    assert_eq!(
        registry.register_factory("idle", || Quick),
        Err(RegistryError::NameInUse {
            name: "idle".to_string()
        })
    );
    registry.register_factory("quick", || Quick).unwrap();

    assert_eq!(registry.program_names(), vec!["idle", "quick"]);
    assert!(registry.is_factory("quick"));
    assert!(!registry.is_factory("idle"));
    assert!(!registry.contains("missing"));
}

#[test]
fn registry_lists_programs_accepting_an_entity() {
    let registry = ProgramRegistry::new();
    registry.register("robots", RobotsOnly).unwrap();
    registry.register("anyone", Quick).unwrap();

    assert_eq!(
        registry.programs_for_entity(&Entity::new(ROBOT)),
        vec!["anyone", "robots"]
    );
    assert_eq!(
        registry.programs_for_entity(&Entity::new(DRONE)),
        vec!["anyone"]
    );
    assert!(registry.programs_for_entity(&Entity::new(ROCK)).is_empty());
}

#[tokio::test]
async fn single_instance_program_runs_once_at_a_time() {
    let registry = ProgramRegistry::new();
    registry.register("idle", Idle).unwrap();
    let (runner, playfield) = runner_with(registry, 4);
    let first = placed(&playfield, ROBOT, 0);
    let second = placed(&playfield, ROBOT, 1);

    assert_eq!(runner.state("idle"), Some(ProgramState::New));
    let running = runner.run("idle", first.clone()).unwrap();
    assert_eq!(running.state(), ProgramState::Running);
    assert_eq!(runner.state("idle"), Some(ProgramState::Running));
    assert!(!runner.can_run_program("idle"));

    assert_eq!(
        runner.run("idle", second.clone()).unwrap_err(),
        RunError::CannotRun {
            name: "idle".to_string(),
            reason: CannotRunReason::AlreadyRunning
        }
    );
    assert_eq!(runner.state("idle"), Some(ProgramState::Running));

    runner.force_stop();
    assert_eq!(running.wait().await, ProgramState::Killed);
    assert_eq!(runner.state("idle"), Some(ProgramState::Killed));
    assert!(runner.can_run_program_on("idle", &second));
}

#[tokio::test]
async fn finished_program_can_run_again() {
    let registry = ProgramRegistry::new();
    registry.register("quick", Quick).unwrap();
    let (runner, playfield) = runner_with(registry, 4);
    let robot = placed(&playfield, ROBOT, 0);

    let run = runner.run("quick", robot.clone()).unwrap();
    assert_eq!(run.wait().await, ProgramState::Finished);
    assert_eq!(runner.state("quick"), Some(ProgramState::Finished));
    assert_eq!(
        runner.program_of(robot.id()),
        Some(("quick".to_string(), ProgramState::Finished))
    );

    let again = runner.run("quick", robot).unwrap();
    assert_eq!(again.wait().await, ProgramState::Finished);
    assert_eq!(runner.active_count(), 0);
}

#[tokio::test]
async fn failing_and_panicking_programs_end_killed() {
    let registry = ProgramRegistry::new();
    registry.register("failing", Failing).unwrap();
    registry.register("panicking", Panicking).unwrap();
    let (runner, playfield) = runner_with(registry, 4);

    let failing = runner
        .run("failing", placed(&playfield, ROBOT, 0))
        .unwrap();
    let panicking = runner
        .run("panicking", placed(&playfield, ROBOT, 1))
        .unwrap();

    assert_eq!(failing.wait().await, ProgramState::Killed);
    assert_eq!(panicking.wait().await, ProgramState::Killed);
    assert!(runner.can_run_program("panicking"));
}

#[tokio::test]
async fn busy_program_polling_for_cancellation_is_killed() {
    let registry = ProgramRegistry::new();
    registry.register("spinning", Spinning).unwrap();
    let (runner, playfield) = runner_with(registry, 4);
    let robot = placed(&playfield, ROBOT, 0);

    let run = runner.run("spinning", robot.clone()).unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(run.state(), ProgramState::Running);

    run.cancel();
    assert_eq!(run.wait().await, ProgramState::Killed);
    assert!(runner.can_run_program_on("spinning", &robot));
}

#[tokio::test]
async fn factory_programs_run_concurrently_but_not_on_a_busy_entity() {
    let registry = ProgramRegistry::new();
    registry.register_factory("idle", || Idle).unwrap();
    registry.register("quick", Quick).unwrap();
    let (runner, playfield) = runner_with(registry, 4);
    let first = placed(&playfield, ROBOT, 0);
    let second = placed(&playfield, ROBOT, 1);

    assert_eq!(runner.state("idle"), Some(ProgramState::IsFactory));
    let a = runner.run("idle", first.clone()).unwrap();
    let b = runner.run("idle", second).unwrap();
    assert_eq!(runner.state("idle"), Some(ProgramState::IsFactory));
    assert_eq!(runner.active_count(), 2);

    assert_eq!(
        runner.run("quick", first.clone()).unwrap_err(),
        RunError::CannotRun {
            name: "quick".to_string(),
            reason: CannotRunReason::EntityBusy
        }
    );
    assert!(!runner.can_run_program_on("quick", &first));

    a.cancel();
    assert_eq!(a.wait().await, ProgramState::Killed);
    assert_eq!(b.state(), ProgramState::Running);
    assert!(runner.can_run_program_on("quick", &first));

    runner.force_stop();
    assert_eq!(b.wait().await, ProgramState::Killed);
}

#[tokio::test]
async fn rejected_and_unknown_programs_are_not_started() {
    let registry = ProgramRegistry::new();
    registry.register("robots", RobotsOnly).unwrap();
    registry.register("quick", Quick).unwrap();
    let (runner, playfield) = runner_with(registry, 4);

    assert_eq!(
        runner
            .run("robots", placed(&playfield, DRONE, 0))
            .unwrap_err(),
        RunError::CannotRun {
            name: "robots".to_string(),
            reason: CannotRunReason::RejectedEntity
        }
    );
    assert!(matches!(
        runner.run("quick", placed(&playfield, ROCK, 1)),
        Err(RunError::CannotRun {
            reason: CannotRunReason::RejectedEntity,
            ..
        })
    ));
    assert_eq!(
        runner
            .run("missing", placed(&playfield, ROBOT, 2))
            .unwrap_err(),
        RunError::NoSuchProgram {
            name: "missing".to_string()
        }
    );
    assert_eq!(runner.state("missing"), None);
    assert_eq!(runner.state("robots"), Some(ProgramState::New));
}

#[tokio::test]
async fn programs_beyond_the_limit_wait_for_a_slot() {
    let started = Arc::new(AtomicBool::new(false));
    let registry = ProgramRegistry::new();
    registry.register("idle", Idle).unwrap();
    registry
        .register("marking", Marking(started.clone()))
        .unwrap();
    let (runner, playfield) = runner_with(registry, 1);

    let idle = runner.run("idle", placed(&playfield, ROBOT, 0)).unwrap();
    let queued = runner
        .run("marking", placed(&playfield, ROBOT, 1))
        .unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(queued.state(), ProgramState::Running);
    assert!(!started.load(Ordering::SeqCst));

    idle.cancel();
    assert_eq!(idle.wait().await, ProgramState::Killed);
    assert_eq!(queued.wait().await, ProgramState::Finished);
    assert!(started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn force_stop_kills_programs_still_waiting_for_a_slot() {
    let started = Arc::new(AtomicBool::new(false));
    let registry = ProgramRegistry::new();
    registry.register("idle", Idle).unwrap();
    registry
        .register("marking", Marking(started.clone()))
        .unwrap();
    let (runner, playfield) = runner_with(registry, 1);

    let idle = runner.run("idle", placed(&playfield, ROBOT, 0)).unwrap();
    let queued = runner
        .run("marking", placed(&playfield, ROBOT, 1))
        .unwrap();
    tokio::task::yield_now().await;

    runner.force_stop();
    assert_eq!(idle.wait().await, ProgramState::Killed);
    assert_eq!(queued.wait().await, ProgramState::Killed);
    assert!(!started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn state_changes_are_published() {
    let events = EventBus::new();
    let mut rx = events.subscribe(Topic::Programs);

    let registry = Arc::new(ProgramRegistry::new());
    registry.register("quick", Quick).unwrap();
    let clock = Clock::default();
    let log = Arc::new(ActionLog::new());
    log.set_console_output(false);
    let playfield = Arc::new(Playfield::new(log, Arc::new(clock.clone())));
    let runner = ProgramRunner::with_events(
        registry,
        ActorContext::new(clock, playfield.clone()),
        2,
        events,
    );

    let robot = placed(&playfield, ROBOT, 0);
    runner.run("quick", robot.clone()).unwrap().wait().await;

    let mut states = Vec::new();
    for _ in 0..2 {
        match rx.recv().await.unwrap() {
            Event::Program(ProgramEvent::StateChanged {
                program,
                entity,
                state,
            }) => {
                assert_eq!(program, "quick");
                assert_eq!(entity, robot.id());
                states.push(state);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(states, vec![ProgramState::Running, ProgramState::Finished]);
}
