//! Demo binary: one robot sweeping a corridor for coins.
//!
//! Assembles a simulation from `SIM_*` environment variables (a `.env` file
//! is honoured), runs the sweeper program on the robot and prints the
//! verifier's verdict together with the recorded action log as JSON.
//!
//! ```bash
//! RUST_LOG=runtime=debug SIM_RENDER_TICK_MS=20 cargo run -p sim-cli
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use runtime::{
    EntityActor, EntityProgram, ProgramError, Simulation, SimulationConfig, TraceRenderHook,
    VerificationStatus,
};
use world_core::{
    Action, ActionLog, ActionType, Capabilities, Entity, EntityKind, EntityType, Playfield,
    Position,
};

const ROBOT: EntityKind = EntityKind::new(
    "Robot",
    Capabilities::MOVABLE
        .union(Capabilities::PROGRAM_HOST)
        .union(Capabilities::COLLECTOR),
);
const COIN: EntityKind = EntityKind::new("Coin", Capabilities::COLLECTABLE);
const WALL: EntityKind = EntityKind::new("Wall", Capabilities::SOLID);

const CORRIDOR: i32 = 8;
const COINS: [i32; 3] = [2, 3, 6];

/// Simulation ticks the sweep may take before the run is abandoned.
const TICK_BUDGET: u32 = 200;

/// Walks east until blocked, collecting every coin it steps on.
struct Sweeper;

#[async_trait]
impl EntityProgram for Sweeper {
    fn can_run_on(&self, entity: &Entity) -> bool {
        entity.has(Capabilities::COLLECTOR | Capabilities::MOVABLE)
    }

    async fn run(&self, actor: EntityActor) -> Result<(), ProgramError> {
        loop {
            actor.check_cancelled()?;
            for coin in actor.collectable_entities(&EntityType::Kind(COIN), false)? {
                actor.collect(&coin).await?;
            }
            if actor.move_if_possible().await?.is_none() {
                break;
            }
        }

        let carried = actor.droppable_entities(&EntityType::Any, true)?.len();
        actor.log().log_action(Action::custom(
            actor.clock().last_tick(),
            Some(actor.entity().as_ref()),
            format!("sweep finished carrying {carried} coins"),
        ));
        Ok(())
    }
}

fn all_coins_collected(log: &ActionLog, playfield: &Playfield) -> VerificationStatus {
    let collected = log.actions_of_type(ActionType::Collect, false).len();
    let left = playfield
        .all_entities_of_type(&EntityType::Kind(COIN), false)
        .len();

    if left == 0 && collected == COINS.len() {
        VerificationStatus::Successful
    } else if log.actions_of_type(ActionType::Custom, false).is_empty() {
        VerificationStatus::Undecided
    } else {
        VerificationStatus::failed(format!("{left} coins left in the corridor"))
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn populate(sim: &Simulation) -> Result<Arc<Entity>> {
    let playfield = sim.playfield();

    let robot = Entity::new(ROBOT);
    playfield.add_entity(Position::ORIGIN, robot.clone())?;
    for x in COINS {
        playfield.add_entity(Position::new(x, 0), Entity::new(COIN))?;
    }
    for x in -1..=CORRIDOR {
        playfield.add_entity(Position::new(x, -1), Entity::new(WALL))?;
        playfield.add_entity(Position::new(x, 1), Entity::new(WALL))?;
    }
    playfield.add_entity(Position::new(-1, 0), Entity::new(WALL))?;
    playfield.add_entity(Position::new(CORRIDOR, 0), Entity::new(WALL))?;

    Ok(robot)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let config = SimulationConfig::from_env();
    tracing::info!(?config, "Starting sweeper demo");

    let sim = Simulation::builder()
        .config(config)
        .render_hook(TraceRenderHook)
        .program("sweeper", Sweeper)
        .build()
        .context("failed to assemble simulation")?;

    let robot = populate(&sim)?;
    tracing::info!(
        entities = sim.playfield().len(),
        programs = ?sim.registry().programs_for_entity(&robot),
        "World populated"
    );

    if !sim.clock().is_running() {
        sim.clock().start()?;
    }
    let run = sim.run_program("sweeper", robot)?;

    let budget = sim.clock().simulation_tick_period() * TICK_BUDGET;
    match tokio::time::timeout(budget, run.wait()).await {
        Ok(state) => tracing::info!(%state, "Sweeper ended"),
        Err(_) => tracing::warn!(?budget, "Sweeper did not finish in time"),
    }

    sim.stop();
    // Let cancelled programs observe the shutdown before reporting.
    let _ = tokio::time::timeout(Duration::from_secs(1), run.wait()).await;

    let verdict = sim.verify(&all_coins_collected);
    let report = serde_json::json!({
        "verdict": verdict,
        "last_tick": sim.clock().last_tick(),
        "program": run.state(),
        "actions": sim.log().all_actions(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if verdict == VerificationStatus::Successful {
        Ok(())
    } else {
        anyhow::bail!("task not solved: {verdict}")
    }
}
