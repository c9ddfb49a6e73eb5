//! Simulation configuration and environment loading.
use std::env;
use std::time::Duration;

use crate::actor::DEFAULT_MOVE_DURATION;
use crate::clock::{DEFAULT_RENDER_TICK, sanitize_period};

/// Settings for assembling a [`Simulation`](crate::Simulation).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Wall-clock period of one render tick.
    pub render_tick: Duration,
    /// Simulation ticks a forward step takes.
    pub move_duration_ticks: u64,
    /// Program bodies allowed to execute at once.
    pub max_programs: usize,
    /// Per-topic capacity of the event bus.
    pub event_buffer_size: usize,
    /// Echo every logged action on the `world::actions` target.
    pub action_console: bool,
    /// Start the clock as soon as the simulation is built.
    pub autostart: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            render_tick: DEFAULT_RENDER_TICK,
            move_duration_ticks: DEFAULT_MOVE_DURATION,
            max_programs: 16,
            event_buffer_size: 100,
            action_console: true,
            autostart: false,
        }
    }
}

impl SimulationConfig {
    /// Construct configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `SIM_RENDER_TICK_MS` - Render tick period in milliseconds (default: 125)
    /// - `SIM_MOVE_DURATION_TICKS` - Ticks per forward step (default: 4)
    /// - `SIM_MAX_PROGRAMS` - Concurrently executing programs (default: 16)
    /// - `SIM_EVENT_BUFFER` - Event bus capacity per topic (default: 100)
    /// - `SIM_ACTION_CONSOLE` - Log every action (default: true)
    /// - `SIM_AUTOSTART` - Start the clock on build (default: false)
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = read_env::<u64>("SIM_RENDER_TICK_MS") {
            config.render_tick = sanitize_period(Duration::from_millis(ms));
        }
        if let Some(ticks) = read_env::<u64>("SIM_MOVE_DURATION_TICKS") {
            config.move_duration_ticks = ticks.max(1);
        }
        if let Some(max) = read_env::<usize>("SIM_MAX_PROGRAMS") {
            config.max_programs = max.max(1);
        }
        if let Some(capacity) = read_env::<usize>("SIM_EVENT_BUFFER") {
            config.event_buffer_size = capacity.max(1);
        }
        if let Some(enabled) = read_env::<bool>("SIM_ACTION_CONSOLE") {
            config.action_console = enabled;
        }
        if let Some(enabled) = read_env::<bool>("SIM_AUTOSTART") {
            config.autostart = enabled;
        }

        config
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.parse().ok()
}
