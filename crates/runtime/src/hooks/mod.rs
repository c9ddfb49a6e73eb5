//! Render hook: the boundary to whatever draws the world.
//!
//! The clock calls the installed hook once per render tick with a snapshot
//! of the playfield. The hook never feeds anything back into the simulation.

use std::sync::{Arc, Weak};

use tracing::trace;
use world_core::{EntitySnapshot, Playfield};

use crate::clock::{Clock, ClockError};

/// Consumer of per-render-tick drawable state.
pub trait RenderHook: Send + Sync {
    fn on_render_tick(&self, render_tick: u64, snapshot: &[EntitySnapshot]);
}

impl<F> RenderHook for F
where
    F: Fn(u64, &[EntitySnapshot]) + Send + Sync,
{
    fn on_render_tick(&self, render_tick: u64, snapshot: &[EntitySnapshot]) {
        self(render_tick, snapshot)
    }
}

/// Render hook that traces every snapshot on `runtime::render`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceRenderHook;

impl RenderHook for TraceRenderHook {
    fn on_render_tick(&self, render_tick: u64, snapshot: &[EntitySnapshot]) {
        trace!(
            target: "runtime::render",
            render_tick,
            entities = snapshot.len(),
            "render tick"
        );
    }
}

/// Installs `hook` as the clock's render listener, fed from `playfield`.
///
/// The playfield is held weakly; once it is dropped the hook is skipped.
pub fn install_render_hook(
    clock: &Clock,
    playfield: &Arc<Playfield>,
    hook: Arc<dyn RenderHook>,
) -> Result<(), ClockError> {
    let playfield: Weak<Playfield> = Arc::downgrade(playfield);
    clock.set_render_listener(move |render_tick| {
        if let Some(playfield) = playfield.upgrade() {
            hook.on_render_tick(render_tick, &playfield.snapshot());
        }
    })
}
