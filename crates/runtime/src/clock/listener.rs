//! Per-tick callbacks and the ordered lists the clock keeps them in.

use std::mem;

use async_trait::async_trait;
use world_core::Tick;

/// Callback invoked on the clock's timer task once per simulation tick.
///
/// Returning `false` deregisters the listener. A listener may await; the
/// clock does not move on to the next listener (or the next tick) until it
/// returns.
#[async_trait]
pub trait TickListener: Send {
    async fn on_tick(&mut self, tick: Tick) -> bool;
}

#[async_trait]
impl<F> TickListener for F
where
    F: FnMut(Tick) -> bool + Send,
{
    async fn on_tick(&mut self, tick: Tick) -> bool {
        self(tick)
    }
}

pub(crate) type BoxedListener = Box<dyn TickListener>;

/// Listeners in registration order.
#[derive(Default)]
pub(crate) struct ListenerList {
    listeners: Vec<BoxedListener>,
}

impl ListenerList {
    pub(crate) fn push(&mut self, listener: BoxedListener) {
        self.listeners.push(listener);
    }

    /// Moves every listener out so they can be awaited without holding a lock.
    pub(crate) fn take(&mut self) -> Vec<BoxedListener> {
        mem::take(&mut self.listeners)
    }

    /// Puts back the survivors of a walk ahead of anything registered meanwhile.
    pub(crate) fn restore(&mut self, mut survivors: Vec<BoxedListener>) {
        survivors.append(&mut self.listeners);
        self.listeners = survivors;
    }

    pub(crate) fn clear(&mut self) {
        self.listeners.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}
