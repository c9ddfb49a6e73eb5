//! Discrete simulation clock.
//!
//! A single timer task fires render ticks at a fixed period. Every
//! [`RENDER_TICKS_PER_SIM_TICK`]th render tick is a simulation-tick boundary
//! at which the pre-tick and then the post-tick listeners are walked in
//! registration order. Each listener is awaited before the next one runs,
//! and the next render tick is not processed until the walk has finished.
//!
//! The clock is an explicitly constructed, cloneable handle. Every clone
//! drives the same timer and counter.

mod barrier;
mod error;
mod listener;

pub use barrier::{Completion, OperationHandle, operation};
pub use error::ClockError;
pub use listener::TickListener;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};
use world_core::{Tick, TickSource};

use crate::cancel::CancelToken;
use crate::events::{ClockEvent, EventBus};
use barrier::ScheduledOperation;
use listener::{BoxedListener, ListenerList};

/// Render ticks per simulation tick.
pub const RENDER_TICKS_PER_SIM_TICK: u64 = 8;

/// Default render-tick period (one simulation tick per second).
pub const DEFAULT_RENDER_TICK: Duration = Duration::from_millis(125);

/// Bounds applied to every render-tick period handed to the clock.
pub const MIN_RENDER_TICK: Duration = Duration::from_millis(1);
pub const MAX_RENDER_TICK: Duration = Duration::from_secs(3600);

type RenderListener = Arc<dyn Fn(u64) + Send + Sync>;

struct Timer {
    stop: oneshot::Sender<()>,
}

#[derive(Default)]
struct Listeners {
    pre: ListenerList,
    post: ListenerList,
}

impl Listeners {
    fn list(&mut self, post: bool) -> &mut ListenerList {
        if post { &mut self.post } else { &mut self.pre }
    }
}

struct ClockInner {
    render_ticks: AtomicU64,
    period: Mutex<Duration>,
    timer: Mutex<Option<Timer>>,
    /// Serializes tick processing between the timer task and `step`.
    processing: tokio::sync::Mutex<()>,
    listeners: Mutex<Listeners>,
    render_listener: Mutex<Option<RenderListener>>,
    shutdown: watch::Sender<bool>,
    events: Option<EventBus>,
}

/// Handle to the discrete simulation clock.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

impl Clock {
    pub fn new(period: Duration) -> Self {
        Self::build(period, None)
    }

    /// Creates a clock that publishes start/pause/shutdown on `events`.
    pub fn with_events(period: Duration, events: EventBus) -> Self {
        Self::build(period, Some(events))
    }

    fn build(period: Duration, events: Option<EventBus>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClockInner {
                render_ticks: AtomicU64::new(0),
                period: Mutex::new(sanitize_period(period)),
                timer: Mutex::new(None),
                processing: tokio::sync::Mutex::new(()),
                listeners: Mutex::new(Listeners::default()),
                render_listener: Mutex::new(None),
                shutdown,
                events,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Timer control
    // ------------------------------------------------------------------

    /// Starts the periodic timer on the current tokio runtime.
    pub fn start(&self) -> Result<(), ClockError> {
        self.ensure_live()?;
        let mut timer = lock(&self.inner.timer);
        if timer.is_some() {
            return Err(ClockError::AlreadyRunning);
        }
        let runtime = Handle::try_current().map_err(|_| ClockError::NoRuntime)?;
        let period = self.render_tick_period();
        *timer = Some(self.spawn_timer(&runtime, period));
        drop(timer);

        info!(
            target: "runtime::clock",
            period_ms = period.as_millis() as u64,
            render_tick = self.last_render_tick(),
            "clock started"
        );
        self.publish(ClockEvent::Started {
            render_tick: self.last_render_tick(),
            period_ms: period.as_millis() as u64,
        });
        Ok(())
    }

    /// Halts the timer. A tick already being processed runs to completion.
    /// No-op when the clock is not running.
    pub fn stop(&self) {
        let Some(timer) = lock(&self.inner.timer).take() else {
            return;
        };
        let _ = timer.stop.send(());

        info!(
            target: "runtime::clock",
            render_tick = self.last_render_tick(),
            last_tick = %self.last_tick(),
            "clock paused"
        );
        self.publish(ClockEvent::Paused {
            render_tick: self.last_render_tick(),
            last_tick: self.last_tick(),
        });
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.timer).is_some()
    }

    /// Changes the render period. A running timer is restarted with the new
    /// period; the tick counter is kept.
    pub fn set_period(&self, period: Duration) {
        let period = sanitize_period(period);
        *lock(&self.inner.period) = period;

        let mut timer = lock(&self.inner.timer);
        if let Some(old) = timer.take() {
            let _ = old.stop.send(());
            if let Ok(runtime) = Handle::try_current() {
                *timer = Some(self.spawn_timer(&runtime, period));
            }
        }
        drop(timer);

        debug!(target: "runtime::clock", period_ms = period.as_millis() as u64, "render period changed");
        self.publish(ClockEvent::PeriodChanged {
            period_ms: period.as_millis() as u64,
        });
    }

    pub fn render_tick_period(&self) -> Duration {
        *lock(&self.inner.period)
    }

    pub fn simulation_tick_period(&self) -> Duration {
        self.render_tick_period() * RENDER_TICKS_PER_SIM_TICK as u32
    }

    /// Advances straight to the next simulation-tick boundary and processes
    /// it. Only allowed while the timer is stopped.
    pub async fn step(&self) -> Result<Tick, ClockError> {
        self.ensure_live()?;
        if self.is_running() {
            return Err(ClockError::AlreadyRunning);
        }
        Ok(self.inner.advance_to_boundary().await)
    }

    /// Stops the timer, drops every listener and refuses further scheduling.
    ///
    /// Callers blocked in [`Clock::schedule_operation_at_tick`] receive
    /// [`ClockError::ShutDown`]; a barrier currently waiting for a completion
    /// is released.
    pub fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        if let Some(timer) = lock(&self.inner.timer).take() {
            let _ = timer.stop.send(());
        }
        {
            let mut listeners = lock(&self.inner.listeners);
            listeners.pre.clear();
            listeners.post.clear();
        }
        lock(&self.inner.render_listener).take();

        info!(target: "runtime::clock", last_tick = %self.last_tick(), "clock shut down");
        self.publish(ClockEvent::ShutDown {
            last_tick: self.last_tick(),
        });
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    pub fn last_render_tick(&self) -> u64 {
        self.inner.render_ticks.load(Ordering::Acquire)
    }

    /// Last simulation tick entered: `render_tick / RENDER_TICKS_PER_SIM_TICK`.
    pub fn last_tick(&self) -> Tick {
        Tick(self.last_render_tick() / RENDER_TICKS_PER_SIM_TICK)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Registers a listener run before post-tick listeners at every
    /// simulation tick.
    pub fn register_tick_listener(
        &self,
        listener: impl TickListener + 'static,
    ) -> Result<(), ClockError> {
        self.push_listener(Box::new(listener), false)
    }

    /// Registers a listener run after every pre-tick listener has finished.
    pub fn register_post_tick_listener(
        &self,
        listener: impl TickListener + 'static,
    ) -> Result<(), ClockError> {
        self.push_listener(Box::new(listener), true)
    }

    /// Number of registered pre-tick and post-tick listeners.
    pub fn listener_count(&self) -> (usize, usize) {
        let listeners = lock(&self.inner.listeners);
        (listeners.pre.len(), listeners.post.len())
    }

    /// Sets the callback invoked once per render tick with the render-tick
    /// number. Only one may be set at a time.
    pub fn set_render_listener(
        &self,
        listener: impl Fn(u64) + Send + Sync + 'static,
    ) -> Result<(), ClockError> {
        self.ensure_live()?;
        let mut slot = lock(&self.inner.render_listener);
        if slot.is_some() {
            return Err(ClockError::ListenerAlreadySet);
        }
        *slot = Some(Arc::new(listener));
        Ok(())
    }

    pub fn clear_render_listener(&self) {
        lock(&self.inner.render_listener).take();
    }

    // ------------------------------------------------------------------
    // Scheduling barrier
    // ------------------------------------------------------------------

    /// Suspends the caller until `target` is reached, then holds the clock at
    /// that tick until `completion` is resolved.
    ///
    /// A target at or before the current tick fires at the next processed
    /// tick. If the calling task runs under a [`CancelToken`] that fires
    /// while waiting, returns [`ClockError::Interrupted`].
    pub async fn schedule_operation_at_tick(
        &self,
        target: Tick,
        completion: Completion,
    ) -> Result<(), ClockError> {
        let cancel = CancelToken::current();
        if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(ClockError::Interrupted);
        }

        let (start_tx, start_rx) = oneshot::channel();
        let operation = ScheduledOperation::new(
            target,
            start_tx,
            completion,
            self.inner.shutdown.subscribe(),
        );
        self.push_listener(Box::new(operation), false)?;
        trace!(target: "runtime::clock", target_tick = %target, last_tick = %self.last_tick(), "operation scheduled");

        let started = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ClockError::Interrupted),
                started = start_rx => started,
            },
            None => start_rx.await,
        };

        match started {
            Ok(result) => result,
            // Listener dropped without answering: the clock was shut down.
            Err(_) => Err(ClockError::ShutDown),
        }
    }

    /// Schedules `ticks` simulation ticks after the last one entered.
    pub async fn schedule_operation_in_ticks(
        &self,
        ticks: u64,
        completion: Completion,
    ) -> Result<Tick, ClockError> {
        let target = self.last_tick() + ticks;
        self.schedule_operation_at_tick(target, completion).await?;
        Ok(target)
    }

    pub async fn schedule_operation_at_next_tick(
        &self,
        completion: Completion,
    ) -> Result<Tick, ClockError> {
        self.schedule_operation_in_ticks(1, completion).await
    }

    /// Suspends the caller until `target` without holding the clock.
    pub async fn wait_until(&self, target: Tick) -> Result<(), ClockError> {
        let (handle, completion) = operation();
        self.schedule_operation_at_tick(target, completion).await?;
        handle.complete();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn push_listener(&self, listener: BoxedListener, post: bool) -> Result<(), ClockError> {
        let mut listeners = lock(&self.inner.listeners);
        // Checked under the lock so shutdown cannot interleave with the push.
        self.ensure_live()?;
        listeners.list(post).push(listener);
        Ok(())
    }

    fn spawn_timer(&self, runtime: &Handle, period: Duration) -> Timer {
        let (stop, stop_rx) = oneshot::channel();
        runtime.spawn(run_timer(Arc::downgrade(&self.inner), period, stop_rx));
        Timer { stop }
    }

    fn ensure_live(&self) -> Result<(), ClockError> {
        if self.is_shut_down() {
            Err(ClockError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn publish(&self, event: ClockEvent) {
        if let Some(events) = &self.inner.events {
            events.publish(event);
        }
    }
}

impl TickSource for Clock {
    fn current_tick(&self) -> Tick {
        self.last_tick()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_TICK)
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("render_tick", &self.last_render_tick())
            .field("last_tick", &self.last_tick())
            .field("running", &self.is_running())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl ClockInner {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Fires one render tick and processes the simulation tick it enters, if any.
    async fn render_tick(&self) {
        let _processing = self.processing.lock().await;
        if self.is_shut_down() {
            return;
        }
        let render = self.render_ticks.fetch_add(1, Ordering::AcqRel) + 1;
        if render % RENDER_TICKS_PER_SIM_TICK == 0 {
            self.process_simulation_tick(Tick(render / RENDER_TICKS_PER_SIM_TICK))
                .await;
        }
        self.notify_render(render);
    }

    /// Jumps the render counter to the next simulation-tick boundary.
    async fn advance_to_boundary(&self) -> Tick {
        let _processing = self.processing.lock().await;
        let current = self.render_ticks.load(Ordering::Acquire);
        let render = (current / RENDER_TICKS_PER_SIM_TICK + 1) * RENDER_TICKS_PER_SIM_TICK;
        self.render_ticks.store(render, Ordering::Release);

        let tick = Tick(render / RENDER_TICKS_PER_SIM_TICK);
        self.process_simulation_tick(tick).await;
        self.notify_render(render);
        tick
    }

    async fn process_simulation_tick(&self, tick: Tick) {
        trace!(target: "runtime::clock", %tick, "simulation tick");
        self.walk(tick, false).await;
        self.walk(tick, true).await;
    }

    async fn walk(&self, tick: Tick, post: bool) {
        let current = lock(&self.listeners).list(post).take();
        let mut survivors = Vec::with_capacity(current.len());

        for mut listener in current {
            if self.is_shut_down() {
                // Remaining listeners are dropped, failing their callers.
                return;
            }
            if listener.on_tick(tick).await {
                survivors.push(listener);
            }
        }

        let mut listeners = lock(&self.listeners);
        if !self.is_shut_down() {
            listeners.list(post).restore(survivors);
        }
    }

    fn notify_render(&self, render: u64) {
        let listener = lock(&self.render_listener).clone();
        if let Some(listener) = listener {
            listener(render);
        }
    }
}

async fn run_timer(clock: Weak<ClockInner>, period: Duration, mut stop: oneshot::Receiver<()>) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = interval.tick() => {
                let Some(clock) = clock.upgrade() else {
                    break;
                };
                // Runs in the arm body so a stop request never cuts a tick short.
                clock.render_tick().await;
            }
        }
    }
    trace!(target: "runtime::clock", "timer task exited");
}

/// Resolves once `flag` reads `true`. Pends forever if the sender is gone.
pub(crate) async fn wait_for_flag(flag: &mut watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub(crate) fn sanitize_period(period: Duration) -> Duration {
    period.clamp(MIN_RENDER_TICK, MAX_RENDER_TICK)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn step_jumps_to_next_boundary() {
        let clock = Clock::default();
        assert_eq!(clock.last_tick(), Tick(0));
        assert_eq!(clock.step().await, Ok(Tick(1)));
        assert_eq!(clock.last_render_tick(), 8);
        assert_eq!(clock.step().await, Ok(Tick(2)));
    }

    #[tokio::test]
    async fn listener_returning_false_is_removed() {
        let clock = Clock::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        clock
            .register_tick_listener(move |tick: Tick| {
                seen.fetch_add(1, Ordering::SeqCst);
                tick < Tick(2)
            })
            .unwrap();

        for _ in 0..4 {
            clock.step().await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(clock.listener_count(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_fails_and_stop_is_idempotent() {
        let clock = Clock::new(Duration::from_millis(10));
        clock.start().unwrap();
        assert_eq!(clock.start(), Err(ClockError::AlreadyRunning));
        assert_eq!(clock.step().await, Err(ClockError::AlreadyRunning));
        clock.stop();
        clock.stop();
        assert!(!clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn periods_are_clamped_to_the_supported_range() {
        let clock = Clock::new(Duration::MAX);
        assert_eq!(clock.render_tick_period(), MAX_RENDER_TICK);
        assert_eq!(
            clock.simulation_tick_period(),
            MAX_RENDER_TICK * RENDER_TICKS_PER_SIM_TICK as u32
        );
        clock.start().unwrap();
        clock.stop();

        clock.set_period(Duration::ZERO);
        assert_eq!(clock.render_tick_period(), MIN_RENDER_TICK);
    }

    #[test]
    fn start_without_runtime_fails() {
        let clock = Clock::default();
        assert_eq!(clock.start(), Err(ClockError::NoRuntime));
    }

    #[tokio::test]
    async fn render_listener_can_only_be_set_once() {
        let clock = Clock::default();
        clock.set_render_listener(|_| {}).unwrap();
        assert_eq!(
            clock.set_render_listener(|_| {}),
            Err(ClockError::ListenerAlreadySet)
        );
        clock.clear_render_listener();
        assert!(clock.set_render_listener(|_| {}).is_ok());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let clock = Clock::default();
        clock.shutdown();
        assert_eq!(clock.start(), Err(ClockError::ShutDown));
        assert_eq!(
            clock.register_tick_listener(|_: Tick| true),
            Err(ClockError::ShutDown)
        );
        let (_handle, completion) = operation();
        assert_eq!(
            clock.schedule_operation_at_tick(Tick(1), completion).await,
            Err(ClockError::ShutDown)
        );
    }
}
