//! Scheduling barrier and clock counter behaviour.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use runtime::{CancelToken, Clock, ClockError, RENDER_TICKS_PER_SIM_TICK, operation};
use world_core::Tick;

/// Yields until `count` pre-tick listeners are registered.
async fn wait_for_listeners(clock: &Clock, count: usize) {
    while clock.listener_count().0 < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn operations_for_the_same_tick_run_in_registration_order() {
    let clock = Clock::default();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for (index, name) in ["first", "second", "third"].into_iter().enumerate() {
        let clock_ref = clock.clone();
        let order = order.clone();
        tasks.push(tokio::spawn(async move {
            let (handle, completion) = operation();
            clock_ref
                .schedule_operation_at_tick(Tick(2), completion)
                .await
                .unwrap();
            // Everything scheduled earlier is already visible.
            assert_eq!(order.lock().unwrap().len(), index);
            order.lock().unwrap().push((name, clock_ref.last_tick()));
            handle.complete();
        }));
        wait_for_listeners(&clock, index + 1).await;
    }

    assert_eq!(clock.step().await, Ok(Tick(1)));
    assert!(order.lock().unwrap().is_empty());

    assert_eq!(clock.step().await, Ok(Tick(2)));
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(
        *order.lock().unwrap(),
        vec![("first", Tick(2)), ("second", Tick(2)), ("third", Tick(2))]
    );
    assert_eq!(clock.listener_count(), (0, 0));
}

#[tokio::test]
async fn past_target_fires_at_the_next_tick() {
    let clock = Clock::default();
    for _ in 0..3 {
        clock.step().await.unwrap();
    }

    let waiter = tokio::spawn({
        let clock = clock.clone();
        async move {
            let (handle, completion) = operation();
            clock.schedule_operation_at_tick(Tick(1), completion).await?;
            let tick = clock.last_tick();
            handle.complete();
            Ok::<_, ClockError>(tick)
        }
    });
    wait_for_listeners(&clock, 1).await;

    assert_eq!(clock.step().await, Ok(Tick(4)));
    assert_eq!(waiter.await.unwrap(), Ok(Tick(4)));
}

#[tokio::test]
async fn failed_completion_is_reported_to_the_caller() {
    let clock = Clock::default();
    let (handle, completion) = operation();
    handle.fail("precondition broke");

    let waiter = tokio::spawn({
        let clock = clock.clone();
        async move { clock.schedule_operation_at_tick(Tick(1), completion).await }
    });
    wait_for_listeners(&clock, 1).await;
    clock.step().await.unwrap();

    assert_eq!(
        waiter.await.unwrap(),
        Err(ClockError::OperationFailed {
            reason: "precondition broke".to_string()
        })
    );
}

#[tokio::test]
async fn completion_failed_after_start_still_releases_the_clock() {
    let clock = Clock::default();
    let waiter = tokio::spawn({
        let clock = clock.clone();
        async move {
            let (handle, completion) = operation();
            clock.schedule_operation_at_tick(Tick(1), completion).await?;
            handle.fail("target vanished");
            Ok::<_, ClockError>(())
        }
    });
    wait_for_listeners(&clock, 1).await;

    assert_eq!(clock.step().await, Ok(Tick(1)));
    assert_eq!(waiter.await.unwrap(), Ok(()));
    assert_eq!(clock.step().await, Ok(Tick(2)));
}

#[tokio::test]
async fn cancelled_waiter_is_interrupted() {
    let clock = Clock::default();
    let token = CancelToken::new();

    let waiter = tokio::spawn({
        let clock = clock.clone();
        token.clone().scope(async move {
            let (_handle, completion) = operation();
            clock.schedule_operation_at_tick(Tick(10), completion).await
        })
    });
    wait_for_listeners(&clock, 1).await;

    token.cancel();
    assert_eq!(waiter.await.unwrap(), Err(ClockError::Interrupted));

    // The abandoned listener is dropped once its tick comes around.
    for _ in 0..10 {
        clock.step().await.unwrap();
    }
    assert_eq!(clock.listener_count(), (0, 0));
}

#[tokio::test]
async fn shutdown_releases_blocked_callers() {
    let clock = Clock::default();
    let waiter = tokio::spawn({
        let clock = clock.clone();
        async move {
            let (_handle, completion) = operation();
            clock.schedule_operation_at_tick(Tick(5), completion).await
        }
    });
    wait_for_listeners(&clock, 1).await;

    clock.shutdown();
    assert_eq!(waiter.await.unwrap(), Err(ClockError::ShutDown));
    assert_eq!(clock.step().await, Err(ClockError::ShutDown));
}

#[tokio::test]
async fn shutdown_releases_a_held_barrier() {
    let clock = Clock::default();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();

    let holder = tokio::spawn({
        let clock = clock.clone();
        async move {
            let (handle, completion) = operation();
            clock
                .schedule_operation_at_tick(Tick(1), completion)
                .await
                .unwrap();
            started_tx.send(()).unwrap();
            // Never completes.
            std::future::pending::<()>().await;
            drop(handle);
        }
    });
    wait_for_listeners(&clock, 1).await;

    let stepper = tokio::spawn({
        let clock = clock.clone();
        async move { clock.step().await }
    });
    started_rx.await.unwrap();
    assert!(!stepper.is_finished());

    clock.shutdown();
    assert_eq!(stepper.await.unwrap(), Ok(Tick(1)));
    holder.abort();
}

#[tokio::test]
async fn wait_until_does_not_hold_the_clock() {
    let clock = Clock::default();
    let waiter = tokio::spawn({
        let clock = clock.clone();
        async move {
            clock.wait_until(Tick(2)).await?;
            Ok::<_, ClockError>(clock.last_tick())
        }
    });
    wait_for_listeners(&clock, 1).await;

    clock.step().await.unwrap();
    clock.step().await.unwrap();
    assert_eq!(waiter.await.unwrap(), Ok(Tick(2)));
}

#[tokio::test]
async fn post_tick_listeners_run_after_pre_tick_listeners() {
    let clock = Clock::default();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let post = seen.clone();
    clock
        .register_post_tick_listener(move |tick: Tick| {
            post.lock().unwrap().push(("post", tick));
            true
        })
        .unwrap();
    let pre = seen.clone();
    clock
        .register_tick_listener(move |tick: Tick| {
            pre.lock().unwrap().push(("pre", tick));
            true
        })
        .unwrap();

    clock.step().await.unwrap();
    clock.step().await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("pre", Tick(1)),
            ("post", Tick(1)),
            ("pre", Tick(2)),
            ("post", Tick(2)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn timer_ticks_are_consecutive_and_derive_simulation_ticks() {
    let clock = Clock::new(Duration::from_millis(10));
    let renders = Arc::new(Mutex::new(Vec::new()));
    let sim_ticks = Arc::new(Mutex::new(Vec::new()));

    let seen = renders.clone();
    clock
        .set_render_listener(move |render| seen.lock().unwrap().push(render))
        .unwrap();
    let seen = sim_ticks.clone();
    clock
        .register_tick_listener(move |tick: Tick| {
            seen.lock().unwrap().push(tick);
            true
        })
        .unwrap();

    clock.start().unwrap();
    tokio::time::sleep(Duration::from_millis(405)).await;
    clock.stop();

    let renders = renders.lock().unwrap().clone();
    assert!(renders.len() >= 32, "only {} render ticks", renders.len());
    let expected: Vec<u64> = (1..=renders.len() as u64).collect();
    assert_eq!(renders, expected);

    let last_render = *renders.last().unwrap();
    assert_eq!(clock.last_render_tick(), last_render);
    assert_eq!(clock.last_tick(), Tick(last_render / RENDER_TICKS_PER_SIM_TICK));

    let expected: Vec<Tick> = (1..=last_render / RENDER_TICKS_PER_SIM_TICK)
        .map(Tick)
        .collect();
    assert_eq!(*sim_ticks.lock().unwrap(), expected);
}

#[tokio::test(start_paused = true)]
async fn changing_the_period_keeps_the_counter() {
    let clock = Clock::new(Duration::from_millis(10));
    clock.start().unwrap();
    tokio::time::sleep(Duration::from_millis(95)).await;
    let before = clock.last_render_tick();
    assert!(before >= 8);

    clock.set_period(Duration::from_millis(20));
    assert!(clock.is_running());
    assert_eq!(clock.simulation_tick_period(), Duration::from_millis(160));

    tokio::time::sleep(Duration::from_millis(205)).await;
    let after = clock.last_render_tick();
    assert!(after >= before + 9, "counter went from {before} to {after}");
    assert!(after <= before + 11, "counter went from {before} to {after}");
    clock.stop();
}

#[tokio::test(start_paused = true)]
async fn paused_clock_does_not_advance() {
    let clock = Clock::new(Duration::from_millis(10));
    clock.start().unwrap();
    tokio::time::sleep(Duration::from_millis(55)).await;
    clock.stop();
    let paused_at = clock.last_render_tick();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(clock.last_render_tick(), paused_at);

    clock.start().unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert!(clock.last_render_tick() > paused_at);
}
