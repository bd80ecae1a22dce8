mod common;

use std::sync::Arc;

use common::{noop, record, Journal, TimeRecorder};
use simkernel::core::{process_fn, Context, EventManager, StopReason, MAX_TICK};
use simkernel::SimError;

#[tokio::test]
async fn test_same_key_fifo_keeps_arrival_order() {
    let manager = EventManager::new("fifo");
    let journal = Journal::default();
    manager.schedule_process_external(5, 1, true, record("X", &journal), None).unwrap();
    manager.schedule_process_external(5, 1, true, record("Y", &journal), None).unwrap();

    let reason = manager.resume(5).await.unwrap();

    assert_eq!(journal.entries(), vec!["X@5", "Y@5"]);
    assert_eq!(manager.current_tick(), 5);
    assert_eq!(reason, StopReason::Idle);
}

#[tokio::test]
async fn test_lifo_jumps_ahead_of_fifo() {
    let manager = EventManager::new("lifo");
    let journal = Journal::default();
    manager.schedule_process_external(5, 1, true, record("X", &journal), None).unwrap();
    manager.schedule_process_external(5, 1, false, record("Y", &journal), None).unwrap();

    manager.resume(5).await.unwrap();

    assert_eq!(journal.entries(), vec!["Y@5", "X@5"]);
}

#[tokio::test]
async fn test_ordering_law() {
    let manager = EventManager::new("ordering");
    let journal = Journal::default();
    // (такт, приоритет, fifo, имя)
    let plan = [
        (9, 0, true, "t9"),
        (3, 7, true, "t3p7"),
        (3, 2, true, "t3p2-a"),
        (3, 2, true, "t3p2-b"),
        (3, 2, false, "t3p2-lifo"),
        (0, 5, true, "t0"),
        (3, -1, true, "t3p-1"),
    ];
    for (tick, priority, fifo, name) in plan {
        manager
            .schedule_process_external(tick, priority, fifo, record(name, &journal), None)
            .unwrap();
    }

    let reason = manager.resume(MAX_TICK).await.unwrap();

    assert_eq!(reason, StopReason::Idle);
    assert_eq!(
        journal.entries(),
        vec!["t0@0", "t3p-1@3", "t3p2-lifo@3", "t3p2-a@3", "t3p2-b@3", "t3p7@3", "t9@9"]
    );
}

#[tokio::test]
async fn test_events_at_limit_run_and_later_ones_wait() {
    let manager = EventManager::new("limit");
    let journal = Journal::default();
    manager.schedule_process_external(10, 5, true, record("a", &journal), None).unwrap();
    manager.schedule_process_external(11, 5, true, record("b", &journal), None).unwrap();

    assert_eq!(manager.resume(10).await.unwrap(), StopReason::LimitReached);
    assert_eq!(journal.entries(), vec!["a@10"]);
    assert_eq!(manager.next_event_tick(), Some(11));

    assert_eq!(manager.resume(MAX_TICK).await.unwrap(), StopReason::Idle);
    assert_eq!(journal.entries(), vec!["a@10", "b@11"]);
}

#[tokio::test]
async fn test_tick_monotonicity() {
    let manager = EventManager::new("monotonic");
    let recorder = Arc::new(TimeRecorder::default());
    manager.set_time_listener(Some(recorder.clone()));
    let journal = Journal::default();

    for (i, step) in [7, 3, 11, 1, 5].into_iter().enumerate() {
        let journal = journal.clone();
        let target = process_fn(format!("walker{i}"), move |ctx: Context| async move {
            for _ in 0..4 {
                ctx.wait(step).await?;
                journal.push(ctx.current_tick().to_string());
            }
            Ok::<(), SimError>(())
        });
        manager.schedule_process_external(i as i64, 5, true, target, None).unwrap();
    }

    manager.resume(MAX_TICK).await.unwrap();

    let observed: Vec<i64> = journal.entries().iter().map(|t| t.parse().unwrap()).collect();
    assert_eq!(observed.len(), 20);
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));

    let ticks = recorder.ticks.lock().unwrap().clone();
    assert!(!ticks.is_empty());
    assert!(ticks.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*ticks.last().unwrap(), 2 + 11 * 4);
    assert_eq!(*recorder.running.lock().unwrap(), vec![true, false]);
}

#[tokio::test]
async fn test_extreme_durations_saturate() {
    let manager = EventManager::new("overflow");
    let target = process_fn("планировщик", move |ctx: Context| async move {
        ctx.schedule_ticks(MAX_TICK, 5, true, noop("далеко"), None)?;
        ctx.schedule_ticks(MAX_TICK - 1, 5, true, noop("тоже далеко"), None)?;
        Ok::<(), SimError>(())
    });
    manager.schedule_process_external(10, 5, true, target, None).unwrap();

    assert_eq!(manager.resume(10).await.unwrap(), StopReason::LimitReached);

    manager
        .schedule_process_external(MAX_TICK, 0, true, noop("извне"), None)
        .unwrap();

    let pending = manager.pending_events();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|e| e.tick == MAX_TICK));
    assert_eq!(pending[0].description, "извне");
}

#[tokio::test]
async fn test_negative_durations_rejected() {
    let manager = EventManager::new("negative");
    let results = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = results.clone();
    let target = process_fn("проверка", move |ctx: Context| async move {
        let waited = ctx.wait(-1).await;
        seen.lock().unwrap().push(waited);
        let scheduled = ctx.schedule_ticks(-5, 5, true, noop("x"), None);
        seen.lock().unwrap().push(scheduled);
        let waited = ctx.wait_seconds(-0.5, 5, true, None).await;
        seen.lock().unwrap().push(waited);
        let waited = ctx.wait_seconds(f64::NAN, 5, true, None).await;
        seen.lock().unwrap().push(waited);
        Ok::<(), SimError>(())
    });
    manager.schedule_process_external(0, 5, true, target, None).unwrap();
    let external = manager.schedule_process_external(-1, 5, true, noop("y"), None);

    manager.resume(MAX_TICK).await.unwrap();

    assert_eq!(external, Err(SimError::NegativeDuration(-1)));
    let results = results.lock().unwrap().clone();
    assert_eq!(results[0], Err(SimError::NegativeDuration(-1)));
    assert_eq!(results[1], Err(SimError::NegativeDuration(-5)));
    assert_eq!(results[2], Err(SimError::InvalidDuration(-0.5)));
    assert!(matches!(results[3], Err(SimError::InvalidDuration(_))));
    assert!(manager.pending_events().is_empty());
}

#[tokio::test]
async fn test_wait_seconds_uses_tick_length() {
    let manager = EventManager::new("seconds");
    manager.set_tick_length(0.001).unwrap();
    let journal = Journal::default();
    let log = journal.clone();
    let target = process_fn("секунды", move |ctx: Context| async move {
        ctx.wait_seconds(0.5, 5, true, None).await?;
        log.push(format!("{}", ctx.current_tick()));
        log.push(format!("{:.3}", ctx.current_seconds()));
        Ok::<(), SimError>(())
    });
    manager.schedule_process_external(0, 5, true, target, None).unwrap();

    manager.resume(MAX_TICK).await.unwrap();

    assert_eq!(journal.entries(), vec!["500", "0.500"]);
    assert_eq!(manager.ticks_to_seconds(2000), 2.0);
    assert_eq!(manager.seconds_to_nearest_tick(0.0014), 1);
}
