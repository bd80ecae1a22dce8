mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use common::{record, settle, Cancellable, Journal, TraceRecorder};
use simkernel::core::{process_fn, Context, EventHandle, EventManager, StopReason, MAX_TICK};
use simkernel::SimError;

#[tokio::test]
async fn test_interrupt_runs_future_event_now() {
    let manager = EventManager::new("interrupt");
    let journal = Journal::default();
    let handle = EventHandle::new();

    let log = journal.clone();
    let h = handle.clone();
    let planner = process_fn("P", move |ctx: Context| async move {
        ctx.schedule_ticks(100, 5, true, record("T", &log), Some(&h))?;
        ctx.wait(10).await?;
        log.push(format!("P@{}", ctx.current_tick()));
        Ok::<(), SimError>(())
    });

    let log = journal.clone();
    let h = handle.clone();
    let interrupter = process_fn("Q", move |ctx: Context| async move {
        ctx.interrupt_event(&h).await?;
        log.push(format!("Q@{}", ctx.current_tick()));
        Ok::<(), SimError>(())
    });

    manager.schedule_process_external(0, 5, true, planner, None).unwrap();
    manager.schedule_process_external(5, 5, true, interrupter, None).unwrap();

    assert_eq!(manager.resume(1).await.unwrap(), StopReason::LimitReached);
    assert_eq!(handle.scheduled_tick(), Some(100));
    let pending: Vec<_> = manager.pending_events().into_iter().map(|e| e.description).collect();
    assert_eq!(pending, vec!["Q", "P", "T"]);

    assert_eq!(manager.resume(5).await.unwrap(), StopReason::LimitReached);
    assert_eq!(journal.entries(), vec!["T@5", "Q@5"]);
    assert!(!handle.is_scheduled());
    let pending = manager.pending_events();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].description, "P");
    assert_eq!(pending[0].tick, 10);

    manager.resume(MAX_TICK).await.unwrap();
    assert_eq!(journal.entries(), vec!["T@5", "Q@5", "P@10"]);
}

#[tokio::test]
async fn test_interrupt_resumes_parked_process_early() {
    let manager = EventManager::new("wake");
    let journal = Journal::default();
    let handle = EventHandle::new();

    let log = journal.clone();
    let h = handle.clone();
    let sleeper = process_fn("A", move |ctx: Context| async move {
        ctx.wait_ticks(100, 5, true, Some(&h)).await?;
        log.push(format!("A@{}", ctx.current_tick()));
        Ok::<(), SimError>(())
    });
    let log = journal.clone();
    let h = handle.clone();
    let waker = process_fn("B", move |ctx: Context| async move {
        ctx.interrupt_event(&h).await?;
        log.push(format!("B@{}", ctx.current_tick()));
        Ok::<(), SimError>(())
    });
    manager.schedule_process_external(0, 5, true, sleeper, None).unwrap();
    manager.schedule_process_external(5, 5, true, waker, None).unwrap();

    assert_eq!(manager.resume(MAX_TICK).await.unwrap(), StopReason::Idle);
    assert_eq!(journal.entries(), vec!["A@5", "B@5"]);
    assert_eq!(manager.current_tick(), 5);
}

#[tokio::test]
async fn test_kill_cancels_target_and_is_idempotent() {
    let manager = EventManager::new("kill");
    let trace = Arc::new(TraceRecorder::default());
    manager.set_trace_listener(Some(trace.clone()));
    let (target, ran, killed) = Cancellable::new();
    let handle = EventHandle::new();
    let results = Arc::new(Mutex::new(Vec::new()));

    let h = handle.clone();
    let seen = results.clone();
    let killer = process_fn("убийца", move |ctx: Context| async move {
        // свободный токен: no-op
        let first = ctx.kill_event(&h);
        let second = ctx.interrupt_event(&h).await;
        seen.lock().unwrap().extend([first, second]);

        ctx.schedule_ticks(50, 5, true, target, Some(&h))?;
        ctx.wait(10).await?;
        let first = ctx.kill_event(&h);
        let second = ctx.kill_event(&h);
        seen.lock().unwrap().extend([first, second]);
        Ok::<(), SimError>(())
    });
    manager.schedule_process_external(0, 5, true, killer, None).unwrap();

    assert_eq!(manager.resume(MAX_TICK).await.unwrap(), StopReason::Idle);

    assert_eq!(*results.lock().unwrap(), vec![Ok(()); 4]);
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(killed.load(Ordering::SeqCst), 1);
    assert!(!handle.is_scheduled());
    assert_eq!(manager.current_tick(), 10);
    assert!(trace.entries().contains(&"kill 10 отменяемый".to_string()));
}

#[tokio::test]
async fn test_kill_parked_process_unwinds_it() {
    let manager = EventManager::new("kill-parked");
    let journal = Journal::default();
    let handle = EventHandle::new();

    let log = journal.clone();
    let h = handle.clone();
    let sleeper = process_fn("спящий", move |ctx: Context| async move {
        ctx.wait_ticks(50, 5, true, Some(&h)).await?;
        log.push("проснулся");
        Ok::<(), SimError>(())
    });
    let log = journal.clone();
    let h = handle.clone();
    let killer = process_fn("убийца", move |ctx: Context| async move {
        ctx.kill_event(&h)?;
        log.push(format!("убил@{}", ctx.current_tick()));
        Ok::<(), SimError>(())
    });
    manager.schedule_process_external(0, 5, true, sleeper, None).unwrap();
    manager.schedule_process_external(10, 5, true, killer, None).unwrap();

    assert_eq!(manager.resume(MAX_TICK).await.unwrap(), StopReason::Idle);
    settle().await;

    assert_eq!(journal.entries(), vec!["убил@10"]);
    assert_eq!(manager.current_tick(), 10);
    assert_eq!(manager.live_processes(), 0);
    assert!(manager.pending_events().is_empty());
    assert!(!manager.is_halted());
}

#[tokio::test]
async fn test_bound_handle_rejects_second_schedule() {
    let manager = EventManager::new("in-use");
    let journal = Journal::default();
    let results = Arc::new(Mutex::new(Vec::new()));

    let seen = results.clone();
    let log = journal.clone();
    let target = process_fn("дважды", move |ctx: Context| async move {
        let handle = EventHandle::new();
        let first = ctx.schedule_ticks(5, 5, true, record("первый", &log), Some(&handle));
        let second = ctx.schedule_ticks(6, 5, true, record("второй", &log), Some(&handle));
        let third = ctx.wait_until(|| true, Some(&handle)).await;
        seen.lock().unwrap().extend([first, second, third]);
        Ok::<(), SimError>(())
    });
    manager.schedule_process_external(0, 5, true, target, None).unwrap();

    manager.resume(MAX_TICK).await.unwrap();

    assert_eq!(
        *results.lock().unwrap(),
        vec![Ok(()), Err(SimError::HandleInUse), Err(SimError::HandleInUse)]
    );
    assert_eq!(journal.entries(), vec!["первый@5"]);
}

#[tokio::test]
async fn test_handle_reusable_after_event_fires() {
    let manager = EventManager::new("reuse");
    let journal = Journal::default();
    let log = journal.clone();
    let target = process_fn("повтор", move |ctx: Context| async move {
        let handle = EventHandle::new();
        for _ in 0..3 {
            ctx.wait_ticks(4, 5, true, Some(&handle)).await?;
            log.push(format!("{}:{}", ctx.current_tick(), handle.is_scheduled()));
        }
        Ok::<(), SimError>(())
    });
    manager.schedule_process_external(0, 5, true, target, None).unwrap();

    manager.resume(MAX_TICK).await.unwrap();

    assert_eq!(journal.entries(), vec!["4:false", "8:false", "12:false"]);
}

#[tokio::test]
async fn test_clear_resets_everything() {
    let manager = EventManager::new("clear");
    let (target, ran, killed) = Cancellable::new();
    let (conditional_target, conditional_ran, conditional_killed) = Cancellable::new();
    let handle = EventHandle::new();
    let journal = Journal::default();

    let log = journal.clone();
    let sleeper = process_fn("спящий", move |ctx: Context| async move {
        ctx.wait(1_000).await?;
        log.push("проснулся");
        Ok::<(), SimError>(())
    });
    let h = handle.clone();
    let planner = process_fn("планировщик", move |ctx: Context| async move {
        ctx.schedule_until(conditional_target, || false, None)?;
        ctx.schedule_ticks(500, 5, true, target, Some(&h))?;
        Ok::<(), SimError>(())
    });
    manager.schedule_process_external(0, 5, true, sleeper, None).unwrap();
    manager.schedule_process_external(3, 5, true, planner, None).unwrap();

    assert_eq!(manager.resume(100).await.unwrap(), StopReason::LimitReached);
    assert_eq!(manager.pending_events().len(), 2);
    assert_eq!(manager.pending_conditionals().len(), 1);
    assert_eq!(manager.live_processes(), 1);

    manager.clear().unwrap();
    settle().await;

    assert_eq!(manager.current_tick(), 0);
    assert!(manager.pending_events().is_empty());
    assert!(manager.pending_conditionals().is_empty());
    assert!(!handle.is_scheduled());
    assert_eq!(killed.load(Ordering::SeqCst), 1);
    assert_eq!(conditional_killed.load(Ordering::SeqCst), 1);
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!conditional_ran.load(Ordering::SeqCst));
    assert_eq!(manager.live_processes(), 0);
    assert!(journal.entries().is_empty());

    // после сброса менеджер снова пригоден
    manager.schedule_process_external(2, 5, true, record("снова", &journal), None).unwrap();
    assert_eq!(manager.resume(MAX_TICK).await.unwrap(), StopReason::Idle);
    assert_eq!(journal.entries(), vec!["снова@2"]);
}
