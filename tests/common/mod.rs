#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use simkernel::core::{
    process_fn, Context, EventInfo, EventTimeListener, EventTraceListener, ProcessTarget, Tick,
};
use simkernel::SimError;

/// Общий журнал, в который процессы модели пишут, что и когда выполнили
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Процесс, который пишет в журнал "имя@такт" и завершается
pub fn record(name: &str, journal: &Journal) -> impl ProcessTarget {
    let journal = journal.clone();
    let label = name.to_string();
    process_fn(name, move |ctx: Context| async move {
        journal.push(format!("{}@{}", label, ctx.current_tick()));
        Ok::<(), SimError>(())
    })
}

/// Процесс, который ничего не делает
pub fn noop(name: &str) -> impl ProcessTarget {
    process_fn(name, |_ctx: Context| async { Ok::<(), SimError>(()) })
}

/// Цель с хуком отмены, считающая вызовы
pub struct Cancellable {
    pub ran: Arc<AtomicBool>,
    pub killed: Arc<AtomicUsize>,
}

impl Cancellable {
    pub fn new() -> (Self, Arc<AtomicBool>, Arc<AtomicUsize>) {
        let ran = Arc::new(AtomicBool::new(false));
        let killed = Arc::new(AtomicUsize::new(0));
        let target = Self {
            ran: ran.clone(),
            killed: killed.clone(),
        };
        (target, ran, killed)
    }
}

impl ProcessTarget for Cancellable {
    fn description(&self) -> String {
        "отменяемый".to_string()
    }

    fn process(self: Box<Self>, _ctx: Context) -> BoxFuture<'static, Result<(), SimError>> {
        let ran = self.ran.clone();
        async move {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn kill(&mut self) {
        self.killed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct TimeRecorder {
    pub ticks: Mutex<Vec<Tick>>,
    pub running: Mutex<Vec<bool>>,
    pub errors: Mutex<Vec<SimError>>,
}

impl EventTimeListener for TimeRecorder {
    fn tick_update(&self, tick: Tick) {
        self.ticks.lock().unwrap().push(tick);
    }

    fn time_running(&self, running: bool) {
        self.running.lock().unwrap().push(running);
    }

    fn handle_error(&self, error: &SimError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}

#[derive(Default)]
pub struct TraceRecorder {
    pub entries: Mutex<Vec<String>>,
}

impl TraceRecorder {
    fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

impl EventTraceListener for TraceRecorder {
    fn trace_event(&self, now: Tick, event: &EventInfo) {
        self.push(format!("event {} {}", now, event.description));
    }

    fn trace_process_start(&self, now: Tick, description: &str) {
        self.push(format!("start {} {}", now, description));
    }

    fn trace_process_end(&self, now: Tick, description: &str) {
        self.push(format!("end {} {}", now, description));
    }

    fn trace_kill(&self, now: Tick, event: &EventInfo) {
        self.push(format!("kill {} {}", now, event.description));
    }

    fn trace_interrupt(&self, now: Tick, event: &EventInfo) {
        self.push(format!("interrupt {} {}", now, event.description));
    }

    fn trace_conditional_eval_ended(&self, now: Tick, fired: bool, description: &str) {
        self.push(format!("eval {} {} {}", now, fired, description));
    }
}

/// Дать задачам-исполнителям доработать после отмены
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
