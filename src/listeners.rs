//! Готовые слушатели, пишущие в журнал `tracing`

use tracing::{debug, error, info, trace};

use crate::core::{EventInfo, EventTimeListener, EventTraceListener, Tick};
use crate::SimError;

/// Пишет сдвиги часов и ошибки модели в журнал
#[derive(Debug, Clone, Default)]
pub struct TracingTimeListener {
    name: String,
}

impl TracingTimeListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl EventTimeListener for TracingTimeListener {
    fn tick_update(&self, tick: Tick) {
        trace!("[{}] такт {}", self.name, tick);
    }

    fn time_running(&self, running: bool) {
        if running {
            info!("[{}] время пошло", self.name);
        } else {
            info!("[{}] время остановлено", self.name);
        }
    }

    fn handle_error(&self, error: &SimError) {
        error!("[{}] симуляция остановлена ошибкой: {}", self.name, error);
    }
}

/// Трассировщик решений планировщика на уровне `debug`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTraceListener;

impl EventTraceListener for TracingTraceListener {
    fn trace_event(&self, now: Tick, event: &EventInfo) {
        debug!(now, tick = event.tick, priority = event.priority, "событие '{}'", event.description);
    }

    fn trace_wait(&self, now: Tick, event: &EventInfo) {
        debug!(now, until = event.tick, "'{}' ждёт", event.description);
    }

    fn trace_sched_process(&self, now: Tick, event: &EventInfo) {
        debug!(now, at = event.tick, "запланирован '{}'", event.description);
    }

    fn trace_process_start(&self, now: Tick, description: &str) {
        debug!(now, "старт '{}'", description);
    }

    fn trace_process_end(&self, now: Tick, description: &str) {
        debug!(now, "конец '{}'", description);
    }

    fn trace_interrupt(&self, now: Tick, event: &EventInfo) {
        debug!(now, "прерывание '{}'", event.description);
    }

    fn trace_kill(&self, now: Tick, event: &EventInfo) {
        debug!(now, was_at = event.tick, "отмена '{}'", event.description);
    }

    fn trace_wait_until(&self, now: Tick, description: &str) {
        debug!(now, "'{}' ждёт условия", description);
    }

    fn trace_sched_until(&self, now: Tick, description: &str) {
        debug!(now, "'{}' запустится по условию", description);
    }

    fn trace_conditional_eval_ended(&self, now: Tick, fired: bool, description: &str) {
        trace!(now, fired, "условие '{}' проверено", description);
    }
}
