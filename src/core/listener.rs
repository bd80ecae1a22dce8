//! Интерфейсы обратных вызовов, которые ядро вызывает наружу
//!
//! Слушатели не принадлежат ядру. Пока выполняется любой обратный вызов,
//! примитивы планирования `Context` завершаются ошибкой `SimError::InCallback`.
//! Слушатель не должен обращаться к `EventManager` изнутри вызова.

use super::event::{Event, Priority};
use super::time::Tick;
use crate::SimError;

/// Описание события, передаваемое трассировщику
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInfo {
    pub added_tick: Tick,
    pub tick: Tick,
    pub priority: Priority,
    pub description: String,
}

impl From<&Event> for EventInfo {
    fn from(event: &Event) -> Self {
        Self {
            added_tick: event.added_tick,
            tick: event.scheduled_tick,
            priority: event.priority,
            description: event.description.clone(),
        }
    }
}

/// Слушатель логических часов
pub trait EventTimeListener: Send + Sync {
    /// Часы продвинулись до `tick`
    fn tick_update(&self, tick: Tick);

    /// Цикл событий запущен (`true`) или остановлен/простаивает (`false`)
    fn time_running(&self, running: bool);

    /// Модель подняла неустранимую ошибку; цикл больше не продвигается
    fn handle_error(&self, error: &SimError);
}

/// Трассировка решений планировщика для внешнего журнала воспроизведения
#[allow(unused_variables)]
pub trait EventTraceListener: Send + Sync {
    fn trace_event(&self, now: Tick, event: &EventInfo) {}

    fn trace_wait(&self, now: Tick, event: &EventInfo) {}

    fn trace_sched_process(&self, now: Tick, event: &EventInfo) {}

    fn trace_process_start(&self, now: Tick, description: &str) {}

    fn trace_process_end(&self, now: Tick, description: &str) {}

    fn trace_interrupt(&self, now: Tick, event: &EventInfo) {}

    fn trace_kill(&self, now: Tick, event: &EventInfo) {}

    fn trace_wait_until(&self, now: Tick, description: &str) {}

    fn trace_sched_until(&self, now: Tick, description: &str) {}

    fn trace_conditional_eval(&self, now: Tick, description: &str) {}

    fn trace_conditional_eval_ended(&self, now: Tick, fired: bool, description: &str) {}
}
