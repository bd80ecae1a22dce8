//! Записи событий очереди

use std::fmt;
use serde::{Serialize, Deserialize};

use super::handle::EventHandle;
use super::process::ProcessId;
use super::target::ProcessTarget;
use super::time::Tick;

/// Приоритет события среди событий одного такта (меньше = раньше)
pub type Priority = i32;

/// Приоритет по умолчанию
pub const DEFAULT_PRIORITY: Priority = 5;

/// Идентификатор события, уникальный в пределах менеджера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub(crate) u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Что запускается при срабатывании события
pub(crate) enum Target {
    /// Новая работа: будет выделен процесс из пула
    Work(Box<dyn ProcessTarget>),
    /// Припаркованный процесс, который нужно возобновить
    Wait(ProcessId),
}

impl Target {
    pub(crate) fn waiting_process(&self) -> Option<ProcessId> {
        match self {
            Target::Work(_) => None,
            Target::Wait(pid) => Some(*pid),
        }
    }

    /// Вызвать хук отмены у новой работы
    pub(crate) fn kill(&mut self) {
        if let Target::Work(target) = self {
            target.kill();
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Target::Work(_) => f.write_str("Work"),
            Target::Wait(pid) => write!(f, "Wait({pid})"),
        }
    }
}

/// Событие в дереве: «запустить цель на такте `scheduled_tick` с приоритетом»
#[derive(Debug)]
pub(crate) struct Event {
    pub(crate) id: EventId,
    pub(crate) added_tick: Tick,
    pub(crate) scheduled_tick: Tick,
    pub(crate) priority: Priority,
    pub(crate) target: Target,
    pub(crate) description: String,
    pub(crate) handle: Option<EventHandle>,
}

impl Event {
    pub(crate) fn clear_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.clear();
        }
    }
}

/// Снимок ожидающего события для внешнего просмотра
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub tick: Tick,
    pub priority: Priority,
    pub seconds: f64,
    pub description: String,
}
