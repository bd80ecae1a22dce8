//! Процессы-исполнители: пул переиспользуемых задач tokio
//!
//! Каждый исполнитель — задача tokio, которая в цикле получает работу
//! (`Job`) по своему каналу. Стек вызовов модели живёт в future задачи,
//! поэтому процесс может припарковаться на любой глубине вызовов.
//! Управление передаётся каналами: процесс паркуется, отправив `Handoff`
//! ведущему циклу и ожидая `oneshot` возобновления.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Weak;

use futures::FutureExt;
use serde::{Serialize, Deserialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::context::Context;
use super::manager::Inner;
use super::target::ProcessTarget;
use crate::SimError;

/// Максимальный размер пула свободных исполнителей по умолчанию
pub const DEFAULT_MAX_POOL_SIZE: usize = 100;

/// Идентификатор процесса-исполнителя
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub(crate) u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Работа для исполнителя
pub(crate) struct Job {
    pub(crate) target: Box<dyn ProcessTarget>,
    pub(crate) context: Context,
    /// Флаг уничтожения: срабатывает, когда отправитель отправил или упал
    pub(crate) die: oneshot::Receiver<()>,
}

/// Сообщение ведущему циклу о том, что активный процесс отдал управление
#[derive(Debug)]
pub(crate) enum Handoff {
    Parked(ProcessId),
    Finished(ProcessId),
    Fault(ProcessId, SimError),
}

/// Итог одной работы исполнителя
#[derive(Debug)]
pub(crate) enum JobOutcome {
    Finished,
    Killed,
    Fault(SimError),
}

/// Сторона ядра у исполнителя: канал работ
pub(crate) struct Worker {
    pid: ProcessId,
    jobs: mpsc::UnboundedSender<Job>,
}

impl Worker {
    fn spawn(runtime: &Handle, manager: Weak<Inner>, pid: ProcessId) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_worker(manager, pid, rx));
        debug!("Создан исполнитель {}", pid);
        Self { pid, jobs }
    }

    pub(crate) fn pid(&self) -> ProcessId {
        self.pid
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Job> {
        self.jobs.clone()
    }
}

/// Состояние живого процесса (занятого работой исполнителя)
pub(crate) struct ProcessSlot {
    pub(crate) worker: Worker,
    /// Поколение работы; контекст прошлой работы этого исполнителя недействителен
    pub(crate) job: u64,
    pub(crate) description: String,
    /// Отправитель возобновления, пока процесс припаркован
    pub(crate) resume: Option<oneshot::Sender<()>>,
    pub(crate) die: Option<oneshot::Sender<()>>,
}

impl ProcessSlot {
    pub(crate) fn is_parked(&self) -> bool {
        self.resume.is_some()
    }
}

/// Пул свободных исполнителей, ограниченный сверху
pub(crate) struct ProcessPool {
    idle: Vec<Worker>,
    max_idle: usize,
    next_id: u64,
}

impl ProcessPool {
    pub(crate) fn new(max_idle: usize) -> Self {
        Self {
            idle: Vec::new(),
            max_idle,
            next_id: 0,
        }
    }

    /// Взять свободного исполнителя или запустить нового
    pub(crate) fn acquire(&mut self, manager: &Weak<Inner>) -> Result<Worker, SimError> {
        if let Some(worker) = self.idle.pop() {
            return Ok(worker);
        }
        let runtime = Handle::try_current().map_err(|_| SimError::NoRuntime)?;
        let pid = ProcessId(self.next_id);
        self.next_id += 1;
        Ok(Worker::spawn(&runtime, manager.clone(), pid))
    }

    /// Вернуть исполнителя; сверх лимита он отбрасывается и его задача завершается
    pub(crate) fn release(&mut self, worker: Worker) {
        if self.idle.len() < self.max_idle {
            self.idle.push(worker);
        }
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.len()
    }

    #[cfg(test)]
    pub(crate) fn spawned(&self) -> u64 {
        self.next_id
    }
}

/// Цикл исполнителя: выполняет работы, пока жив канал
pub(crate) async fn run_worker(
    manager: Weak<Inner>,
    pid: ProcessId,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = jobs.recv().await {
        let Job { target, context, die } = job;
        let description = target.description();
        let work = AssertUnwindSafe(target.process(context)).catch_unwind();

        // флаг уничтожения проверяется первым: после него код модели не исполняется
        let outcome = tokio::select! {
            biased;
            _ = die => JobOutcome::Killed,
            result = work => match result {
                Ok(Ok(())) | Ok(Err(SimError::Killed)) => JobOutcome::Finished,
                Ok(Err(err)) => JobOutcome::Fault(err),
                Err(payload) => JobOutcome::Fault(SimError::Panicked {
                    description: description.clone(),
                    message: panic_message(payload.as_ref()),
                }),
            },
        };

        let Some(inner) = manager.upgrade() else {
            warn!("Менеджер событий удалён, исполнитель {} завершается", pid);
            break;
        };
        inner.finish_job(pid, &description, outcome);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
