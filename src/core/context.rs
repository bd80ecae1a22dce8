//! Контекст процесса: примитивы планирования, доступные коду модели
//!
//! `Context` передаётся в `ProcessTarget::process`. Все примитивы требуют,
//! чтобы процесс контекста был активным исполнителем своего менеджера;
//! иначе — `SimError::NotInProcess`. Ожидания (`wait_*`, `wait_until`,
//! `interrupt_event`) паркуют процесс до возобновления ведущим циклом.

use std::fmt;
use std::sync::{Arc, MutexGuard, Weak};

use tokio::sync::oneshot;
use tracing::debug;

use super::conditional::{Conditional, ConditionalEvent};
use super::event::{Event, Priority, Target, DEFAULT_PRIORITY};
use super::handle::{Binding, EventHandle};
use super::listener::EventInfo;
use super::manager::{Inner, State};
use super::process::{Handoff, ProcessId};
use super::target::ProcessTarget;
use super::time::Tick;
use crate::SimError;

/// Явный доступ процесса к своему менеджеру событий
#[derive(Clone)]
pub struct Context {
    inner: Weak<Inner>,
    pid: ProcessId,
    job: u64,
}

impl Context {
    pub(crate) fn new(inner: Weak<Inner>, pid: ProcessId, job: u64) -> Self {
        Self { inner, pid, job }
    }

    pub fn process_id(&self) -> ProcessId {
        self.pid
    }

    pub fn current_tick(&self) -> Tick {
        self.inner.upgrade().map_or(0, |inner| inner.lock().current_tick)
    }

    pub fn current_seconds(&self) -> f64 {
        self.inner.upgrade().map_or(0.0, |inner| {
            let state = inner.lock();
            state.scale.ticks_to_seconds(state.current_tick)
        })
    }

    pub fn ticks_to_seconds(&self, ticks: Tick) -> f64 {
        self.inner
            .upgrade()
            .map_or(0.0, |inner| inner.lock().scale.ticks_to_seconds(ticks))
    }

    pub fn seconds_to_nearest_tick(&self, seconds: f64) -> Tick {
        self.inner
            .upgrade()
            .map_or(0, |inner| inner.lock().scale.seconds_to_nearest_tick(seconds))
    }

    /// Подождать `ticks` тактов с приоритетом по умолчанию, FIFO
    pub async fn wait(&self, ticks: Tick) -> Result<(), SimError> {
        self.wait_ticks(ticks, DEFAULT_PRIORITY, true, None).await
    }

    /// Припарковать процесс до такта `now + ticks`
    pub async fn wait_ticks(
        &self,
        ticks: Tick,
        priority: Priority,
        fifo: bool,
        handle: Option<&EventHandle>,
    ) -> Result<(), SimError> {
        let inner = self.upgrade()?;
        let info = {
            let mut state = self.enter(&inner)?;
            check_ticks(ticks)?;
            let description = state.description_of(self.pid);
            state.enqueue(ticks, priority, fifo, Target::Wait(self.pid), description, handle)?
        };
        debug!("Процесс {} ждёт до такта {}", self.pid, info.tick);
        inner.trace(|l, now| l.trace_wait(now, &info));
        self.park(inner).await
    }

    pub async fn wait_seconds(
        &self,
        seconds: f64,
        priority: Priority,
        fifo: bool,
        handle: Option<&EventHandle>,
    ) -> Result<(), SimError> {
        let ticks = self.seconds_to_ticks(seconds)?;
        self.wait_ticks(ticks, priority, fifo, handle).await
    }

    /// Запланировать новую работу через `ticks` тактов, не паркуя вызывающего
    pub fn schedule_ticks<T: ProcessTarget>(
        &self,
        ticks: Tick,
        priority: Priority,
        fifo: bool,
        target: T,
        handle: Option<&EventHandle>,
    ) -> Result<(), SimError> {
        let inner = self.upgrade()?;
        let description = target.description();
        let info = {
            let mut state = self.enter(&inner)?;
            check_ticks(ticks)?;
            state.enqueue(ticks, priority, fifo, Target::Work(Box::new(target)), description, handle)?
        };
        debug!("Запланирован процесс '{}' на такт {}", info.description, info.tick);
        inner.trace(|l, now| l.trace_sched_process(now, &info));
        Ok(())
    }

    pub fn schedule_seconds<T: ProcessTarget>(
        &self,
        seconds: f64,
        priority: Priority,
        fifo: bool,
        target: T,
        handle: Option<&EventHandle>,
    ) -> Result<(), SimError> {
        let ticks = self.seconds_to_ticks(seconds)?;
        self.schedule_ticks(ticks, priority, fifo, target, handle)
    }

    /// Припарковать процесс, пока `condition` не станет истинным.
    ///
    /// Условие, истинное уже сейчас, всё равно ставится в очередь и будет
    /// проверено перед следующим сдвигом часов.
    pub async fn wait_until<C: Conditional>(
        &self,
        condition: C,
        handle: Option<&EventHandle>,
    ) -> Result<(), SimError> {
        let inner = self.upgrade()?;
        let description = {
            let mut state = self.enter(&inner)?;
            let description = state.description_of(self.pid);
            state.enqueue_conditional(Box::new(condition), Target::Wait(self.pid), description.clone(), handle)?;
            description
        };
        debug!("Процесс {} ждёт выполнения условия", self.pid);
        inner.trace(|l, now| l.trace_wait_until(now, &description));
        self.park(inner).await
    }

    /// Запустить `target`, когда `condition` станет истинным
    pub fn schedule_until<T: ProcessTarget, C: Conditional>(
        &self,
        target: T,
        condition: C,
        handle: Option<&EventHandle>,
    ) -> Result<(), SimError> {
        let inner = self.upgrade()?;
        let description = target.description();
        {
            let mut state = self.enter(&inner)?;
            state.enqueue_conditional(
                Box::new(condition),
                Target::Work(Box::new(target)),
                description.clone(),
                handle,
            )?;
        }
        inner.trace(|l, now| l.trace_sched_until(now, &description));
        Ok(())
    }

    /// Отменить событие токена без исполнения. Свободный токен — no-op.
    pub fn kill_event(&self, handle: &EventHandle) -> Result<(), SimError> {
        let inner = self.upgrade()?;
        let removed = {
            let mut state = self.enter(&inner)?;
            state.remove_bound(handle)
        };
        let Some((mut target, info)) = removed else {
            return Ok(());
        };

        debug!("Событие '{}' на такте {} отменено", info.description, info.tick);
        inner.trace(|l, now| l.trace_kill(now, &info));
        match target.waiting_process() {
            Some(pid) => inner.kill_process(pid),
            None => target.kill(),
        }
        Ok(())
    }

    /// Изъять событие токена и исполнить его немедленно.
    ///
    /// Вызывающий паркуется; он продолжит работу, как только прерванная цель
    /// отдаст управление. Свободный токен — no-op.
    pub async fn interrupt_event(&self, handle: &EventHandle) -> Result<(), SimError> {
        let inner = self.upgrade()?;
        let info = {
            let mut state = self.enter(&inner)?;
            if state.bound_process(handle) == Some(self.pid) {
                return Err(SimError::ActiveRunner(self.pid));
            }
            let Some((target, mut info)) = state.remove_bound(handle) else {
                return Ok(());
            };

            let now = state.current_tick;
            info.tick = now;
            let caller = state.description_of(self.pid);
            let resume = state.immediate_event(Target::Wait(self.pid), caller, info.priority);
            let interrupted = state.immediate_event(target, info.description.clone(), info.priority);
            state.immediate.push_front(resume);
            state.immediate.push_front(interrupted);
            info
        };
        debug!("Процесс {} прерывает '{}'", self.pid, info.description);
        inner.trace(|l, now| l.trace_interrupt(now, &info));
        self.park(inner).await
    }

    fn upgrade(&self) -> Result<Arc<Inner>, SimError> {
        self.inner.upgrade().ok_or(SimError::Killed)
    }

    fn enter<'a>(&self, inner: &'a Inner) -> Result<MutexGuard<'a, State>, SimError> {
        if inner.in_callback() {
            return Err(SimError::InCallback);
        }
        let state = inner.lock();
        if state.active != Some(self.pid) {
            return Err(SimError::NotInProcess);
        }
        match state.processes.get(&self.pid) {
            Some(slot) if slot.job == self.job => Ok(state),
            _ => Err(SimError::NotInProcess),
        }
    }

    fn seconds_to_ticks(&self, seconds: f64) -> Result<Tick, SimError> {
        if seconds.is_nan() || seconds < 0.0 {
            return Err(SimError::InvalidDuration(seconds));
        }
        Ok(self.seconds_to_nearest_tick(seconds))
    }

    /// Отдать управление ведущему циклу и ждать возобновления
    async fn park(&self, inner: Arc<Inner>) -> Result<(), SimError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = inner.lock();
            let slot = state.processes.get_mut(&self.pid).ok_or(SimError::NotInProcess)?;
            slot.resume = Some(tx);
            state.active = None;
        }
        inner.send_handoff(Handoff::Parked(self.pid));
        // сильная ссылка не держится, пока процесс припаркован
        drop(inner);
        rx.await.map_err(|_| SimError::Killed)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Context")
            .field("pid", &self.pid)
            .field("job", &self.job)
            .finish()
    }
}

fn check_ticks(ticks: Tick) -> Result<(), SimError> {
    if ticks < 0 {
        return Err(SimError::NegativeDuration(ticks));
    }
    Ok(())
}

impl State {
    /// Вставить событие через `ticks` от текущего такта и привязать токен
    pub(crate) fn enqueue(
        &mut self,
        ticks: Tick,
        priority: Priority,
        fifo: bool,
        target: Target,
        description: String,
        handle: Option<&EventHandle>,
    ) -> Result<EventInfo, SimError> {
        let id = self.next_event_id();
        let tick = super::time::saturating_tick(self.current_tick, ticks);
        if let Some(handle) = handle {
            handle.bind(Binding::Queued { id, tick, priority })?;
        }
        let event = Event {
            id,
            added_tick: self.current_tick,
            scheduled_tick: tick,
            priority,
            target,
            description,
            handle: handle.cloned(),
        };
        let info = EventInfo::from(&event);
        self.tree.insert(tick, priority, event, fifo);
        Ok(info)
    }

    pub(crate) fn enqueue_conditional(
        &mut self,
        condition: Box<dyn Conditional>,
        target: Target,
        description: String,
        handle: Option<&EventHandle>,
    ) -> Result<(), SimError> {
        let id = self.next_event_id();
        if let Some(handle) = handle {
            handle.bind(Binding::Conditional { id })?;
        }
        self.conditionals.push(ConditionalEvent {
            id,
            condition,
            target,
            description,
            handle: handle.cloned(),
        });
        Ok(())
    }

    /// Событие для очереди немедленного исполнения (прерывания)
    pub(crate) fn immediate_event(&mut self, target: Target, description: String, priority: Priority) -> Event {
        Event {
            id: self.next_event_id(),
            added_tick: self.current_tick,
            scheduled_tick: self.current_tick,
            priority,
            target,
            description,
            handle: None,
        }
    }

    /// Процесс, которого возобновит событие токена. Привязка не меняется.
    pub(crate) fn bound_process(&self, handle: &EventHandle) -> Option<ProcessId> {
        match handle.binding()? {
            Binding::Queued { id, tick, priority } => self
                .tree
                .find(tick, priority)?
                .events()
                .find(|event| event.id == id)?
                .target
                .waiting_process(),
            Binding::Conditional { .. } => None,
        }
    }

    /// Снять с токена привязку и изъять его событие или условие
    pub(crate) fn remove_bound(&mut self, handle: &EventHandle) -> Option<(Target, EventInfo)> {
        match handle.take()? {
            Binding::Queued { id, tick, priority } => {
                let event = self.tree.remove_where(tick, priority, |e| e.id == id)?;
                let info = EventInfo::from(&event);
                Some((event.target, info))
            }
            Binding::Conditional { id } => {
                let pos = self.conditionals.iter().position(|c| c.id == id)?;
                let cond = self.conditionals.remove(pos);
                let info = EventInfo {
                    added_tick: self.current_tick,
                    tick: self.current_tick,
                    priority: DEFAULT_PRIORITY,
                    description: cond.description,
                };
                Some((cond.target, info))
            }
        }
    }
}
