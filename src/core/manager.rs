//! Менеджер событий: логические часы, очередь, пул процессов и ведущий цикл
//!
//! В каждый момент исполняется не больше одного процесса модели. Ведущий
//! цикл передаёт управление процессу и ждёт сообщения `Handoff`, пока тот
//! не припаркуется или не завершится. Всё состояние меняется только под
//! одной блокировкой `State`; код модели никогда не исполняется под ней.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::conditional::{ConditionalData, ConditionalEvent};
use super::context::Context;
use super::event::{Event, EventData, EventId, Priority, Target, DEFAULT_PRIORITY};
use super::handle::{Binding, EventHandle};
use super::listener::{EventInfo, EventTimeListener, EventTraceListener};
use super::process::{Handoff, Job, JobOutcome, ProcessId, ProcessPool, ProcessSlot};
use super::target::ProcessTarget;
use super::time::{Tick, TimeScale, MAX_TICK};
use super::tree::EventTree;
use crate::config::KernelConfig;
use crate::SimError;

/// Почему ведущий цикл остановился
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Очередь пуста
    Idle,
    /// Запрошена пауза (или выполнено одно событие в пошаговом режиме)
    Paused,
    /// Часы дошли до заданного такта
    LimitReached,
}

#[derive(Debug, Clone, Copy)]
enum RunLimit {
    Tick(Tick),
    OneEvent,
}

enum Next {
    Dispatch(Event),
    Advance,
    Stop(StopReason),
}

enum Advance {
    To(Tick),
    Pace { tick: Option<Tick>, sleep: Duration },
    Stop(StopReason),
}

/// Разделяемое состояние ядра; меняется только под блокировкой
pub(crate) struct State {
    pub(crate) current_tick: Tick,
    pub(crate) tree: EventTree<Event>,
    pub(crate) conditionals: Vec<ConditionalEvent>,
    /// Прерванные цели и возобновления вызывающих, исполняются раньше дерева
    pub(crate) immediate: VecDeque<Event>,
    pub(crate) pool: ProcessPool,
    pub(crate) processes: HashMap<ProcessId, ProcessSlot>,
    pub(crate) active: Option<ProcessId>,
    pub(crate) scale: TimeScale,
    next_event_id: u64,
    next_job: u64,
    real_time: bool,
    real_time_factor: f64,
    pacing_slice: Duration,
    /// Точка синхронизации реального времени: (момент, такт)
    rt_sync: Option<(Instant, Tick)>,
    running: bool,
    pause_requested: bool,
    halted: bool,
    time_listener: Option<Arc<dyn EventTimeListener>>,
    trace_listener: Option<Arc<dyn EventTraceListener>>,
}

impl State {
    fn new(config: &KernelConfig) -> Self {
        Self {
            current_tick: 0,
            tree: EventTree::new(),
            conditionals: Vec::new(),
            immediate: VecDeque::new(),
            pool: ProcessPool::new(config.max_pool_size),
            processes: HashMap::new(),
            active: None,
            scale: TimeScale::new(config.tick_length),
            next_event_id: 0,
            next_job: 0,
            real_time: config.real_time,
            real_time_factor: config.real_time_factor,
            pacing_slice: Duration::from_millis(config.pacing_slice_ms),
            rt_sync: None,
            running: false,
            pause_requested: false,
            halted: false,
            time_listener: None,
            trace_listener: None,
        }
    }

    pub(crate) fn next_event_id(&mut self) -> EventId {
        let id = EventId(self.next_event_id);
        self.next_event_id += 1;
        id
    }

    pub(crate) fn description_of(&self, pid: ProcessId) -> String {
        self.processes
            .get(&pid)
            .map(|slot| slot.description.clone())
            .unwrap_or_default()
    }

    fn event_data(&self, event: &Event) -> EventData {
        EventData {
            tick: event.scheduled_tick,
            priority: event.priority,
            seconds: self.scale.ticks_to_seconds(event.scheduled_tick),
            description: event.description.clone(),
        }
    }

    /// Забрать флаги уничтожения всех живых процессов
    fn take_die_flags(&mut self) -> Vec<tokio::sync::oneshot::Sender<()>> {
        self.processes
            .values_mut()
            .filter_map(|slot| slot.die.take())
            .collect()
    }
}

/// Поднимает флаг обратного вызова на время своего существования
struct CallbackGuard<'a>(&'a AtomicBool);

impl<'a> CallbackGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for CallbackGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct Inner {
    name: String,
    state: Mutex<State>,
    handoff_tx: mpsc::UnboundedSender<Handoff>,
    /// Владелец приёмника — единственный ведущий цикл
    handoff_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Handoff>>,
    in_callback: AtomicBool,
    /// Будит ожидание реального времени при внешнем планировании
    wake: Notify,
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn in_callback(&self) -> bool {
        self.in_callback.load(Ordering::SeqCst)
    }

    pub(crate) fn send_handoff(&self, handoff: Handoff) {
        // приёмник живёт столько же, сколько Inner
        let _ = self.handoff_tx.send(handoff);
    }

    pub(crate) fn trace<F>(&self, f: F)
    where
        F: FnOnce(&dyn EventTraceListener, Tick),
    {
        let (listener, now) = {
            let state = self.lock();
            (state.trace_listener.clone(), state.current_tick)
        };
        if let Some(listener) = listener {
            let _guard = CallbackGuard::enter(&self.in_callback);
            f(listener.as_ref(), now);
        }
    }

    fn notify_time<F>(&self, f: F)
    where
        F: FnOnce(&dyn EventTimeListener),
    {
        let listener = self.lock().time_listener.clone();
        if let Some(listener) = listener {
            let _guard = CallbackGuard::enter(&self.in_callback);
            f(listener.as_ref());
        }
    }

    /// Уничтожить припаркованный процесс: его работа будет сброшена без исполнения
    pub(crate) fn kill_process(&self, pid: ProcessId) {
        let die = self.lock().processes.get_mut(&pid).and_then(|slot| slot.die.take());
        if let Some(die) = die {
            debug!("Процесс {} уничтожается", pid);
            let _ = die.send(());
        }
    }

    /// Исполнитель закончил работу: вернуть его в пул и сообщить ведущему циклу
    pub(crate) fn finish_job(&self, pid: ProcessId, description: &str, outcome: JobOutcome) {
        let was_active = {
            let mut state = self.lock();
            let Some(slot) = state.processes.remove(&pid) else {
                return;
            };
            let was_active = state.active == Some(pid);
            if was_active {
                state.active = None;
            }
            state.pool.release(slot.worker);
            was_active
        };

        match outcome {
            JobOutcome::Killed => {
                debug!("Работа '{}' процесса {} сброшена", description, pid);
                if was_active {
                    self.send_handoff(Handoff::Finished(pid));
                }
            }
            JobOutcome::Finished => {
                if was_active {
                    self.trace(|l, now| l.trace_process_end(now, description));
                    self.send_handoff(Handoff::Finished(pid));
                }
            }
            JobOutcome::Fault(err) => {
                if was_active {
                    self.send_handoff(Handoff::Fault(pid, err));
                } else {
                    warn!("Ошибка неактивного процесса {}: {}", pid, err);
                }
            }
        }
    }
}

/// Координатор симуляции. Дешёвый для клонирования дескриптор.
#[derive(Clone)]
pub struct EventManager {
    inner: Arc<Inner>,
}

impl EventManager {
    pub fn new(name: impl Into<String>) -> Self {
        let config = KernelConfig {
            name: name.into(),
            ..KernelConfig::default()
        };
        Self::build(&config)
    }

    pub fn with_config(config: KernelConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self::build(&config))
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock()
    }

    fn build(config: &KernelConfig) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                name: config.name.clone(),
                state: Mutex::new(State::new(config)),
                handoff_tx,
                handoff_rx: tokio::sync::Mutex::new(handoff_rx),
                in_callback: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn set_time_listener(&self, listener: Option<Arc<dyn EventTimeListener>>) {
        self.inner.lock().time_listener = listener;
    }

    pub fn set_trace_listener(&self, listener: Option<Arc<dyn EventTraceListener>>) {
        self.inner.lock().trace_listener = listener;
    }

    pub fn current_tick(&self) -> Tick {
        self.inner.lock().current_tick
    }

    pub fn current_seconds(&self) -> f64 {
        let state = self.inner.lock();
        state.scale.ticks_to_seconds(state.current_tick)
    }

    pub fn ticks_to_seconds(&self, ticks: Tick) -> f64 {
        self.inner.lock().scale.ticks_to_seconds(ticks)
    }

    pub fn seconds_to_nearest_tick(&self, seconds: f64) -> Tick {
        self.inner.lock().scale.seconds_to_nearest_tick(seconds)
    }

    /// Такт ближайшего события в очереди
    pub fn next_event_tick(&self) -> Option<Tick> {
        let state = self.inner.lock();
        if !state.immediate.is_empty() {
            return Some(state.current_tick);
        }
        state.tree.minimum().map(|node| node.tick())
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn is_halted(&self) -> bool {
        self.inner.lock().halted
    }

    pub fn idle_workers(&self) -> usize {
        self.inner.lock().pool.idle_count()
    }

    /// Процессы, занятые работой (включая припаркованные)
    pub fn live_processes(&self) -> usize {
        self.inner.lock().processes.len()
    }

    pub fn parked_processes(&self) -> usize {
        self.inner.lock().processes.values().filter(|slot| slot.is_parked()).count()
    }

    /// Ожидающие события в порядке исполнения.
    ///
    /// Очередь прерываний идёт первой: её события исполняются на текущем такте
    /// раньше дерева и остаются в ней, если цикл встал на паузу посреди цепочки.
    pub fn pending_events(&self) -> Vec<EventData> {
        let state = self.inner.lock();
        state
            .immediate
            .iter()
            .chain(state.tree.iter().flat_map(|node| node.events()))
            .map(|event| state.event_data(event))
            .collect()
    }

    pub fn pending_conditionals(&self) -> Vec<ConditionalData> {
        self.inner.lock().conditionals.iter().map(|c| c.data()).collect()
    }

    /// Включить или выключить привязку к реальному времени
    pub fn set_real_time(&self, enabled: bool, factor: f64) -> Result<(), SimError> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(SimError::Config(format!("invalid real-time factor {factor}")));
        }
        let mut state = self.inner.lock();
        state.real_time = enabled;
        state.real_time_factor = factor;
        state.rt_sync = None;
        drop(state);
        self.inner.wake.notify_one();
        Ok(())
    }

    pub fn set_tick_length(&self, seconds: f64) -> Result<(), SimError> {
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(SimError::Config(format!("invalid tick length {seconds}")));
        }
        let mut state = self.inner.lock();
        state.scale = TimeScale::new(seconds);
        state.rt_sync = None;
        Ok(())
    }

    /// Запланировать работу извне любого процесса (внешний стимул)
    pub fn schedule_process_external<T: ProcessTarget>(
        &self,
        ticks: Tick,
        priority: Priority,
        fifo: bool,
        target: T,
        handle: Option<&EventHandle>,
    ) -> Result<(), SimError> {
        if ticks < 0 {
            return Err(SimError::NegativeDuration(ticks));
        }
        if self.inner.in_callback() {
            return Err(SimError::InCallback);
        }
        let description = target.description();
        let info = {
            let mut state = self.inner.lock();
            if state.halted {
                return Err(SimError::Halted);
            }
            state.enqueue(ticks, priority, fifo, Target::Work(Box::new(target)), description, handle)?
        };
        debug!("Внешнее событие '{}' запланировано на такт {}", info.description, info.tick);
        // ожидание реального времени пересчитает ближайший такт
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Остановить ведущий цикл на ближайшей границе итерации
    pub fn pause(&self) {
        let mut state = self.inner.lock();
        if !state.running {
            return;
        }
        state.pause_requested = true;
        drop(state);
        self.inner.wake.notify_one();
    }

    /// Выполнять события до такта `target_tick` включительно
    pub async fn resume(&self, target_tick: Tick) -> Result<StopReason, SimError> {
        self.drive(RunLimit::Tick(target_tick)).await
    }

    /// Выполнить ровно одно событие (сдвинув часы при необходимости) и встать на паузу
    pub async fn run_one_event(&self) -> Result<StopReason, SimError> {
        self.drive(RunLimit::OneEvent).await
    }

    /// Выполнить все события ближайшего такта
    pub async fn run_to_next_tick(&self) -> Result<StopReason, SimError> {
        let limit = {
            let state = self.inner.lock();
            match state.tree.minimum() {
                _ if !state.immediate.is_empty() => state.current_tick,
                Some(node) => node.tick().max(state.current_tick),
                None => state.current_tick,
            }
        };
        self.drive(RunLimit::Tick(limit)).await
    }

    /// Полный сброс между прогонами: все процессы и события уничтожаются,
    /// хуки отмены вызываются, часы возвращаются к нулю.
    pub fn clear(&self) -> Result<(), SimError> {
        let _driver = self
            .inner
            .handoff_rx
            .try_lock()
            .map_err(|_| SimError::AlreadyRunning)?;

        let (events, conditionals, doomed) = {
            let mut state = self.inner.lock();
            let mut events = state.tree.drain();
            events.extend(state.immediate.drain(..));
            let conditionals = mem::take(&mut state.conditionals);
            let doomed = state.take_die_flags();
            state.current_tick = 0;
            state.active = None;
            state.halted = false;
            state.pause_requested = false;
            state.rt_sync = None;
            (events, conditionals, doomed)
        };
        drop(doomed);

        for mut event in events {
            event.clear_handle();
            event.target.kill();
        }
        for mut cond in conditionals {
            if let Some(handle) = cond.handle.take() {
                handle.clear();
            }
            cond.target.kill();
        }
        info!("Менеджер '{}' сброшен", self.inner.name);
        Ok(())
    }

    async fn drive(&self, limit: RunLimit) -> Result<StopReason, SimError> {
        let inner = &self.inner;
        let mut handoff = inner
            .handoff_rx
            .try_lock()
            .map_err(|_| SimError::AlreadyRunning)?;
        {
            let mut state = inner.lock();
            if state.halted {
                return Err(SimError::Halted);
            }
            state.running = true;
            state.pause_requested = false;
            state.rt_sync = None;
        }
        info!("Запуск цикла событий '{}' ({:?})", inner.name, limit);
        inner.notify_time(|l| l.time_running(true));

        let mut dispatched = 0usize;
        let result = loop {
            match self.take_next(limit, dispatched) {
                Next::Stop(reason) => break Ok(reason),
                Next::Dispatch(event) => {
                    dispatched += 1;
                    if let Err(err) = self.dispatch(event, &mut handoff).await {
                        break Err(err);
                    }
                    continue;
                }
                Next::Advance => {}
            }

            if self.evaluate_conditionals() {
                continue;
            }

            match self.advance(limit) {
                Advance::Stop(reason) => break Ok(reason),
                Advance::To(tick) => {
                    trace!("Часы сдвинуты на такт {}", tick);
                    inner.notify_time(|l| l.tick_update(tick));
                }
                Advance::Pace { tick, sleep } => {
                    if let Some(tick) = tick {
                        inner.notify_time(|l| l.tick_update(tick));
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(sleep) => {}
                        _ = inner.wake.notified() => {}
                    }
                }
            }
        };

        let tick = {
            let mut state = inner.lock();
            state.running = false;
            state.pause_requested = false;
            state.current_tick
        };
        info!("Цикл событий '{}' остановлен на такте {}: {:?}", inner.name, tick, result);
        inner.notify_time(|l| l.time_running(false));
        result
    }

    /// Шаг 1–2 цикла: пауза, очередь прерываний, события текущего такта
    fn take_next(&self, limit: RunLimit, dispatched: usize) -> Next {
        let mut state = self.inner.lock();
        if state.pause_requested {
            return Next::Stop(StopReason::Paused);
        }
        if matches!(limit, RunLimit::OneEvent) && dispatched > 0 {
            return Next::Stop(StopReason::Paused);
        }
        if let Some(event) = state.immediate.pop_front() {
            return Next::Dispatch(event);
        }

        let now = state.current_tick;
        if state.tree.minimum().map(|node| node.tick()) == Some(now) {
            if let Some((_, _, mut event)) = state.tree.pop_first() {
                event.clear_handle();
                return Next::Dispatch(event);
            }
        }
        Next::Advance
    }

    /// Шаг 4: сдвинуть часы к ближайшему событию или пределу
    fn advance(&self, limit: RunLimit) -> Advance {
        let mut state = self.inner.lock();
        let Some(next) = state.tree.minimum().map(|node| node.tick()) else {
            return Advance::Stop(StopReason::Idle);
        };
        let limit_tick = match limit {
            RunLimit::Tick(tick) => tick,
            RunLimit::OneEvent => MAX_TICK,
        };
        if state.current_tick >= limit_tick {
            return Advance::Stop(StopReason::LimitReached);
        }
        let target = next.min(limit_tick);

        if state.real_time {
            let now = Instant::now();
            let current = state.current_tick;
            let (base, base_tick) = *state.rt_sync.get_or_insert((now, current));
            let ticks_per_second = state.real_time_factor / state.scale.tick_length();
            let elapsed = now.saturating_duration_since(base).as_secs_f64();
            let rt_tick = base_tick.saturating_add((elapsed * ticks_per_second) as Tick);

            if rt_tick < target {
                let remaining = (target - rt_tick) as f64 / ticks_per_second;
                let remaining = Duration::try_from_secs_f64(remaining.max(0.0)).unwrap_or(Duration::MAX);
                let sleep = state.pacing_slice.min(remaining);
                let moved = rt_tick > current;
                if moved {
                    state.current_tick = rt_tick;
                }
                return Advance::Pace {
                    tick: moved.then_some(rt_tick),
                    sleep,
                };
            }
        }

        state.current_tick = target;
        Advance::To(target)
    }

    /// Шаг 3: один проход по условиям. Истинные ставятся в очередь на текущий такт.
    ///
    /// Условие, ставшее истинным как побочный эффект срабатывания другого в
    /// этом же проходе, будет проверено только при следующей попытке сдвига.
    fn evaluate_conditionals(&self) -> bool {
        let inner = &self.inner;
        let (pending, trace_listener, now) = {
            let mut state = inner.lock();
            if state.conditionals.is_empty() {
                return false;
            }
            (
                mem::take(&mut state.conditionals),
                state.trace_listener.clone(),
                state.current_tick,
            )
        };

        let mut fired = Vec::new();
        let mut waiting = Vec::with_capacity(pending.len());
        {
            let _guard = CallbackGuard::enter(&inner.in_callback);
            for cond in pending {
                if let Some(listener) = &trace_listener {
                    listener.trace_conditional_eval(now, &cond.description);
                }
                let satisfied = cond.is_satisfied();
                if let Some(listener) = &trace_listener {
                    listener.trace_conditional_eval_ended(now, satisfied, &cond.description);
                }
                if satisfied {
                    fired.push(cond);
                } else {
                    waiting.push(cond);
                }
            }
        }

        let any_fired = !fired.is_empty();
        let mut state = inner.lock();
        // условия, добавленные во время прохода, остаются после проверенных
        waiting.append(&mut state.conditionals);
        state.conditionals = waiting;

        let now = state.current_tick;
        for cond in fired {
            let id = state.next_event_id();
            if let Some(handle) = &cond.handle {
                handle.clear();
                let _ = handle.bind(Binding::Queued {
                    id,
                    tick: now,
                    priority: DEFAULT_PRIORITY,
                });
            }
            debug!("Условие '{}' выполнено на такте {}", cond.description, now);
            let event = Event {
                id,
                added_tick: now,
                scheduled_tick: now,
                priority: DEFAULT_PRIORITY,
                target: cond.target,
                description: cond.description,
                handle: cond.handle,
            };
            state.tree.insert(now, DEFAULT_PRIORITY, event, true);
        }
        any_fired
    }

    /// Передать управление цели события и дождаться, пока она его вернёт
    async fn dispatch(
        &self,
        event: Event,
        handoff: &mut mpsc::UnboundedReceiver<Handoff>,
    ) -> Result<(), SimError> {
        let inner = &self.inner;
        let info = EventInfo::from(&event);
        inner.trace(|l, now| l.trace_event(now, &info));

        match event.target {
            Target::Wait(pid) => {
                let resume = {
                    let mut state = inner.lock();
                    let resume = state.processes.get_mut(&pid).and_then(|slot| slot.resume.take());
                    if resume.is_some() {
                        state.active = Some(pid);
                    }
                    resume
                };
                let Some(resume) = resume else {
                    warn!("Процесс {} для события '{}' уже не существует", pid, info.description);
                    return Ok(());
                };
                debug!("Возобновление процесса {} ('{}')", pid, info.description);
                if resume.send(()).is_err() {
                    inner.lock().active = None;
                    return Ok(());
                }
            }
            Target::Work(target) => self.start_process(target, info.description.clone())?,
        }

        match handoff.recv().await {
            Some(Handoff::Parked(pid)) => {
                trace!("Процесс {} припаркован", pid);
                Ok(())
            }
            Some(Handoff::Finished(pid)) => {
                trace!("Процесс {} завершил работу", pid);
                Ok(())
            }
            Some(Handoff::Fault(pid, err)) => Err(self.halt(pid, err)),
            None => Err(SimError::Halted),
        }
    }

    /// Выделить процесс из пула и отдать ему работу
    fn start_process(&self, target: Box<dyn ProcessTarget>, description: String) -> Result<(), SimError> {
        let inner = &self.inner;
        let (die_tx, die_rx) = tokio::sync::oneshot::channel();
        let (jobs, pid, job) = {
            let mut state = inner.lock();
            let worker = state.pool.acquire(&Arc::downgrade(inner))?;
            let pid = worker.pid();
            let jobs = worker.sender();
            let job = state.next_job;
            state.next_job += 1;
            state.processes.insert(
                pid,
                ProcessSlot {
                    worker,
                    job,
                    description: description.clone(),
                    resume: None,
                    die: Some(die_tx),
                },
            );
            state.active = Some(pid);
            (jobs, pid, job)
        };

        debug!("Процесс {} начинает '{}'", pid, description);
        inner.trace(|l, now| l.trace_process_start(now, &description));
        let context = Context::new(Arc::downgrade(inner), pid, job);
        if jobs.send(Job { target, context, die: die_rx }).is_err() {
            let mut state = inner.lock();
            state.processes.remove(&pid);
            state.active = None;
            return Err(SimError::NoRuntime);
        }
        Ok(())
    }

    /// Ошибка модели: остановить цикл, размотать припаркованные процессы, сообщить слушателю
    fn halt(&self, pid: ProcessId, err: SimError) -> SimError {
        warn!("Процесс {} завершился ошибкой: {}; цикл остановлен", pid, err);
        let doomed = {
            let mut state = self.inner.lock();
            state.halted = true;
            state.active = None;
            state.take_die_flags()
        };
        drop(doomed);
        self.inner.notify_time(|l| l.handle_error(&err));
        err
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("name", &self.inner.name)
            .finish()
    }
}
