//! Высокоуровневая обёртка над менеджером событий

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::config::KernelConfig;
use crate::core::{
    saturating_tick, EventManager, ProcessTarget, SimTime, StopReason, DEFAULT_PRIORITY, MAX_TICK,
};
use crate::listeners::{TracingTimeListener, TracingTraceListener};
use crate::SimError;

pub struct Simulator {
    manager: EventManager,
}

impl Simulator {
    pub fn new(config: KernelConfig) -> Result<Self, SimError> {
        Ok(Self {
            manager: EventManager::with_config(config)?,
        })
    }

    /// Подключить слушателей, пишущих в журнал `tracing`
    pub fn with_tracing(self) -> Self {
        let name = self.manager.name().to_string();
        self.manager
            .set_time_listener(Some(Arc::new(TracingTimeListener::new(name))));
        self.manager
            .set_trace_listener(Some(Arc::new(TracingTraceListener)));
        self
    }

    pub fn manager(&self) -> &EventManager {
        &self.manager
    }

    pub fn now(&self) -> SimTime {
        SimTime::new(self.manager.current_seconds())
    }

    /// Запустить процесс на текущем такте
    pub fn start<T: ProcessTarget>(&self, target: T) -> Result<(), SimError> {
        self.manager
            .schedule_process_external(0, DEFAULT_PRIORITY, true, target, None)
    }

    /// Запустить процесс через `seconds` модельных секунд
    pub fn start_after<T: ProcessTarget>(&self, seconds: f64, target: T) -> Result<(), SimError> {
        if seconds.is_nan() || seconds < 0.0 {
            return Err(SimError::InvalidDuration(seconds));
        }
        let ticks = self.manager.seconds_to_nearest_tick(seconds);
        self.manager
            .schedule_process_external(ticks, DEFAULT_PRIORITY, true, target, None)
    }

    /// Моделировать `duration` секунд от текущего момента
    pub async fn run_for(&self, duration: f64) -> Result<StopReason, SimError> {
        if duration.is_nan() || duration < 0.0 {
            return Err(SimError::InvalidDuration(duration));
        }
        info!("Запуск симуляции на {} секунд", duration);
        let ticks = self.manager.seconds_to_nearest_tick(duration);
        let limit = saturating_tick(self.manager.current_tick(), ticks);
        let reason = self.manager.resume(limit).await?;
        info!("Симуляция остановлена ({:?}). Время: {}", reason, self.now());
        Ok(reason)
    }

    /// Моделировать, пока есть события
    pub async fn run(&self) -> Result<StopReason, SimError> {
        self.manager.resume(MAX_TICK).await
    }

    pub fn stats(&self) -> serde_json::Value {
        json!({
            "name": self.manager.name(),
            "tick": self.manager.current_tick(),
            "time": self.manager.current_seconds(),
            "next_event_tick": self.manager.next_event_tick(),
            "pending_events": self.manager.pending_events(),
            "pending_conditionals": self.manager.pending_conditionals(),
            "live_processes": self.manager.live_processes(),
            "idle_workers": self.manager.idle_workers(),
            "halted": self.manager.is_halted(),
        })
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self {
            manager: EventManager::new(KernelConfig::default().name),
        }
    }
}
