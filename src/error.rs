//! Типы ошибок для ядра симуляции

use thiserror::Error;

use crate::core::{Priority, ProcessId, Tick};

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("negative wait duration: {0} ticks")]
    NegativeDuration(Tick),

    #[error("invalid wait duration: {0} seconds")]
    InvalidDuration(f64),

    #[error("scheduling call made outside the active process of this manager")]
    NotInProcess,

    #[error("scheduling call made from inside a listener or conditional callback")]
    InCallback,

    #[error("event handle is already bound to a pending event")]
    HandleInUse,

    #[error("no event node for tick {tick} priority {priority}")]
    MissingNode { tick: Tick, priority: Priority },

    #[error("process {0} is the active runner and cannot be interrupted")]
    ActiveRunner(ProcessId),

    #[error("process killed")]
    Killed,

    #[error("event manager is already running")]
    AlreadyRunning,

    #[error("event manager halted after a process fault")]
    Halted,

    #[error("no tokio runtime available to start a process")]
    NoRuntime,

    #[error("process '{description}' failed: {message}")]
    Target { description: String, message: String },

    #[error("process '{description}' panicked: {message}")]
    Panicked { description: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Simulation error: {0}")]
    SimulationError(String),
}

impl SimError {
    /// Ошибки программирования: не повторяются, сообщаются немедленно
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            SimError::NegativeDuration(_)
                | SimError::InvalidDuration(_)
                | SimError::NotInProcess
                | SimError::InCallback
                | SimError::HandleInUse
                | SimError::MissingNode { .. }
                | SimError::ActiveRunner(_)
        )
    }

    /// Ошибка, поднятая моделью внутри `process()`
    pub fn is_target_fault(&self) -> bool {
        matches!(
            self,
            SimError::Target { .. } | SimError::Panicked { .. } | SimError::SimulationError(_)
        )
    }
}

impl From<String> for SimError {
    fn from(s: String) -> Self {
        SimError::SimulationError(s)
    }
}

impl From<&str> for SimError {
    fn from(s: &str) -> Self {
        SimError::SimulationError(s.to_string())
    }
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        SimError::Io(e.to_string())
    }
}

impl From<ron::error::SpannedError> for SimError {
    fn from(e: ron::error::SpannedError) -> Self {
        SimError::Config(e.to_string())
    }
}
