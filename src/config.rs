//! Конфигурация ядра в формате RON

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{DEFAULT_MAX_POOL_SIZE, DEFAULT_TICK_LENGTH};
use crate::SimError;

/// Длительность одного шага ожидания в режиме реального времени, мс
pub const DEFAULT_PACING_SLICE_MS: u64 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Имя менеджера для журналов
    pub name: String,
    /// Секунд в одном такте
    pub tick_length: f64,
    pub real_time: bool,
    /// Во сколько раз модельное время идёт быстрее реального
    pub real_time_factor: f64,
    pub pacing_slice_ms: u64,
    /// Сколько свободных исполнителей держать в пуле
    pub max_pool_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "simulation".to_string(),
            tick_length: DEFAULT_TICK_LENGTH,
            real_time: false,
            real_time_factor: 1.0,
            pacing_slice_ms: DEFAULT_PACING_SLICE_MS,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
        }
    }
}

impl KernelConfig {
    pub fn from_ron_str(source: &str) -> Result<Self, SimError> {
        let config: Self = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let source = fs::read_to_string(path.as_ref())?;
        Self::from_ron_str(&source)
    }

    pub fn to_ron_string(&self) -> Result<String, SimError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SimError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.tick_length.is_finite() && self.tick_length > 0.0) {
            return Err(SimError::Config(format!(
                "tick_length must be positive, got {}",
                self.tick_length
            )));
        }
        if !(self.real_time_factor.is_finite() && self.real_time_factor > 0.0) {
            return Err(SimError::Config(format!(
                "real_time_factor must be positive, got {}",
                self.real_time_factor
            )));
        }
        if self.pacing_slice_ms == 0 {
            return Err(SimError::Config("pacing_slice_ms must not be zero".to_string()));
        }
        Ok(())
    }
}
