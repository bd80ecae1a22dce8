//! Логическое время симуляции: такты и перевод в секунды

use std::fmt;
use serde::{Serialize, Deserialize};

/// Такт — неделимая единица логических часов ядра
pub type Tick = i64;

/// Максимальный такт; планирование с переполнением насыщается до него
pub const MAX_TICK: Tick = Tick::MAX;

/// Длительность такта по умолчанию (одна микросекунда)
pub const DEFAULT_TICK_LENGTH: f64 = 1e-6;

/// Время симуляции в секундах (производное от тактов)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct SimTime(f64);

impl SimTime {
    pub fn new(seconds: f64) -> Self {
        SimTime(seconds.max(0.0))
    }

    pub fn as_seconds(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.3}s", self.0)
    }
}

/// Масштаб перевода тактов в секунды
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeScale {
    tick_length: f64,
}

impl TimeScale {
    /// `tick_length` — длительность одного такта в секундах.
    /// Проверка значения лежит на вызывающей стороне (см. `KernelConfig::validate`).
    pub fn new(tick_length: f64) -> Self {
        Self { tick_length }
    }

    pub fn tick_length(&self) -> f64 {
        self.tick_length
    }

    pub fn ticks_to_seconds(&self, ticks: Tick) -> f64 {
        ticks as f64 * self.tick_length
    }

    /// Ближайшее целое число тактов для `seconds`.
    ///
    /// Приведение `f64 as i64` насыщается, поэтому огромные значения дают
    /// [`MAX_TICK`], а не переполнение.
    pub fn seconds_to_nearest_tick(&self, seconds: f64) -> Tick {
        (seconds / self.tick_length).round() as Tick
    }
}

impl Default for TimeScale {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_LENGTH)
    }
}

/// Такт, к которому нужно прибавить `ticks`, с насыщением до [`MAX_TICK`]
pub fn saturating_tick(now: Tick, ticks: Tick) -> Tick {
    now.saturating_add(ticks)
}
