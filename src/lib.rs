//! simkernel - ядро дискретно-событийного моделирования на Rust
//!
//! Процессы модели — асинхронные задачи tokio, которые по очереди получают
//! управление от `EventManager` и паркуются на примитивах `Context`.

pub mod config;
pub mod core;
pub mod error;
pub mod listeners;

mod simulator;
pub use simulator::Simulator;
pub use error::{Result, SimError};

pub mod prelude {
    pub use crate::config::KernelConfig;
    pub use crate::core::{
        process_fn, Context, EventHandle, EventManager, ProcessTarget, SimTime, StopReason, Tick,
        DEFAULT_PRIORITY,
    };
    pub use crate::Simulator;
    pub use crate::SimError;
}
