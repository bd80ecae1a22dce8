//! Ядро симуляции

mod conditional;
mod context;
mod event;
mod handle;
mod listener;
mod manager;
mod process;
mod target;
mod time;
mod tree;

pub use conditional::{Conditional, ConditionalData};
pub use context::Context;
pub use event::{EventData, EventId, Priority, DEFAULT_PRIORITY};
pub use handle::EventHandle;
pub use listener::{EventInfo, EventTimeListener, EventTraceListener};
pub use manager::{EventManager, StopReason};
pub use process::{ProcessId, DEFAULT_MAX_POOL_SIZE};
pub use target::{process_fn, ProcessFn, ProcessTarget};
pub use time::{saturating_tick, SimTime, Tick, TimeScale, DEFAULT_TICK_LENGTH, MAX_TICK};
pub use tree::{EventNode, EventTree, TreeViolation};
