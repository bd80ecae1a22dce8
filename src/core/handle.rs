//! Внешний токен отмены/прерывания события

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::event::{EventId, Priority};
use super::time::Tick;
use crate::SimError;

/// Куда указывает привязанный токен
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    Queued {
        id: EventId,
        tick: Tick,
        priority: Priority,
    },
    Conditional {
        id: EventId,
    },
}

/// Токен, принадлежащий вызывающему коду.
///
/// Связан не более чем с одним ожидающим событием. Привязку меняет только
/// менеджер событий под своей блокировкой; клоны разделяют одну привязку.
#[derive(Clone, Default)]
pub struct EventHandle {
    binding: Arc<Mutex<Option<Binding>>>,
}

impl EventHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Есть ли у токена ожидающее событие или условие
    pub fn is_scheduled(&self) -> bool {
        self.lock().is_some()
    }

    /// Такт привязанного события; `None` для условий и свободного токена
    pub fn scheduled_tick(&self) -> Option<Tick> {
        match *self.lock() {
            Some(Binding::Queued { tick, .. }) => Some(tick),
            _ => None,
        }
    }

    pub(crate) fn bind(&self, binding: Binding) -> Result<(), SimError> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(SimError::HandleInUse);
        }
        *slot = Some(binding);
        Ok(())
    }

    pub(crate) fn binding(&self) -> Option<Binding> {
        *self.lock()
    }

    pub(crate) fn take(&self) -> Option<Binding> {
        self.lock().take()
    }

    pub(crate) fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<Binding>> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("binding", &*self.lock())
            .finish()
    }
}
