//! Условные ожидания: предикаты, пересчитываемые перед каждым сдвигом часов

use serde::{Serialize, Deserialize};

use super::event::{EventId, Target};
use super::handle::EventHandle;

/// Предикат условного ожидания
pub trait Conditional: Send + 'static {
    fn evaluate(&self) -> bool;
}

impl<F> Conditional for F
where
    F: Fn() -> bool + Send + 'static,
{
    fn evaluate(&self) -> bool {
        self()
    }
}

/// Ожидающее условие: предикат, цель и необязательный токен
pub(crate) struct ConditionalEvent {
    pub(crate) id: EventId,
    pub(crate) condition: Box<dyn Conditional>,
    pub(crate) target: Target,
    pub(crate) description: String,
    pub(crate) handle: Option<EventHandle>,
}

impl ConditionalEvent {
    pub(crate) fn is_satisfied(&self) -> bool {
        self.condition.evaluate()
    }

    pub(crate) fn data(&self) -> ConditionalData {
        ConditionalData {
            description: self.description.clone(),
        }
    }
}

/// Снимок ожидающего условия для внешнего просмотра
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalData {
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::core::process::ProcessId;

    #[test]
    fn test_closure_is_conditional() {
        let flag = Arc::new(AtomicBool::new(false));
        let cond = ConditionalEvent {
            id: EventId(1),
            condition: Box::new({
                let flag = flag.clone();
                move || flag.load(Ordering::SeqCst)
            }),
            target: Target::Wait(ProcessId(0)),
            description: "ждём флаг".to_string(),
            handle: None,
        };
        assert!(!cond.is_satisfied());
        flag.store(true, Ordering::SeqCst);
        assert!(cond.is_satisfied());
        assert_eq!(cond.data().description, "ждём флаг");
    }
}
