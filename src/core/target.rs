//! Единицы работы, которые исполняет планировщик

use std::fmt;
use std::future::Future;

use futures::future::{BoxFuture, FutureExt};

use super::context::Context;
use crate::SimError;

/// Работа модели: описание, точка входа `process()` и хук отмены.
///
/// `process()` получает `Context` — явный доступ к примитивам планирования.
/// Каждый `.await` на примитиве ожидания — точка приостановки процесса.
pub trait ProcessTarget: Send + 'static {
    /// Человекочитаемое описание для трассировки и экспорта
    fn description(&self) -> String;

    fn process(self: Box<Self>, ctx: Context) -> BoxFuture<'static, Result<(), SimError>>;

    /// Вызывается, когда запланированное, но не начатое событие отменено.
    /// Должен быть идемпотентным.
    fn kill(&mut self) {}
}

/// Цель из замыкания `async`
pub struct ProcessFn<F> {
    description: String,
    f: F,
}

impl<F, Fut> ProcessTarget for ProcessFn<F>
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), SimError>> + Send + 'static,
{
    fn description(&self) -> String {
        self.description.clone()
    }

    fn process(self: Box<Self>, ctx: Context) -> BoxFuture<'static, Result<(), SimError>> {
        let this = *self;
        (this.f)(ctx).boxed()
    }
}

impl<F> fmt::Debug for ProcessFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProcessFn")
            .field("description", &self.description)
            .finish()
    }
}

/// Создать цель из описания и асинхронного замыкания
///
/// ```ignore
/// let target = process_fn("клиент", |ctx| async move {
///     ctx.wait(10).await?;
///     Ok(())
/// });
/// ```
pub fn process_fn<F, Fut>(description: impl Into<String>, f: F) -> ProcessFn<F>
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), SimError>> + Send + 'static,
{
    ProcessFn {
        description: description.into(),
        f,
    }
}
