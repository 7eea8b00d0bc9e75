//! Сигнал остановки пула и учёт всех запущенных задач пула.

use std::future::Future;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Одноразовый широковещательный сигнал `Running -> Stopped`
/// вместе с трекером воркеров и диспетчера.
///
/// Остановка идёт в две фазы. `stopping` закрывает приём задач и запуск
/// новых воркеров. `halted` отменяет диспетчер, когда передал воркерам всё
/// принятое; по нему воркеры и выходят.
pub(crate) struct ShutdownSignal {
    stopping: CancellationToken,
    halted: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        Self {
            stopping: CancellationToken::new(),
            halted: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    #[inline]
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopping.is_cancelled()
    }

    /// Токен запроса остановки: по нему отваливаются отправители и диспетчер.
    #[inline]
    pub(crate) fn stopping(&self) -> CancellationToken {
        self.stopping.clone()
    }

    /// Токен окончания раздачи: по нему выходят воркеры.
    #[inline]
    pub(crate) fn halted(&self) -> CancellationToken {
        self.halted.clone()
    }

    /// Запускает задачу под учётом трекера, если пул ещё не остановлен.
    ///
    /// Токен трекера берётся до проверки, поэтому [`drained`](Self::drained)
    /// не может завершиться между проверкой и запуском.
    pub(crate) fn spawn_unless_stopped<F>(&self, make: impl FnOnce() -> F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _hold = self.tracker.token();
        if self.is_stopped() {
            return false;
        }
        self.tracker.spawn(make());
        true
    }

    /// Переводит пул в `Stopped`. `true` получает только один вызывающий.
    pub(crate) fn fire(&self) -> bool {
        // Трекер закрывается раньше токена: кто увидел токен неотменённым,
        // успел взять токен трекера до начала ожидания.
        let first = self.tracker.close();
        self.stopping.cancel();
        first
    }

    /// Ждёт выхода всех задач. Имеет смысл только после [`fire`](Self::fire).
    pub(crate) async fn drained(&self) {
        self.tracker.wait().await;
    }

    #[inline]
    pub(crate) fn tracked(&self) -> usize {
        self.tracker.len()
    }
}
