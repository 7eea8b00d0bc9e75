use std::{fmt, future::Future, pin::Pin};
use tokio::sync::mpsc;

/// Единица работы: future без результата, видимого пулу.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Оборачивает синхронное замыкание в [`Job`].
///
/// Замыкание выполняется в blocking-пуле tokio, но воркер дожидается его
/// завершения, поэтому один воркер по-прежнему держит не больше одной задачи.
/// Паника внутри замыкания пробрасывается дальше, в `catch_unwind` воркера.
pub fn blocking_job<F>(f: F) -> Job
where
    F: FnOnce() + Send + 'static,
{
    Box::pin(async move {
        if let Err(join_err) = tokio::task::spawn_blocking(f).await {
            if join_err.is_panic() {
                std::panic::resume_unwind(join_err.into_panic());
            }
        }
    })
}

/// Приватный слот передачи задачи, принадлежащий ровно одному воркеру.
///
/// В реестр простаивающих воркеров попадает клон отправляющей стороны;
/// диспетчер держит его только на время сопоставления.
#[derive(Clone)]
pub(crate) struct HandoffSlot {
    worker_id: usize,
    tx: mpsc::Sender<Job>,
}

/// Сторона воркера: здесь он ждёт назначенную задачу.
pub(crate) struct HandoffInbox {
    rx: mpsc::Receiver<Job>,
}

pub(crate) fn handoff(worker_id: usize) -> (HandoffSlot, HandoffInbox) {
    // Воркер регистрируется заново только после получения задачи,
    // поэтому в слоте никогда не лежит больше одной.
    let (tx, rx) = mpsc::channel(1);
    (HandoffSlot { worker_id, tx }, HandoffInbox { rx })
}

impl fmt::Debug for HandoffSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffSlot")
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

impl HandoffSlot {
    #[inline]
    pub(crate) fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Передаёт задачу воркеру. Возвращает задачу обратно, если воркер уже вышел.
    pub(crate) fn deliver(&self, job: Job) -> Result<(), Job> {
        self.tx.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
        })
    }
}

impl HandoffInbox {
    #[inline]
    pub(crate) async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }

    /// Забирает задачу, если она уже доставлена.
    #[inline]
    pub(crate) fn try_recv(&mut self) -> Option<Job> {
        self.rx.try_recv().ok()
    }
}
