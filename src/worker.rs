use super::{
    handle::{handoff, HandoffInbox, HandoffSlot, Job},
    model::{ExitReason, LiveWorker, Stats},
    queue::QueueSender,
};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Воркер пула: регистрирует свой слот в реестре простаивающих,
/// ждёт задачу, выполняет её и повторяет.
///
/// Запрос остановки воркер не слушает: пока диспетчер раздаёт принятые
/// задачи, воркеры продолжают регистрироваться. Выход по `halted`.
pub(crate) struct Worker {
    live: LiveWorker,
    registry: QueueSender<HandoffSlot>,
    slot: HandoffSlot,
    inbox: HandoffInbox,
    timeout: Option<Duration>,
    quit: Option<CancellationToken>,
    halted: CancellationToken,
    stats: Arc<Stats>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        live: LiveWorker,
        registry: QueueSender<HandoffSlot>,
        timeout: Option<Duration>,
        quit: Option<CancellationToken>,
        halted: CancellationToken,
        stats: Arc<Stats>,
    ) -> Self {
        let (slot, inbox) = handoff(id);
        Self {
            live,
            registry,
            slot,
            inbox,
            timeout: timeout.filter(|t| !t.is_zero()),
            quit,
            halted,
            stats,
        }
    }

    #[inline]
    fn id(&self) -> usize {
        self.slot.worker_id()
    }

    pub(crate) async fn run(mut self) {
        trace!(worker_id = self.id(), kind = %self.live.kind(), "worker started");
        let reason = self.work_loop().await;
        if reason == ExitReason::Evicted {
            self.stats.worker_evicted();
        }
        trace!(worker_id = self.id(), kind = %self.live.kind(), %reason, "worker exited");
    }

    async fn work_loop(&mut self) -> ExitReason {
        loop {
            if self.halted.is_cancelled() {
                return ExitReason::Shutdown;
            }
            if self.quit.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return ExitReason::Quit;
            }

            // Скользящий дедлайн: новое полное окно на каждую попытку регистрации.
            let deadline = self.timeout.map(|t| Instant::now() + t);

            let registered = tokio::select! {
                biased;
                _ = self.halted.cancelled() => Err(ExitReason::Shutdown),
                _ = quit_requested(self.quit.as_ref()) => Err(ExitReason::Quit),
                _ = deadline_elapsed(deadline) => Err(ExitReason::Evicted),
                sent = self.registry.send(self.slot.clone()) => {
                    sent.map_err(|_| ExitReason::Shutdown)
                }
            };
            if let Err(reason) = registered {
                return reason;
            }

            // Зарегистрированный воркер обязан взять задачу: quit и таймаут
            // здесь не проверяются. Диспетчер доставляет задачи только до
            // `halted`, так что после него хватает одной проверки слота.
            let job = tokio::select! {
                biased;
                job = self.inbox.recv() => job,
                _ = self.halted.cancelled() => None,
            };
            match job.or_else(|| self.inbox.try_recv()) {
                Some(job) => self.execute(job).await,
                None => return ExitReason::Shutdown,
            }
        }
    }

    async fn execute(&self, job: Job) {
        self.stats.job_started();
        let outcome = AssertUnwindSafe(job).catch_unwind().await;
        self.stats.job_finished(outcome.is_err());

        if let Err(panic) = outcome {
            warn!(
                worker_id = self.id(),
                panic = %panic_message(&*panic),
                "job panicked, worker keeps serving"
            );
        }
    }
}

async fn quit_requested(quit: Option<&CancellationToken>) {
    match quit {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::WorkerKind, queue};

    fn worker(
        stats: &Arc<Stats>,
        registry: QueueSender<HandoffSlot>,
        timeout: Option<Duration>,
        quit: Option<CancellationToken>,
        halted: CancellationToken,
    ) -> Worker {
        let live = stats.worker_spawned(WorkerKind::Expansion);
        Worker::new(1, live, registry, timeout, quit, halted, stats.clone())
    }

    #[tokio::test]
    async fn evicts_when_registry_is_full() {
        let stats = Arc::new(Stats::default());
        let (registry, _keep) = queue::channel(1);
        // Единственное место в реестре уже занято.
        let (occupant, _inbox) = handoff(0);
        registry.send(occupant).await.unwrap();

        let w = worker(
            &stats,
            registry,
            Some(Duration::from_millis(30)),
            None,
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(1), w.run())
            .await
            .expect("worker must retire after its registration deadline");

        let snap = stats.snapshot(0, 0);
        assert_eq!(snap.live_workers, 0);
        assert_eq!(snap.evicted_workers, 1);
    }

    #[tokio::test]
    async fn evicts_without_demand_on_zero_capacity_registry() {
        let stats = Arc::new(Stats::default());
        // Реестр без мест: регистрация возможна, только когда диспетчер ждёт воркера.
        let (registry, _idle) = queue::channel::<HandoffSlot>(0);
        let w = worker(
            &stats,
            registry,
            Some(Duration::from_millis(30)),
            None,
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(1), w.run())
            .await
            .expect("idle worker must not stay registered");
        assert_eq!(stats.snapshot(0, 0).evicted_workers, 1);
    }

    #[tokio::test]
    async fn quit_signal_stops_registering_worker() {
        let stats = Arc::new(Stats::default());
        let (registry, _keep) = queue::channel(1);
        let (occupant, _inbox) = handoff(0);
        registry.send(occupant).await.unwrap();

        let quit = CancellationToken::new();
        let w = worker(&stats, registry, None, Some(quit.clone()), CancellationToken::new());
        let task = tokio::spawn(w.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        quit.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.snapshot(0, 0).evicted_workers, 0);
    }

    #[tokio::test]
    async fn registered_worker_ignores_quit_until_job_arrives() {
        let stats = Arc::new(Stats::default());
        let (registry, mut idle) = queue::channel(1);
        let quit = CancellationToken::new();
        let w = worker(&stats, registry, Some(Duration::from_millis(10)), Some(quit.clone()), CancellationToken::new());
        let task = tokio::spawn(w.run());

        let slot = idle.recv().await.unwrap();
        quit.cancel();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!task.is_finished(), "registered worker must wait for its job");

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        assert!(slot
            .deliver(Box::pin(async move {
                let _ = done_tx.send(());
            }))
            .is_ok());
        done_rx.await.unwrap();

        // После задачи воркер видит quit и выходит, не регистрируясь повторно.
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.snapshot(0, 0).completed_jobs, 1);
    }

    #[tokio::test]
    async fn job_delivered_before_halt_still_runs() {
        let stats = Arc::new(Stats::default());
        let (registry, mut idle) = queue::channel(1);
        let halted = CancellationToken::new();
        let w = worker(&stats, registry, None, None, halted.clone());

        let task = tokio::spawn(w.run());
        let slot = idle.recv().await.unwrap();

        // Задача и остановка приходят вместе; задача не теряется.
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        assert!(slot
            .deliver(Box::pin(async move {
                let _ = done_tx.send(());
            }))
            .is_ok());
        halted.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(done_rx.await.is_ok());
        assert_eq!(stats.snapshot(0, 0).completed_jobs, 1);
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_worker() {
        let stats = Arc::new(Stats::default());
        let (registry, mut idle) = queue::channel(1);
        let halted = CancellationToken::new();
        let w = worker(&stats, registry, None, None, halted.clone());
        let task = tokio::spawn(w.run());

        let slot = idle.recv().await.unwrap();
        assert!(slot.deliver(Box::pin(async { panic!("boom"); })).is_ok());

        // Воркер пережил панику и снова встал в реестр.
        let slot = tokio::time::timeout(Duration::from_secs(1), idle.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(slot.worker_id(), 1);
        assert_eq!(stats.snapshot(0, 0).panicked_jobs, 1);

        halted.cancel();
        task.await.unwrap();
        assert_eq!(stats.snapshot(0, 0).live_workers, 0);
    }
}
