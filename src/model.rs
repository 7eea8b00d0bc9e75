use crossbeam::utils::CachePadded;
use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;

/// Тип воркера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    /// Создан вместе с пулом, живёт до остановки.
    Baseline,
    /// Добавлен через `expand`, может уйти сам по таймауту или сигналу.
    Expansion,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Baseline => f.write_str("baseline"),
            WorkerKind::Expansion => f.write_str("expansion"),
        }
    }
}

/// Почему воркер вышел из цикла.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitReason {
    Shutdown,
    Quit,
    Evicted,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Shutdown => f.write_str("shutdown"),
            ExitReason::Quit => f.write_str("quit"),
            ExitReason::Evicted => f.write_str("evicted"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub baseline_workers: usize,
    pub live_workers: usize,
    pub expansion_workers: usize,
    pub busy_workers: usize,
    pub queued_jobs: usize,
    pub submitted_jobs: usize,
    pub completed_jobs: usize,
    pub panicked_jobs: usize,
    /// Задачи, принятые до остановки, которые некому было выполнить:
    /// к моменту остановки в пуле не осталось ни одного воркера.
    pub dropped_jobs: usize,
    pub evicted_workers: usize,
}

impl PoolMetrics {
    pub fn idle_workers(&self) -> usize {
        self.live_workers.saturating_sub(self.busy_workers)
    }

    pub fn utilization(&self) -> f64 {
        if self.live_workers == 0 {
            return 0.0;
        }
        self.busy_workers as f64 / self.live_workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_jobs + self.panicked_jobs;
        if total == 0 {
            return 1.0;
        }
        self.completed_jobs as f64 / total as f64
    }
}

/// Счётчики пула, разделяемые воркерами.
#[derive(Default)]
pub(crate) struct Stats {
    live_workers: CachePadded<AtomicUsize>,
    expansion_workers: CachePadded<AtomicUsize>,
    busy_workers: CachePadded<AtomicUsize>,
    submitted_jobs: CachePadded<AtomicUsize>,
    completed_jobs: CachePadded<AtomicUsize>,
    panicked_jobs: CachePadded<AtomicUsize>,
    dropped_jobs: CachePadded<AtomicUsize>,
    evicted_workers: CachePadded<AtomicUsize>,
    all_gone: Notify,
}

impl Stats {
    /// Учитывает нового воркера; счётчик уменьшится при drop гарда.
    pub(crate) fn worker_spawned(self: &Arc<Self>, kind: WorkerKind) -> LiveWorker {
        self.live_workers.fetch_add(1, Ordering::AcqRel);
        if kind == WorkerKind::Expansion {
            self.expansion_workers.fetch_add(1, Ordering::AcqRel);
        }
        LiveWorker {
            stats: self.clone(),
            kind,
        }
    }

    #[inline]
    pub(crate) fn job_submitted(&self) {
        self.submitted_jobs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn job_started(&self) {
        self.busy_workers.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn job_finished(&self, panicked: bool) {
        if panicked {
            self.panicked_jobs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed_jobs.fetch_add(1, Ordering::Relaxed);
        }
        self.busy_workers.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn job_dropped(&self) {
        self.dropped_jobs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn worker_evicted(&self) {
        self.evicted_workers.fetch_add(1, Ordering::Relaxed);
    }

    /// Завершается, когда живых воркеров не осталось.
    pub(crate) async fn workers_gone(&self) {
        loop {
            let notified = self.all_gone.notified();
            tokio::pin!(notified);
            // Подписка до проверки, иначе можно пропустить уход последнего.
            notified.as_mut().enable();
            if self.live_workers.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn snapshot(&self, baseline_workers: usize, queued_jobs: usize) -> PoolMetrics {
        PoolMetrics {
            baseline_workers,
            live_workers: self.live_workers.load(Ordering::Acquire),
            expansion_workers: self.expansion_workers.load(Ordering::Acquire),
            busy_workers: self.busy_workers.load(Ordering::Acquire),
            queued_jobs,
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            panicked_jobs: self.panicked_jobs.load(Ordering::Relaxed),
            dropped_jobs: self.dropped_jobs.load(Ordering::Relaxed),
            evicted_workers: self.evicted_workers.load(Ordering::Relaxed),
        }
    }
}

/// Гард живого воркера.
pub(crate) struct LiveWorker {
    stats: Arc<Stats>,
    kind: WorkerKind,
}

impl LiveWorker {
    #[inline]
    pub(crate) fn kind(&self) -> WorkerKind {
        self.kind
    }
}

impl Drop for LiveWorker {
    fn drop(&mut self) {
        if self.kind == WorkerKind::Expansion {
            self.stats.expansion_workers.fetch_sub(1, Ordering::AcqRel);
        }
        if self.stats.live_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.stats.all_gone.notify_waiters();
        }
    }
}
