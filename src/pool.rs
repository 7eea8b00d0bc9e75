use super::{
    dispatcher::dispatch,
    errors::{PoolError, PoolResult},
    handle::{blocking_job, HandoffSlot, Job},
    model::{PoolMetrics, Stats, WorkerKind},
    queue::{self, QueueSender},
    signal::ShutdownSignal,
    worker::Worker,
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Конфигурация пула
#[derive(Debug, Clone)]
pub struct Config {
    /// Число базовых воркеров; столько же мест в реестре простаивающих.
    pub num_workers: usize,
    /// Ёмкость очереди задач. 0 означает синхронную передачу: `submit`
    /// возвращается, только когда диспетчер забрал задачу.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            queue_capacity: 0,
        }
    }
}

impl Config {
    /// Отрицательное число воркеров заменяется числом доступных CPU.
    pub fn new(num_workers: isize, queue_capacity: usize) -> Self {
        let num_workers = usize::try_from(num_workers).unwrap_or_else(|_| num_cpus::get());
        Self {
            num_workers,
            queue_capacity,
        }
    }

    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus,
            queue_capacity: num_cpus * 10,
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus * 2, // Для I/O-bound задач
            queue_capacity: num_cpus * 20,
        }
    }
}

/// Пул воркеров с расширением под нагрузкой.
///
/// Базовые воркеры создаются в конструкторе и живут до [`stop`](Self::stop).
/// Воркеры из [`expand`](Self::expand) уходят сами, если за отведённое окно
/// не смогли встать в реестр простаивающих, либо по внешнему сигналу.
///
/// Создавать пул нужно внутри runtime tokio.
pub struct WorkerPool {
    jobs: QueueSender<Job>,
    registry: QueueSender<HandoffSlot>,
    signal: ShutdownSignal,
    stats: Arc<Stats>,
    next_worker_id: AtomicUsize,
    config: Config,
}

impl WorkerPool {
    pub fn new(num_workers: isize, queue_capacity: usize) -> Self {
        Self::with_config(Config::new(num_workers, queue_capacity))
    }

    pub fn with_config(config: Config) -> Self {
        let (jobs, job_rx) = queue::channel(config.queue_capacity);
        let (registry, idle_rx) = queue::channel(config.num_workers);

        let pool = Self {
            jobs,
            registry,
            signal: ShutdownSignal::new(),
            stats: Arc::new(Stats::default()),
            next_worker_id: AtomicUsize::new(0),
            config,
        };

        for _ in 0..pool.config.num_workers {
            pool.spawn_worker(WorkerKind::Baseline, None, None);
        }
        let stopping = pool.signal.stopping();
        let halted = pool.signal.halted();
        let stats = pool.stats.clone();
        pool.signal
            .spawn_unless_stopped(move || dispatch(job_rx, idle_rx, stopping, halted, stats));

        debug!(
            workers = pool.config.num_workers,
            queue_capacity = pool.config.queue_capacity,
            "worker pool started"
        );
        pool
    }

    /// Ставит задачу в очередь. `false`, если пул остановлен или истёк таймаут.
    ///
    /// Принятая задача будет выполнена, даже если сразу после этого вызвать
    /// [`stop`](Self::stop).
    pub async fn submit<F>(&self, fut: F, timeout: Option<Duration>) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.try_submit(fut, timeout).await.is_ok()
    }

    pub async fn try_submit<F>(&self, fut: F, timeout: Option<Duration>) -> PoolResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.enqueue(Box::pin(fut), timeout).await
    }

    /// Как [`submit`](Self::submit), но для синхронного замыкания.
    pub async fn submit_blocking<F>(&self, f: F, timeout: Option<Duration>) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_submit_blocking(f, timeout).await.is_ok()
    }

    pub async fn try_submit_blocking<F>(&self, f: F, timeout: Option<Duration>) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(blocking_job(f), timeout).await
    }

    async fn enqueue(&self, job: Job, timeout: Option<Duration>) -> PoolResult<()> {
        if self.signal.is_stopped() {
            return Err(PoolError::Stopped);
        }

        let shutdown = self.signal.stopping();
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .map(|t| tokio::time::Instant::now() + t);

        let sent = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(PoolError::Stopped),
            _ = until(deadline) => Err(PoolError::Timeout),
            sent = self.jobs.send(job) => sent.map_err(|_| PoolError::Stopped),
        };
        if sent.is_ok() {
            self.stats.job_submitted();
        }
        sent
    }

    /// Добавляет `n` временных воркеров.
    ///
    /// `timeout` задаёт скользящее окно регистрации: воркер, не сумевший за
    /// это время встать в реестр простаивающих, завершается. `quit` позволяет
    /// снять воркеров явно. Без того и другого воркер ведёт себя как базовый.
    pub fn expand(&self, n: usize, timeout: Option<Duration>, quit: Option<CancellationToken>) -> bool {
        self.try_expand(n, timeout, quit).is_ok()
    }

    pub fn try_expand(
        &self,
        n: usize,
        timeout: Option<Duration>,
        quit: Option<CancellationToken>,
    ) -> PoolResult<()> {
        if self.signal.is_stopped() {
            return Err(PoolError::Stopped);
        }
        for _ in 0..n {
            if !self.spawn_worker(WorkerKind::Expansion, timeout, quit.clone()) {
                return Err(PoolError::Stopped);
            }
        }
        debug!(added = n, ?timeout, with_quit = quit.is_some(), "worker pool expanded");
        Ok(())
    }

    /// `false`, если пул уже остановлен; воркер тогда не создаётся.
    fn spawn_worker(&self, kind: WorkerKind, timeout: Option<Duration>, quit: Option<CancellationToken>) -> bool {
        self.signal.spawn_unless_stopped(|| {
            let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
            Worker::new(
                id,
                self.stats.worker_spawned(kind),
                self.registry.clone(),
                timeout,
                quit,
                self.signal.halted(),
                self.stats.clone(),
            )
            .run()
        })
    }

    /// Останавливает пул и ждёт выхода всех воркеров и диспетчера.
    ///
    /// Новые задачи больше не принимаются, а уже принятые доходят до
    /// воркеров и выполняются до возврата. Задачи теряются, только если
    /// живых воркеров в пуле не осталось совсем (см. `dropped_jobs`).
    ///
    /// Безопасно вызывать повторно и из нескольких задач одновременно:
    /// переход в `Stopped` происходит один раз, а возвращаются все вызовы
    /// только после полного завершения.
    pub async fn stop(&self) {
        if self.signal.fire() {
            debug!(tasks = self.signal.tracked(), "worker pool stopping");
        }
        self.signal.drained().await;
        debug!("worker pool stopped");
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.stats.snapshot(self.config.num_workers, self.jobs.len())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Дождаться воркеров в drop нельзя, но сигнал отпускает их все.
        self.signal.fire();
    }
}

async fn until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
