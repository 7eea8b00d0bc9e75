use super::{
    handle::{HandoffSlot, Job},
    model::Stats,
    queue::QueueReceiver,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Единственный цикл сопоставления: берёт задачу из очереди, затем
/// ждёт простаивающего воркера и передаёт задачу в его слот.
///
/// Ожидание воркера не ограничено по времени: пока все заняты, задачи
/// копятся в очереди, а отправители упираются в её ёмкость.
///
/// После запроса остановки приём закрывается, но всё уже принятое
/// раздаётся воркерам. Только потом отменяется `halted`.
pub(crate) async fn dispatch(
    mut jobs: QueueReceiver<Job>,
    mut idle: QueueReceiver<HandoffSlot>,
    stopping: CancellationToken,
    halted: CancellationToken,
    stats: Arc<Stats>,
) {
    // Отпускает воркеров при любом выходе из функции.
    let _halt = halted.drop_guard();
    trace!("dispatcher started");

    loop {
        let job = tokio::select! {
            biased;
            job = jobs.recv() => job,
            _ = stopping.cancelled() => None,
        };
        let Some(job) = job else { break };
        hand_off(job, &mut idle, &stopping, &stats).await;
    }

    jobs.close();
    let mut drained = 0usize;
    while let Some(job) = jobs.recv().await {
        hand_off(job, &mut idle, &stopping, &stats).await;
        drained += 1;
    }
    trace!(drained, "dispatcher stopped");
}

async fn hand_off(
    mut job: Job,
    idle: &mut QueueReceiver<HandoffSlot>,
    stopping: &CancellationToken,
    stats: &Stats,
) {
    loop {
        let slot = tokio::select! {
            biased;
            slot = idle.recv() => slot,
            _ = no_workers_after_stop(stopping, stats) => None,
        };
        let Some(slot) = slot else {
            stats.job_dropped();
            warn!("pool stopped with no workers left, job dropped");
            return;
        };

        let worker_id = slot.worker_id();
        match slot.deliver(job) {
            Ok(()) => {
                trace!(worker_id, "job handed off");
                return;
            }
            Err(returned) => {
                trace!(worker_id, "worker exited before handoff, trying next");
                job = returned;
            }
        }
    }
}

// До остановки воркеры ещё могут появиться через expand.
async fn no_workers_after_stop(stopping: &CancellationToken, stats: &Stats) {
    stopping.cancelled().await;
    stats.workers_gone().await;
}
