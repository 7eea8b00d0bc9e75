/// Причина, по которой пул не принял задачу или расширение.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum PoolError {
    /// Пул уже остановлен (или был остановлен во время ожидания).
    #[error("worker pool is stopped")]
    Stopped,
    /// Очередь задач не освободилась до истечения таймаута.
    #[error("timed out waiting for room in the job queue")]
    Timeout,
}

pub type PoolResult<T> = Result<T, PoolError>;
