//! Async пул воркеров с динамическим расширением
//!
//! # Features
//! - Базовый набор воркеров, живущих до остановки пула
//! - Временные воркеры через `expand`, уходящие сами по скользящему таймауту
//! - Сопоставление задачи и простаивающего воркера через отдельный диспетчер
//! - Идемпотентная остановка, дожидающаяся выхода всех воркеров
//! - Принятая задача выполняется, даже если пул сразу остановили
//! - Нулевая ёмкость очереди означает синхронную передачу диспетчеру
//! - Паники в задачах не уменьшают пул
//! - Метрики пула

mod dispatcher;
mod queue;
mod signal;
mod worker;

pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;

pub use errors::PoolError;
pub use model::{PoolMetrics, WorkerKind};
pub use pool::{Config, WorkerPool};
pub use tokio_util::sync::CancellationToken;
