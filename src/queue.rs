//! Ограниченная очередь, у которой нулевая ёмкость означает рандеву.
//!
//! Bounded `mpsc` в tokio не бывает нулевой ёмкости, поэтому при ёмкости 0
//! получатель сам объявляет готовность: кладёт одноразовый «приёмник» в
//! служебный канал, и отправка завершается, только когда значение передано
//! прямо в этот приёмник.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

type Taker<T> = oneshot::Sender<T>;

pub(crate) struct QueueSender<T> {
    inner: SenderInner<T>,
}

enum SenderInner<T> {
    Buffered(mpsc::Sender<T>),
    // Мьютекс tokio справедлив, поэтому отправители получают приёмники в порядке FIFO.
    Rendezvous(Arc<Mutex<mpsc::Receiver<Taker<T>>>>),
}

pub(crate) struct QueueReceiver<T> {
    inner: ReceiverInner<T>,
}

enum ReceiverInner<T> {
    Buffered(mpsc::Receiver<T>),
    Rendezvous {
        takers: Option<mpsc::Sender<Taker<T>>>,
        pending: Option<oneshot::Receiver<T>>,
    },
}

pub(crate) fn channel<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    if capacity == 0 {
        // Приёмник объявляется, только когда предыдущий уже забран,
        // так что в служебном канале их не больше одного.
        let (takers, waiting) = mpsc::channel(1);
        let tx = QueueSender {
            inner: SenderInner::Rendezvous(Arc::new(Mutex::new(waiting))),
        };
        let rx = QueueReceiver {
            inner: ReceiverInner::Rendezvous {
                takers: Some(takers),
                pending: None,
            },
        };
        (tx, rx)
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (
            QueueSender {
                inner: SenderInner::Buffered(tx),
            },
            QueueReceiver {
                inner: ReceiverInner::Buffered(rx),
            },
        )
    }
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            SenderInner::Buffered(tx) => SenderInner::Buffered(tx.clone()),
            SenderInner::Rendezvous(takers) => SenderInner::Rendezvous(takers.clone()),
        };
        Self { inner }
    }
}

impl<T> QueueSender<T> {
    /// Отправляет значение; при закрытой очереди возвращает его обратно.
    ///
    /// Отмена безопасна: если future бросили до завершения, значение
    /// не доставлено и просто уничтожается.
    pub(crate) async fn send(&self, value: T) -> Result<(), T> {
        match &self.inner {
            SenderInner::Buffered(tx) => tx.send(value).await.map_err(|err| err.0),
            SenderInner::Rendezvous(takers) => {
                let taker = takers.lock().await.recv().await;
                match taker {
                    Some(taker) => taker.send(value),
                    None => Err(value),
                }
            }
        }
    }

    /// Сколько значений ждёт в буфере. В режиме рандеву всегда 0.
    pub(crate) fn len(&self) -> usize {
        match &self.inner {
            SenderInner::Buffered(tx) => tx.max_capacity() - tx.capacity(),
            SenderInner::Rendezvous(_) => 0,
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Ждёт следующее значение. `None`, когда очередь закрыта и пуста.
    ///
    /// Отмена безопасна: объявленный приёмник сохраняется, и значение,
    /// переданное в него, достанется следующему вызову.
    pub(crate) async fn recv(&mut self) -> Option<T> {
        match &mut self.inner {
            ReceiverInner::Buffered(rx) => rx.recv().await,
            ReceiverInner::Rendezvous { takers, pending } => {
                if pending.is_none() {
                    let (taker, rx) = oneshot::channel();
                    takers.as_ref()?.send(taker).await.ok()?;
                    *pending = Some(rx);
                }
                let value = match pending.as_mut() {
                    Some(rx) => rx.await.ok(),
                    None => None,
                };
                *pending = None;
                value
            }
        }
    }

    /// Запрещает новые отправки. Уже принятое по-прежнему отдаёт [`recv`](Self::recv).
    pub(crate) fn close(&mut self) {
        match &mut self.inner {
            ReceiverInner::Buffered(rx) => rx.close(),
            ReceiverInner::Rendezvous { takers, pending } => {
                // После close отправка в объявленный приёмник гарантированно
                // падает, а переданное до неё остаётся внутри.
                if let Some(rx) = pending.as_mut() {
                    rx.close();
                }
                *takers = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn rendezvous_send_waits_for_receiver() {
        let (tx, mut rx) = channel::<u32>(0);
        let early = tokio::time::timeout(Duration::from_millis(30), tx.send(1)).await;
        assert!(early.is_err(), "nobody is receiving yet");

        let sender = tokio::spawn(async move { tx.send(2).await });
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(sender.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn rendezvous_recv_survives_cancellation() {
        let (tx, mut rx) = channel::<u32>(0);
        // Приёмник объявлен, но ожидание брошено.
        assert!(tokio::time::timeout(Duration::from_millis(10), rx.recv())
            .await
            .is_err());

        assert_eq!(tx.send(5).await, Ok(()));
        assert_eq!(rx.recv().await, Some(5));
        assert_eq!(tx.len(), 0);
    }

    #[tokio::test]
    async fn rendezvous_close_keeps_delivered_value() {
        let (tx, mut rx) = channel::<u32>(0);
        let _ = tokio::time::timeout(Duration::from_millis(10), rx.recv()).await;
        assert_eq!(tx.send(9).await, Ok(()));

        rx.close();
        assert_eq!(rx.recv().await, Some(9));
        assert_eq!(rx.recv().await, None);
        assert_eq!(tx.send(10).await, Err(10));
    }

    #[tokio::test]
    async fn rendezvous_close_rejects_announced_taker() {
        let (tx, mut rx) = channel::<u32>(0);
        let _ = tokio::time::timeout(Duration::from_millis(10), rx.recv()).await;

        rx.close();
        assert_eq!(tx.send(3).await, Err(3));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn buffered_close_drains_backlog() {
        let (tx, mut rx) = channel::<u32>(2);
        assert_eq!(tx.send(1).await, Ok(()));
        assert_eq!(tx.send(2).await, Ok(()));
        assert_eq!(tx.len(), 2);

        rx.close();
        assert_eq!(tx.send(3).await, Err(3));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }
}
