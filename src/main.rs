use elastic_pool::WorkerPool;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::{runtime::Builder, time::Duration};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let now = Instant::now();
        let pool = WorkerPool::new(-1, 64);
        let done = Arc::new(AtomicUsize::new(0));

        // Всплеск нагрузки: добавляем воркеров, которые уйдут сами.
        pool.expand(32, Some(Duration::from_millis(200)), None);
        for _ in 0..10_000 {
            let done = done.clone();
            pool.submit(
                async move {
                    tokio::time::sleep(Duration::from_micros(200)).await;
                    done.fetch_add(1, Ordering::Relaxed);
                },
                None,
            )
            .await;
        }

        while done.load(Ordering::Relaxed) < 10_000 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        println!("burst done: {:?} {:?}", now.elapsed(), pool.metrics());

        tokio::time::sleep(Duration::from_millis(500)).await;
        println!("after idle: {:?}", pool.metrics());

        pool.stop().await;
        println!("elapsed: {:?}", now.elapsed());
    });
}
