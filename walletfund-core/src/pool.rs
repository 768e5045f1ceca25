//! Fixed-size supervised worker pool.
//!
//! One execution context per processing unit. A context that ends,
//! normally or by panic, is replaced after a short delay and
//! supervision continues until shutdown; the delay bounds the restart
//! storm a persistently failing dependency would otherwise cause.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Pause before replacing a finished worker context.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Supervisor for a fixed-size set of worker contexts.
pub struct WorkerPool<F> {
    size: usize,
    factory: F,
}

impl<F, Fut> WorkerPool<F>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    /// `factory` builds the future for worker context `id`; it is
    /// called once per context at boot and again for every replacement.
    pub fn new(size: usize, factory: F) -> Self {
        Self {
            size: size.max(1),
            factory,
        }
    }

    /// Supervise until shutdown is signaled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut contexts: JoinSet<usize> = JoinSet::new();
        let mut slots: HashMap<tokio::task::Id, usize> = HashMap::new();

        for id in 0..self.size {
            let fut = (self.factory)(id);
            let handle = contexts.spawn(async move {
                fut.await;
                id
            });
            slots.insert(handle.id(), id);
        }
        info!(size = self.size, "Worker pool started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Worker pool received shutdown signal");
                        break;
                    }
                }

                Some(finished) = contexts.join_next_with_id() => {
                    let id = match finished {
                        Ok((task_id, worker_id)) => {
                            slots.remove(&task_id);
                            warn!(worker = worker_id, "Worker context exited, restarting");
                            worker_id
                        }
                        Err(e) => {
                            let worker_id = slots.remove(&e.id()).unwrap_or(0);
                            if e.is_panic() {
                                error!(worker = worker_id, "Worker context panicked, restarting");
                            } else {
                                warn!(worker = worker_id, "Worker context aborted, restarting");
                            }
                            worker_id
                        }
                    };

                    let fut = (self.factory)(id);
                    let handle = contexts.spawn(async move {
                        tokio::time::sleep(RESTART_DELAY).await;
                        fut.await;
                        id
                    });
                    slots.insert(handle.id(), id);
                }
            }
        }

        contexts.shutdown().await;
        info!("Worker pool shutdown complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn long_lived_contexts_are_started_once_each() {
        let started = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = Arc::clone(&started);
        let pool = WorkerPool::new(3, move |_id| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
            }
        });
        let handle = tokio::spawn(pool.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(started.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn finished_contexts_are_restarted() {
        let started = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = Arc::clone(&started);
        let pool = WorkerPool::new(2, move |_id| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let handle = tokio::spawn(pool.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Boot starts 2 contexts; every exit is replaced after the
        // restart delay, so ~10 simulated seconds yield many more.
        assert!(started.load(Ordering::SeqCst) > 4);
    }

    #[tokio::test(start_paused = true)]
    async fn panicked_contexts_are_restarted() {
        let started = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = Arc::clone(&started);
        let pool = WorkerPool::new(1, move |_id| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("worker context blew up");
            }
        });
        let handle = tokio::spawn(pool.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Every panic is replaced after the restart delay, exactly like
        // a clean exit.
        assert!(started.load(Ordering::SeqCst) > 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_size_is_clamped_to_one() {
        let started = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = Arc::clone(&started);
        let pool = WorkerPool::new(0, move |_id| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
            }
        });
        let handle = tokio::spawn(pool.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
