//! The bounded worker pool (`build_pool`, spec §5) that the Orchestrator
//! submits blocking Build driver work onto. Generalizes the teacher's
//! `Pipeline::tick` bounded-dispatch pattern (a `Mutex<HashSet<TaskId>>`
//! gated on `pipeline_max_agents`, checked once per tick) into a
//! permit-based admission primitive for work submitted once per request
//! rather than polled — see SPEC_FULL §5.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct BuildPool {
    semaphore: Arc<Semaphore>,
}

impl BuildPool {
    pub fn new(capacity: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(capacity.max(1))) }
    }

    /// Runs `fut` once a permit is available, on its own task. The
    /// pool's capacity is the sole admission control (spec §5) — there
    /// is no queue beyond the semaphore's own FIFO wait list.
    pub fn submit<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("build pool semaphore is never closed");
            fut.await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn caps_concurrent_work_at_capacity() {
        let pool = BuildPool::new(2);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let concurrent = Arc::clone(&concurrent);
            let max_seen = Arc::clone(&max_seen);
            handles.push(pool.submit(async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
