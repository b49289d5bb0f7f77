use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Runs blocking extraction jobs off the async runtime, at most
/// `concurrency_limit` at a time.
#[derive(Debug, Clone)]
pub struct ExtractionExecutor {
    semaphore: Arc<Semaphore>,
}

impl ExtractionExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Must be called from within a tokio runtime.
    #[instrument(skip(self, job))]
    pub fn spawn<F>(&self, label: String, job: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(%label, "Semaphore error: {}", e);
                    return;
                }
            };

            info!(%label, "Starting extraction job");
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                error!(%label, "Extraction job panicked or was cancelled: {}", e);
                return;
            }
            info!(%label, "Finished extraction job");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_jobs_run_to_completion() {
        let executor = ExtractionExecutor::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let counter = counter.clone();
                executor.spawn(format!("job-{i}"), move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(executor.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_limit_is_respected() {
        let executor = ExtractionExecutor::new(1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                executor.spawn(format!("job-{i}"), move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        assert_eq!(ExtractionExecutor::new(0).available_permits(), 1);
    }
}
