use crate::services::upload_service::UploadService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

pub struct BackgroundWorker {
    uploads: Arc<UploadService>,
    interval: Duration,
    max_age: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        uploads: Arc<UploadService>,
        interval: Duration,
        max_age: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            uploads,
            interval,
            max_age,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🚀 Background worker started (interval {:?}, max staging age {:?})",
            self.interval,
            self.max_age
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Background worker shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    pub async fn perform_cleanup(&self) {
        tracing::info!("🧹 Reaping abandoned uploads...");

        match self.uploads.reap(self.max_age).await {
            Ok(report) => tracing::info!(
                "✅ Cleanup completed: {} sessions removed, {} skipped (merging), {} temporaries removed",
                report.removed_sessions.len(),
                report.skipped_in_flight.len(),
                report.removed_temporaries
            ),
            Err(e) => tracing::error!("❌ Cleanup failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::models::Fingerprint;
    use crate::services::memory_storage::MemoryStore;
    use crate::services::storage::UploadStore;

    #[tokio::test]
    async fn test_worker_reaps_and_stops_on_shutdown() {
        let memory = MemoryStore::new();
        let stale = Fingerprint::parse("stale").unwrap();
        memory.insert_raw(&stale, "0", vec![1]);
        memory.backdate(&stale, chrono::Duration::hours(2));

        let uploads = Arc::new(UploadService::new(
            Arc::new(memory.clone()),
            &UploadConfig::development(),
        ));
        let (tx, rx) = watch::channel(false);
        let worker = BackgroundWorker::new(
            uploads,
            Duration::from_millis(10),
            Duration::from_secs(3600),
            rx,
        );
        let handle = tokio::spawn(worker.run());

        let mut reaped = false;
        for _ in 0..100 {
            if !memory.staging_exists(&stale).await.unwrap() {
                reaped = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(reaped, "stale staging area was never reaped");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
