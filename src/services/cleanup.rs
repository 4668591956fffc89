use crate::models::{Fingerprint, ReapReport};
use crate::services::error::UploadResult;
use crate::services::storage::UploadStore;
use crate::utils::keyed_mutex::KeyedMutex;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Reclaims staging space.
///
/// Only the staging root and temporary files are ever deleted here;
/// finalized artifacts are out of reach.
#[derive(Clone)]
pub struct Cleanup {
    store: Arc<dyn UploadStore>,
    locks: KeyedMutex,
}

impl Cleanup {
    /// `locks` must be the same set the merge engine uses, so that a merge
    /// in flight is never reaped underneath it.
    pub fn new(store: Arc<dyn UploadStore>, locks: KeyedMutex) -> Self {
        Self { store, locks }
    }

    /// Removes the staging area of one fingerprint, discarding its chunks.
    /// Waits for a merge of the same fingerprint to finish first.
    pub async fn remove_session(&self, fingerprint: &Fingerprint) -> UploadResult<()> {
        let _guard = self.locks.lock(fingerprint.as_str()).await;
        self.store.remove_staging(fingerprint).await?;
        tracing::info!("Removed staging area for {}", fingerprint);
        Ok(())
    }

    /// Removes staging areas whose latest write is older than `max_age`,
    /// along with abandoned temporary files.
    pub async fn reap(&self, max_age: Duration) -> UploadResult<ReapReport> {
        let mut report = ReapReport::default();

        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(report);
        };

        for session in self.store.list_sessions().await? {
            if session.last_activity >= cutoff {
                continue;
            }

            let Some(_guard) = self.locks.try_lock(session.fingerprint.as_str()) else {
                tracing::debug!(
                    "Skipping stale staging area {}: merge in progress",
                    session.fingerprint
                );
                report.skipped_in_flight.push(session.fingerprint.to_string());
                continue;
            };

            match self.store.remove_staging(&session.fingerprint).await {
                Ok(()) => {
                    tracing::info!(
                        "Reaped abandoned upload {} (last activity {})",
                        session.fingerprint,
                        session.last_activity
                    );
                    report.removed_sessions.push(session.fingerprint.to_string());
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to reap staging area {}: {}",
                        session.fingerprint,
                        e
                    );
                }
            }
        }

        report.removed_temporaries = self.store.reap_temporaries(cutoff).await?;
        self.locks.cleanup();

        Ok(report)
    }
}
