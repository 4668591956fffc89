use crate::config::UploadConfig;
use crate::services::storage::FilesystemStore;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &UploadConfig) -> anyhow::Result<Arc<FilesystemStore>> {
    info!(
        "📂 Filesystem Storage: staging={:?}, uploads={:?}",
        config.staging_dir, config.upload_dir
    );

    let store = FilesystemStore::new(&config.staging_dir, &config.upload_dir)
        .await
        .with_context(|| {
            format!(
                "failed to prepare storage roots {:?} and {:?}",
                config.staging_dir, config.upload_dir
            )
        })?;

    info!("✅ Storage roots are ready");
    Ok(Arc::new(store))
}
