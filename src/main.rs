use chunk_assembly_backend::config::UploadConfig;
use chunk_assembly_backend::infrastructure::storage;
use chunk_assembly_backend::services::upload_service::UploadService;
use chunk_assembly_backend::services::worker::BackgroundWorker;
use chunk_assembly_backend::{AppState, create_app};
use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, worker, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunk_assembly_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !matches!(args.mode.as_str(), "api" | "worker" | "all") {
        anyhow::bail!("unknown mode '{}', expected api, worker or all", args.mode);
    }

    info!("🚀 Starting Chunk Assembly Backend [Mode: {}]...", args.mode);

    let config = UploadConfig::from_env();
    info!(
        "🧩 Upload Config: Max Chunk={}, Chunk Timeout={:?}, Merge Timeout={:?}, Verify={:?}",
        config
            .max_chunk_size
            .map(|s| format!("{}MB", s / 1024 / 1024))
            .unwrap_or_else(|| "unlimited".to_string()),
        config.chunk_timeout,
        config.merge_timeout,
        config.verify_fingerprint
    );

    let store = storage::setup_storage(&config).await?;
    let uploads = Arc::new(UploadService::new(store, &config));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    if args.mode == "worker" || args.mode == "all" {
        let worker = BackgroundWorker::new(
            uploads.clone(),
            config.reap_interval,
            config.staging_max_age(),
            shutdown_rx.clone(),
        );
        handles.push(tokio::spawn(async move {
            worker.run().await;
        }));
        info!(
            "👷 Staging reaper initialized (every {:?}, max age {}h).",
            config.reap_interval, config.staging_cleanup_age_hours
        );
    }

    if args.mode == "api" || args.mode == "all" {
        let state = AppState {
            uploads: uploads.clone(),
            config: config.clone(),
        };

        let app = create_app(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
        info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

        let mut server_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.wait_for(|stop| *stop).await;
                })
                .await
            {
                error!("❌ Server runtime error: {}", e);
            }
        }));
    }

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("🛑 Shutting down backend services...");
    for handle in handles {
        if let Err(e) = handle.await {
            error!("❌ Service task failed: {}", e);
        }
    }

    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
