use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use nodenexus_uptime::db::MonitorStore;
use nodenexus_uptime::db::memory::MemoryStore;
use nodenexus_uptime::db::postgres::PgStore;
use nodenexus_uptime::notifications::encryption::EncryptionService;
use nodenexus_uptime::notifications::senders::SenderRegistry;
use nodenexus_uptime::notifications::service::NotificationService;
use nodenexus_uptime::server::config::ServerConfig;
use nodenexus_uptime::server::result_broadcaster::HeartbeatBroadcaster;
use nodenexus_uptime::server::retention::{RETENTION_PERIOD, run_retention_task};
use nodenexus_uptime::service_monitor::dispatcher::CheckDispatcher;
use nodenexus_uptime::service_monitor::push::PushReceiver;
use nodenexus_uptime::service_monitor::recorder::HeartbeatRecorder;
use nodenexus_uptime::service_monitor::scheduler::MonitorScheduler;
use nodenexus_uptime::version::VERSION;
use nodenexus_uptime::web::{AppState, create_axum_router};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "uptime.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C.");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // --- Server Config Setup ---
    let server_config = Arc::new(ServerConfig::load(args.config.as_deref())?);

    init_logging(&server_config.log_dir);
    info!("Starting uptime engine, version: {}", VERSION);

    // --- Store Setup ---
    let encryption_service = Arc::new(EncryptionService::from_hex_key(
        &server_config.notification_encryption_key,
    )?);
    let store: Arc<dyn MonitorStore> = match &server_config.database_url {
        Some(database_url) => {
            let store = PgStore::connect(database_url, encryption_service.clone()).await?;
            store.ensure_schema().await?;
            info!("Connected to PostgreSQL.");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL is not set, using the in-memory store. Nothing will be persisted.");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Engine Setup ---
    let heartbeat_broadcaster = HeartbeatBroadcaster::with_capacity(server_config.broadcast_capacity);
    let senders = SenderRegistry::new(server_config.notification_timeout())?;
    let notification_service = Arc::new(NotificationService::new(store.clone(), senders));
    let recorder = Arc::new(HeartbeatRecorder::new(
        store.clone(),
        Arc::new(heartbeat_broadcaster.clone()),
        notification_service,
    ));
    let scheduler = Arc::new(MonitorScheduler::new(
        store.clone(),
        Arc::new(CheckDispatcher::new(store.clone())),
        recorder.clone(),
    ));
    let push_receiver = Arc::new(PushReceiver::new(store.clone(), recorder));

    match scheduler.initialize_all().await {
        Ok(count) => info!(count = count, "Monitor scheduler initialized."),
        Err(e) => error!(error = %e, "Failed to load active monitors; timers start on demand."),
    }

    // --- Heartbeat Retention Task ---
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let retention_handle = tokio::spawn(run_retention_task(
        store.clone(),
        server_config.heartbeat_retention_days,
        RETENTION_PERIOD,
        shutdown_rx,
    ));

    // --- HTTP Server ---
    let app_state = Arc::new(AppState {
        store,
        scheduler: scheduler.clone(),
        push_receiver,
        heartbeat_broadcaster,
    });
    let router = create_axum_router(app_state);
    let listener = TcpListener::bind(&server_config.listen_address).await?;
    info!("HTTP server listening on {}", server_config.listen_address);

    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &serve_result {
        error!(error = %e, "HTTP server error.");
    }

    // --- Shutdown ---
    let _ = shutdown_tx.send(());
    scheduler.shutdown().await;
    if let Err(e) = retention_handle.await {
        error!(error = %e, "Retention task ended abnormally.");
    }
    info!("Uptime engine stopped.");
    serve_result.map_err(Into::into)
}
