use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use ai_cache_cell::{select_backend, AiCache, CacheState, LlmClient, OpenAiClient};
use appointment_cell::{
    AppointmentBookingService, AppointmentState, AppointmentStore, BookingSettings,
    BroadcastNotificationSender, MemoryAppointmentStore, PgAppointmentStore, ReminderScheduler,
};
use payment_cell::{PaymentGateways, PaystackClient};
use shared_config::AppConfig;
use shared_utils::clock::{Clock, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Diagnostic Centre API server");

    let config = Arc::new(AppConfig::from_env());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = build_store(&config).await?;

    let mut gateways = PaymentGateways::new();
    if config.is_payment_configured() {
        let paystack = PaystackClient::new(&config).context("Failed to build Paystack client")?;
        gateways.register(Arc::new(paystack));
    } else {
        warn!("PAYSTACK_SECRET_KEY not set, bookings will be rejected");
    }

    let notifier = Arc::new(BroadcastNotificationSender::new());
    spawn_notification_log(&notifier);

    let service = Arc::new(AppointmentBookingService::new(
        store,
        gateways,
        notifier,
        Arc::clone(&clock),
        BookingSettings::from_config(&config),
    ));

    let scheduler = ReminderScheduler::new(
        Arc::clone(&service),
        Duration::from_secs(config.reminder_interval_secs.max(1)),
    );
    scheduler.start().await;

    let backend = select_backend(&config, Arc::clone(&clock)).await;
    let cache = Arc::new(AiCache::from_config(&config, backend, Arc::clone(&clock)));
    let llm: Option<Arc<dyn LlmClient>> = match OpenAiClient::new(&config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("AI operations disabled: {}", e);
            None
        }
    };

    let app = router::create_router(
        Arc::clone(&config),
        AppointmentState::new(Arc::clone(&config), service),
        CacheState::new(Arc::clone(&config), cache, llm),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.stop().await;
    info!("Server stopped");
    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn AppointmentStore>> {
    if !config.uses_database() {
        warn!("DB_URL not set, using in-memory appointment store");
        return Ok(Arc::new(MemoryAppointmentStore::new()));
    }

    let pool = shared_database::connect(config)
        .await
        .context("Failed to connect to database")?;
    shared_database::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(Arc::new(PgAppointmentStore::new(pool)))
}

fn spawn_notification_log(notifier: &BroadcastNotificationSender) {
    let mut receiver = notifier.subscribe_global();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(message) => debug!("Notification dispatched: {}", message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Notification log lagged, skipped {}", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
