use chrono::{Duration, Utc};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::fmt::init;

use studyforge_api::{
    config::Config,
    metrics::SESSION_SWEEPER_TICKS_TOTAL,
    services::{session_service::SessionService, AppState},
};

/// Abandon sweep: attempt sessions left in progress past the inactivity
/// timeout are moved to the terminal `abandoned` state, which rejects any
/// late submissions and frees the one-active-session slot for the user.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load().expect("Failed to load configuration");

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to MongoDB");

    let redis_client =
        redis::Client::open(config.redis_uri.clone()).expect("Failed to create Redis client");

    let app_state = AppState::new(config.clone(), mongo_client, redis_client)
        .await
        .expect("Failed to initialize app state");

    let service = SessionService::new(app_state.mongo.clone(), app_state.redis.clone());

    let interval = config.sessions.sweeper_interval();
    let timeout = Duration::minutes(config.sessions.inactivity_timeout_minutes);

    info!(
        "Starting session sweeper loop (interval {}s, timeout {}m)",
        interval.as_secs(),
        timeout.num_minutes()
    );

    loop {
        let cutoff = Utc::now() - timeout;
        match service.sweep_stale(cutoff).await {
            Ok(swept) => {
                SESSION_SWEEPER_TICKS_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                if swept > 0 {
                    info!("Session sweeper tick completed: {} sessions abandoned", swept);
                }
            }
            Err(err) => {
                SESSION_SWEEPER_TICKS_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                warn!(error = %err, "Session sweeper tick failed");
            }
        }

        sleep(interval).await;
    }
}
