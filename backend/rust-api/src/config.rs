use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub sessions: SessionsConfig,
    pub adaptive: AdaptiveConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Minutes of inactivity before the sweeper marks a session abandoned.
    pub inactivity_timeout_minutes: i64,
    /// Interval between sweeper passes.
    pub sweeper_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveConfig {
    /// Bounded recent-results window the rule evaluator averages over.
    pub metrics_window: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Trailing months covered by the per-user hint trend.
    pub trend_months: u32,
}

impl SessionsConfig {
    pub fn sweeper_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper_interval_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            // Fallback to current directory .env for backward compatibility
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            // Load base config from TOML file
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        // Extract values with fallbacks to ENV or defaults
        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017/studyforge".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                format!("redis://{}:{}/0", host, port)
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "studyforge".to_string());

        let jwt_secret = settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    panic!("FATAL: JWT_SECRET must be set in production!");
                }
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            });

        let inactivity_timeout_minutes = settings
            .get_int("sessions.inactivity_timeout_minutes")
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(120);

        let sweeper_interval_secs = settings
            .get_int("sessions.sweeper_interval_secs")
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(300) as u64;

        let metrics_window = settings
            .get_int("adaptive.metrics_window")
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(10) as u32;

        let trend_months = settings
            .get_int("analytics.trend_months")
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(6) as u32;

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            sessions: SessionsConfig {
                inactivity_timeout_minutes,
                sweeper_interval_secs,
            },
            adaptive: AdaptiveConfig { metrics_window },
            analytics: AnalyticsConfig { trend_months },
        })
    }
}
