use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub notification_topic: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When absent the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub kafka: Option<KafkaConfig>,
    pub jwt_secret: String,
    pub identity_service_url: Option<String>,
    pub edit_window_minutes: i64,
    pub typing_debounce_ms: u64,
    pub session_channel_capacity: usize,
    pub notification_queue_capacity: usize,
    pub ws_handshake_timeout_secs: u64,
    pub max_write_retries: u32,
}

impl Config {
    fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
        env::var(key)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    fn non_empty(key: &str) -> Option<String> {
        env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let jwt_secret = Self::non_empty("JWT_SECRET")
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;

        let kafka = match Self::non_empty("KAFKA_BROKERS") {
            Some(brokers) => Some(KafkaConfig {
                brokers,
                notification_topic: Self::non_empty("KAFKA_NOTIFICATION_TOPIC")
                    .unwrap_or_else(|| "chat.notifications".to_string()),
            }),
            None => None,
        };

        let config = Self {
            port: Self::parse_or("PORT", 8085),
            database_url: Self::non_empty("DATABASE_URL"),
            redis_url: Self::non_empty("REDIS_URL"),
            kafka,
            jwt_secret,
            identity_service_url: Self::non_empty("IDENTITY_SERVICE_URL"),
            edit_window_minutes: Self::parse_or("EDIT_WINDOW_MINUTES", 15),
            typing_debounce_ms: Self::parse_or("TYPING_DEBOUNCE_MS", 3000),
            session_channel_capacity: Self::parse_or("SESSION_CHANNEL_CAPACITY", 256),
            notification_queue_capacity: Self::parse_or("NOTIFICATION_QUEUE_CAPACITY", 1024),
            ws_handshake_timeout_secs: Self::parse_or("WS_HANDSHAKE_TIMEOUT_SECS", 10),
            max_write_retries: Self::parse_or("MAX_WRITE_RETRIES", 5),
        };

        if config.edit_window_minutes <= 0 {
            return Err(AppError::Config(
                "EDIT_WINDOW_MINUTES must be positive".into(),
            ));
        }
        if config.session_channel_capacity == 0 || config.notification_queue_capacity == 0 {
            return Err(AppError::Config("channel capacities must be non-zero".into()));
        }

        Ok(config)
    }

    /// Defaults for tests and embedded use.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            port: 0,
            database_url: None,
            redis_url: None,
            kafka: None,
            jwt_secret: jwt_secret.to_string(),
            identity_service_url: None,
            edit_window_minutes: 15,
            typing_debounce_ms: 3000,
            session_channel_capacity: 256,
            notification_queue_capacity: 1024,
            ws_handshake_timeout_secs: 10,
            max_write_retries: 5,
        }
    }

    pub fn typing_debounce(&self) -> Duration {
        Duration::from_millis(self.typing_debounce_ms)
    }

    pub fn ws_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_handshake_timeout_secs)
    }
}
