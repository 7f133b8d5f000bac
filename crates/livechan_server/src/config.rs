use std::env;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3040)
    pub port: u16,
    /// Base URL of the post store service (default: http://localhost:3041)
    pub post_store_url: String,
    /// Timeout for post store RPC calls in seconds (default: 5)
    pub post_store_timeout_secs: u64,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
    /// Maximum concurrent WebSocket connections per source address (default: 16)
    pub max_connections_per_addr: usize,
    /// Text message flush interval in milliseconds (default: 100)
    pub flush_interval_ms: u64,
    /// Sweeper period in seconds (default: 60)
    pub sweep_interval_secs: u64,
    /// Seconds a feed may sit with zero subscribers before eviction (default: 300)
    pub feed_idle_secs: u64,
    /// Spam score at which post creation requires a captcha (default: 500)
    pub spam_captcha_threshold: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3040".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let post_store_url = env::var("POST_STORE_URL")
            .unwrap_or_else(|_| "http://localhost:3041".to_string())
            .trim_end_matches('/')
            .to_string();

        let post_store_timeout_secs = env::var("POST_STORE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let max_connections_per_addr = env::var("WS_MAX_CONNECTIONS_PER_IP")
            .unwrap_or_else(|_| "16".to_string())
            .parse()
            .unwrap_or(16);

        let flush_interval_ms = env::var("WS_FLUSH_INTERVAL_MS")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .unwrap_or(100);

        let sweep_interval_secs = env::var("WS_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        let feed_idle_secs = env::var("WS_FEED_IDLE_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let spam_captcha_threshold = env::var("SPAM_CAPTCHA_THRESHOLD")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .unwrap_or(500);

        Ok(Config {
            host,
            port,
            post_store_url,
            post_store_timeout_secs,
            cors_origins,
            max_connections_per_addr,
            flush_interval_ms,
            sweep_interval_secs,
            feed_idle_secs,
            spam_captcha_threshold,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3040,
            post_store_url: "http://localhost:3041".to_string(),
            post_store_timeout_secs: 5,
            cors_origins: vec!["http://localhost:5173".to_string()],
            max_connections_per_addr: 16,
            flush_interval_ms: 100,
            sweep_interval_secs: 60,
            feed_idle_secs: 300,
            spam_captcha_threshold: 500,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
        }
    }
}

impl std::error::Error for ConfigError {}
