//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

use tunefetch_queue::SubscriptionConfig;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Idle time before an SSE heartbeat
    pub sse_heartbeat: Duration,
    /// Delay between a terminal event and closing the SSE stream
    pub sse_close_grace: Duration,
    /// Root of the worker's download folders
    pub output_root: PathBuf,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: vec!["http://localhost:5173".to_string()],
            sse_heartbeat: Duration::from_secs(30),
            sse_close_grace: Duration::from_millis(1000),
            output_root: PathBuf::from("./downloads"),
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| parse_origins(&s))
                .unwrap_or(defaults.cors_origins),
            sse_heartbeat: std::env::var("SSE_HEARTBEAT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sse_heartbeat),
            sse_close_grace: std::env::var("SSE_CLOSE_GRACE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.sse_close_grace),
            output_root: std::env::var("WORKER_OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    pub fn subscription(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            heartbeat: self.sse_heartbeat,
            close_grace: self.sse_close_grace,
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
