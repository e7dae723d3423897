//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Bounds for the recovery sweep interval.
pub const MIN_RECOVERY_INTERVAL: Duration = Duration::from_secs(300);
pub const MAX_RECOVERY_INTERVAL: Duration = Duration::from_secs(900);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Scheduler tick period
    pub tick_interval: Duration,
    /// How long a job may stay in `processing` before it is reclaimed
    pub stale_threshold: Duration,
    /// Recovery sweep period, clamped to 5..=15 minutes
    pub recovery_interval: Duration,
    /// Retention sweep period
    pub retention_interval: Duration,
    /// Archived jobs older than this are evicted
    pub retention_ttl: Duration,
    /// Root folder for downloaded audio
    pub output_root: PathBuf,
    /// yt-dlp executable
    pub ytdlp_path: String,
    /// Spotify client credentials
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    /// Expose Prometheus metrics
    pub metrics_enabled: bool,
    /// Port of the Prometheus scrape endpoint
    pub metrics_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            stale_threshold: Duration::from_secs(300), // 5 minutes
            recovery_interval: Duration::from_secs(600),
            retention_interval: Duration::from_secs(3600),
            retention_ttl: Duration::from_secs(86400), // 24 hours
            output_root: PathBuf::from("./downloads"),
            ytdlp_path: "yt-dlp".to_string(),
            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),
            metrics_enabled: false,
            metrics_port: 9100,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    parse_or(std::env::var(key).ok(), default)
}

/// Parse `value` as `T`, falling back to `default` when it is missing or
/// out of range for the type.
fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            tick_interval: Duration::from_millis(env_u64("WORKER_TICK_MS", 1000)),
            stale_threshold: Duration::from_secs(env_u64("WORKER_STALE_THRESHOLD_SECS", 300)),
            recovery_interval: clamp_recovery_interval(Duration::from_secs(env_u64(
                "WORKER_RECOVERY_INTERVAL_SECS",
                600,
            ))),
            retention_interval: Duration::from_secs(env_u64(
                "WORKER_RETENTION_INTERVAL_SECS",
                3600,
            )),
            retention_ttl: Duration::from_secs(env_u64("WORKER_RETENTION_TTL_SECS", 86400)),
            output_root: std::env::var("WORKER_OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./downloads")),
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            spotify_client_id: std::env::var("SPOTIFY_CLIENT_ID").unwrap_or_default(),
            spotify_client_secret: std::env::var("SPOTIFY_CLIENT_SECRET").unwrap_or_default(),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            metrics_port: parse_or(std::env::var("METRICS_PORT").ok(), 9100),
        }
    }

    /// Staleness threshold as a chrono duration for record comparisons.
    pub fn stale_threshold_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stale_threshold).unwrap_or(chrono::Duration::minutes(5))
    }

    pub fn retention_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.retention_ttl).unwrap_or(chrono::Duration::hours(24))
    }
}

/// Keep the recovery sweep between 5 and 15 minutes.
pub fn clamp_recovery_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_RECOVERY_INTERVAL, MAX_RECOVERY_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_interval_clamped() {
        assert_eq!(clamp_recovery_interval(Duration::from_secs(60)), MIN_RECOVERY_INTERVAL);
        assert_eq!(clamp_recovery_interval(Duration::from_secs(3600)), MAX_RECOVERY_INTERVAL);
        assert_eq!(clamp_recovery_interval(Duration::from_secs(600)), Duration::from_secs(600));
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.stale_threshold_chrono(), chrono::Duration::minutes(5));
        assert_eq!(config.retention_ttl_chrono(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_metrics_port_rejects_out_of_range() {
        assert_eq!(parse_or::<u16>(Some("9200".into()), 9100), 9200);
        assert_eq!(parse_or::<u16>(Some("74636".into()), 9100), 9100);
        assert_eq!(parse_or::<u16>(Some("-1".into()), 9100), 9100);
        assert_eq!(parse_or::<u16>(None, 9100), 9100);
    }
}
