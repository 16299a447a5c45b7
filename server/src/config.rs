use raffle_execution::EngineConfig;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_DRAW_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_DRAW_RETRY_BACKOFF_MS: u64 = 50;
pub const DEFAULT_HTTP_RATE_LIMIT_PER_SECOND: u64 = 50;
pub const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 100;
pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    /// SQLite file; an in-memory database is used when absent.
    pub database_path: Option<PathBuf>,
    /// JSON catalog of gifts and users loaded at startup.
    pub catalog_path: Option<PathBuf>,
    pub lock_timeout_ms: u64,
    pub draw_retry_attempts: u32,
    pub draw_retry_backoff_ms: u64,
    /// Winner notices are POSTed here; logged only when absent.
    pub notify_webhook_url: Option<String>,
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            catalog_path: None,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            draw_retry_attempts: DEFAULT_DRAW_RETRY_ATTEMPTS,
            draw_retry_backoff_ms: DEFAULT_DRAW_RETRY_BACKOFF_MS,
            notify_webhook_url: None,
            http_rate_limit_per_second: Some(DEFAULT_HTTP_RATE_LIMIT_PER_SECOND),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
        }
    }
}

impl ServerConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            draw_retry_attempts: self.draw_retry_attempts,
            draw_retry_backoff: Duration::from_millis(self.draw_retry_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_carries_timeouts() {
        let config = ServerConfig {
            lock_timeout_ms: 250,
            draw_retry_attempts: 1,
            ..Default::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.lock_timeout, Duration::from_millis(250));
        assert_eq!(engine.draw_retry_attempts, 1);
        assert_eq!(
            engine.draw_retry_backoff,
            Duration::from_millis(DEFAULT_DRAW_RETRY_BACKOFF_MS)
        );
    }
}
