// src/keep_alive.rs

use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum KeepAliveError {
    #[error("Invalid keep-alive URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to build keep-alive HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Periodically pings our own `/health` endpoint so free-tier hosts do not
/// idle the process out between scheduled runs.
pub struct KeepAliveService {
    ping_url: Url,
    interval: Duration,
    client: reqwest::Client,
}

impl KeepAliveService {
    pub fn new(base_url: &str, interval: Duration) -> Result<Self, KeepAliveError> {
        let ping_url = Url::parse(&format!("{}/health", base_url.trim_end_matches('/')))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            ping_url,
            interval,
            client,
        })
    }

    /// First ping happens one full interval after startup.
    pub async fn run(self) {
        info!(
            "Keep-alive service started, pinging {} every {} minutes",
            self.ping_url,
            self.interval.as_secs() / 60
        );
        loop {
            sleep(self.interval).await;
            self.ping().await;
        }
    }

    async fn ping(&self) {
        match self.client.get(self.ping_url.clone()).send().await {
            Ok(response) => {
                info!(
                    "Keep-alive ping successful at {}: {}",
                    chrono::Utc::now().to_rfc3339(),
                    response.status()
                );
            }
            Err(e) => {
                warn!("Keep-alive ping failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_url_appends_health_path() {
        let service = KeepAliveService::new("https://worklog.example.com", Duration::from_secs(60))
            .expect("service builds");
        assert_eq!(service.ping_url.as_str(), "https://worklog.example.com/health");
    }

    #[test]
    fn test_trailing_slash_does_not_double_up() {
        let service =
            KeepAliveService::new("https://worklog.example.com/", Duration::from_secs(60))
                .expect("service builds");
        assert_eq!(service.ping_url.as_str(), "https://worklog.example.com/health");
    }

    #[test]
    fn test_garbage_url_is_rejected() {
        assert!(KeepAliveService::new("not a url", Duration::from_secs(60)).is_err());
    }
}
