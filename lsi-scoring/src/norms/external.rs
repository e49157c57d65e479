//! External norm provider
//!
//! Second resolver tier. Any failure (transport error, timeout, non-success
//! status, malformed body) is treated as "not found" so a flaky provider can
//! only degrade a lookup, never fail a finalize.

use crate::error::{ScoringError, ScoringResult};
use async_trait::async_trait;
use lsi_common::config::ExternalProviderSettings;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Source of percentiles outside the local database
#[async_trait]
pub trait ExternalNormProvider: Send + Sync {
    /// Percentile for (group, scale, raw), or `None` when unavailable
    async fn lookup(&self, group: &str, scale: &str, raw_score: i32) -> Option<f64>;
}

#[derive(Debug, Deserialize)]
struct PercentileResponse {
    percentile: Option<f64>,
}

/// Outcome of one HTTP attempt
enum Attempt {
    Found(f64),
    NotFound,
    Retryable(String),
}

/// HTTP provider: `GET {base_url}/percentile?group=..&scale=..&raw=..`
///
/// Expects `{"percentile": <0..=100 | null>}`. 404 means not found and is not
/// retried; transport errors, timeouts and 5xx are retried up to
/// `max_attempts` in total.
pub struct HttpNormProvider {
    http_client: Client,
    base_url: String,
    max_attempts: u32,
}

impl HttpNormProvider {
    pub fn new(settings: &ExternalProviderSettings) -> ScoringResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| ScoringError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            max_attempts: settings.max_attempts.clamp(1, 2),
        })
    }

    async fn attempt(&self, group: &str, scale: &str, raw_score: i32) -> Attempt {
        let url = format!("{}/percentile", self.base_url);
        let raw = raw_score.to_string();

        let response = match self
            .http_client
            .get(&url)
            .query(&[("group", group), ("scale", scale), ("raw", raw.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Attempt::Retryable(e.to_string()),
        };

        match response.status() {
            StatusCode::NOT_FOUND => return Attempt::NotFound,
            status if status.is_server_error() => {
                return Attempt::Retryable(format!("status {}", status));
            }
            status if !status.is_success() => {
                debug!(%status, "External norm provider refused request");
                return Attempt::NotFound;
            }
            _ => {}
        }

        match response.json::<PercentileResponse>().await {
            Ok(PercentileResponse {
                percentile: Some(p),
            }) if p.is_finite() && (0.0..=100.0).contains(&p) => Attempt::Found(p),
            Ok(body) => {
                warn!(
                    group,
                    scale,
                    raw_score,
                    percentile = ?body.percentile,
                    "External norm provider returned no usable percentile"
                );
                Attempt::NotFound
            }
            Err(e) => Attempt::Retryable(e.to_string()),
        }
    }
}

#[async_trait]
impl ExternalNormProvider for HttpNormProvider {
    async fn lookup(&self, group: &str, scale: &str, raw_score: i32) -> Option<f64> {
        for attempt in 1..=self.max_attempts {
            match self.attempt(group, scale, raw_score).await {
                Attempt::Found(p) => return Some(p),
                Attempt::NotFound => return None,
                Attempt::Retryable(reason) => {
                    warn!(
                        group,
                        scale,
                        raw_score,
                        attempt,
                        max_attempts = self.max_attempts,
                        reason = %reason,
                        "External norm lookup failed"
                    );
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `status` + `body` to every connection, counting requests
    async fn serve(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn provider(base_url: String, timeout_ms: u64) -> HttpNormProvider {
        HttpNormProvider::new(&ExternalProviderSettings {
            base_url,
            timeout_ms,
            max_attempts: 2,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_found() {
        let (url, hits) = serve("200 OK", r#"{"percentile": 42.5}"#).await;
        let result = provider(url, 2000).lookup("Total", "CE", 25).await;
        assert_eq!(result, Some(42.5));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (url, hits) = serve("404 Not Found", "{}").await;
        assert_eq!(provider(url, 2000).lookup("Total", "CE", 25).await, None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_retried_once() {
        let (url, hits) = serve("503 Service Unavailable", "{}").await;
        assert_eq!(provider(url, 2000).lookup("Total", "CE", 25).await, None);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_percentile_ignored() {
        let (url, _) = serve("200 OK", r#"{"percentile": 140.0}"#).await;
        assert_eq!(provider(url, 2000).lookup("Total", "CE", 25).await, None);
    }

    #[tokio::test]
    async fn test_timeout_is_absent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let result = provider(format!("http://{}", addr), 100)
            .lookup("Total", "CE", 25)
            .await;
        assert_eq!(result, None);
    }
}
