/// Health check HTTP endpoint
/// Serves /health, /ready and /metrics for monitoring systems. Counters are
/// tagged by check outcome so a dashboard can tell "the site listed nothing"
/// apart from "the fetch failed".

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::check::CheckOutcome;

/// Timeout for reading an HTTP request (prevents slow-loris)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of the metrics, one per /health request.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub checks_total: u64,
    pub earlier_found: u64,
    pub no_earlier_found: u64,
    pub no_candidates: u64,
    pub failed: u64,
    pub skipped_busy: u64,
    pub skipped_no_reference: u64,
    /// Unix epoch seconds of the last completed check, 0 before the first
    pub last_check_time: u64,
    pub last_check_ok: bool,
}

/// Shared counters updated from the check loop.
#[derive(Debug, Default)]
pub struct CheckMetrics {
    checks_total: AtomicU64,
    earlier_found: AtomicU64,
    no_earlier_found: AtomicU64,
    no_candidates: AtomicU64,
    failed: AtomicU64,
    skipped_busy: AtomicU64,
    skipped_no_reference: AtomicU64,
    last_check_time: AtomicU64,
    last_check_ok: AtomicBool,
}

impl CheckMetrics {
    pub fn new() -> Self {
        Self {
            last_check_ok: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Record one check outcome. Skipped checks count but do not touch the
    /// completion timestamp: nothing actually ran.
    pub fn record(&self, outcome: &CheckOutcome) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            CheckOutcome::EarlierFound => {
                self.earlier_found.fetch_add(1, Ordering::Relaxed);
                self.mark_completed(true);
            }
            CheckOutcome::NoEarlierFound => {
                self.no_earlier_found.fetch_add(1, Ordering::Relaxed);
                self.mark_completed(true);
            }
            CheckOutcome::NoCandidates => {
                self.no_candidates.fetch_add(1, Ordering::Relaxed);
                self.mark_completed(true);
            }
            CheckOutcome::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.mark_completed(false);
            }
            CheckOutcome::SkippedBusy => {
                self.skipped_busy.fetch_add(1, Ordering::Relaxed);
            }
            CheckOutcome::SkippedNoReference => {
                self.skipped_no_reference.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn mark_completed(&self, ok: bool) {
        self.last_check_time.store(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            Ordering::Relaxed,
        );
        self.last_check_ok.store(ok, Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            checks_total: self.checks_total.load(Ordering::Relaxed),
            earlier_found: self.earlier_found.load(Ordering::Relaxed),
            no_earlier_found: self.no_earlier_found.load(Ordering::Relaxed),
            no_candidates: self.no_candidates.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped_busy: self.skipped_busy.load(Ordering::Relaxed),
            skipped_no_reference: self.skipped_no_reference.load(Ordering::Relaxed),
            last_check_time: self.last_check_time.load(Ordering::Relaxed),
            last_check_ok: self.last_check_ok.load(Ordering::Relaxed),
        }
    }
}

/// Run the health check HTTP server until cancelled.
pub async fn run_health_server(
    port: u16,
    metrics: Arc<CheckMetrics>,
    cancel_token: CancellationToken,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind health check server on port {}: {}", port, e);
            return;
        }
    };

    info!("Health check server listening on http://0.0.0.0:{}/health", port);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, peer_addr)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_request(&mut socket, &metrics).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Health check server shutting down");
                break;
            }
        }
    }
}

async fn handle_request(
    socket: &mut tokio::net::TcpStream,
    metrics: &CheckMetrics,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];

    let n = match timeout(REQUEST_TIMEOUT, socket.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let status = metrics.status();
    let response = match path {
        "/health" | "/healthz" | "/health/" => build_health_response(&status),
        "/ready" | "/readyz" | "/ready/" => {
            // Ready before the first check completes (startup grace), then
            // ready only while the last completed check succeeded.
            build_ready_response(status.last_check_ok || status.last_check_time == 0)
        }
        "/metrics" => build_metrics_response(&status),
        _ => build_not_found_response(),
    };

    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;

    Ok(())
}

fn build_health_response(status: &HealthStatus) -> String {
    // Serializing a plain struct of integers cannot fail
    let body = serde_json::to_string(status).unwrap_or_else(|_| "{}".to_string());
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn build_ready_response(ready: bool) -> String {
    let (status_code, status_text, body) = if ready {
        (200, "OK", r#"{"ready":true}"#)
    } else {
        (503, "Service Unavailable", r#"{"ready":false}"#)
    };

    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        body.len(),
        body
    )
}

fn build_metrics_response(status: &HealthStatus) -> String {
    let body = format!(
        "# HELP slotwatch_checks_total Total number of checks, by outcome\n\
         # TYPE slotwatch_checks_total counter\n\
         slotwatch_checks_total{{outcome=\"earlier_found\"}} {}\n\
         slotwatch_checks_total{{outcome=\"no_earlier_found\"}} {}\n\
         slotwatch_checks_total{{outcome=\"no_candidates\"}} {}\n\
         slotwatch_checks_total{{outcome=\"failed\"}} {}\n\
         slotwatch_checks_total{{outcome=\"skipped_busy\"}} {}\n\
         slotwatch_checks_total{{outcome=\"skipped_no_reference\"}} {}\n\
         # HELP slotwatch_last_check_timestamp Unix timestamp of the last completed check\n\
         # TYPE slotwatch_last_check_timestamp gauge\n\
         slotwatch_last_check_timestamp {}\n\
         # HELP slotwatch_last_check_ok Whether the last completed check succeeded (1) or failed (0)\n\
         # TYPE slotwatch_last_check_ok gauge\n\
         slotwatch_last_check_ok {}\n",
        status.earlier_found,
        status.no_earlier_found,
        status.no_candidates,
        status.failed,
        status.skipped_busy,
        status.skipped_no_reference,
        status.last_check_time,
        if status.last_check_ok { 1 } else { 0 }
    );

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn build_not_found_response() -> String {
    let body = r#"{"error":"Not Found"}"#;
    format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_start_empty() {
        let metrics = CheckMetrics::new();
        let status = metrics.status();
        assert_eq!(status.checks_total, 0);
        assert_eq!(status.last_check_time, 0);
        assert!(status.last_check_ok);
    }

    #[test]
    fn test_record_each_outcome() {
        let metrics = CheckMetrics::new();
        metrics.record(&CheckOutcome::EarlierFound);
        metrics.record(&CheckOutcome::NoEarlierFound);
        metrics.record(&CheckOutcome::NoCandidates);
        metrics.record(&CheckOutcome::Failed);
        metrics.record(&CheckOutcome::SkippedBusy);
        metrics.record(&CheckOutcome::SkippedNoReference);

        let status = metrics.status();
        assert_eq!(status.checks_total, 6);
        assert_eq!(status.earlier_found, 1);
        assert_eq!(status.no_earlier_found, 1);
        assert_eq!(status.no_candidates, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.skipped_busy, 1);
        assert_eq!(status.skipped_no_reference, 1);
    }

    #[test]
    fn test_failed_check_clears_ok_flag() {
        let metrics = CheckMetrics::new();
        metrics.record(&CheckOutcome::NoEarlierFound);
        assert!(metrics.status().last_check_ok);
        metrics.record(&CheckOutcome::Failed);
        assert!(!metrics.status().last_check_ok);
    }

    #[test]
    fn test_skips_do_not_touch_completion_timestamp() {
        let metrics = CheckMetrics::new();
        metrics.record(&CheckOutcome::SkippedBusy);
        metrics.record(&CheckOutcome::SkippedNoReference);
        let status = metrics.status();
        assert_eq!(status.checks_total, 2);
        assert_eq!(status.last_check_time, 0);
        assert!(status.last_check_ok);
    }

    #[test]
    fn test_health_response_is_json() {
        let metrics = CheckMetrics::new();
        metrics.record(&CheckOutcome::EarlierFound);
        let response = build_health_response(&metrics.status());
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("application/json"));
        assert!(response.contains("\"earlier_found\":1"));
        assert!(response.contains("\"checks_total\":1"));
    }

    #[test]
    fn test_ready_responses() {
        assert!(build_ready_response(true).starts_with("HTTP/1.1 200 OK"));
        assert!(build_ready_response(false).starts_with("HTTP/1.1 503"));
    }

    #[test]
    fn test_metrics_response_prometheus_format() {
        let metrics = CheckMetrics::new();
        metrics.record(&CheckOutcome::NoEarlierFound);
        metrics.record(&CheckOutcome::Failed);
        let response = build_metrics_response(&metrics.status());
        assert!(response.contains("slotwatch_checks_total{outcome=\"no_earlier_found\"} 1"));
        assert!(response.contains("slotwatch_checks_total{outcome=\"failed\"} 1"));
        assert!(response.contains("slotwatch_last_check_ok 0"));
    }

    #[test]
    fn test_not_found_response() {
        let response = build_not_found_response();
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_health_server_starts_and_stops() {
        let metrics = Arc::new(CheckMetrics::new());
        let cancel_token = CancellationToken::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener); // Release the port

        let handle = tokio::spawn(run_health_server(port, metrics, cancel_token.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_token.cancel();

        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("Server should shutdown within timeout")
            .expect("Server should complete without panic");
    }
}
