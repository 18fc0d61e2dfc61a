//! HTTP client for a pull-only alarm endpoint.
//!
//! Queries `GET http://{endpoint}/alarms/{name}` and expects a JSON body of
//! the form `{"state": "OK", "timestamp": 1700000000}`. Non-2xx responses
//! and malformed bodies are errors; the evaluator decides what an error
//! means for the verdict.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use perch_core::traits::AlarmGateway;
use perch_core::types::AlarmStatus;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Alarm gateway over plain HTTP/1.1.
#[derive(Debug, Clone)]
pub struct HttpAlarmGateway {
    /// The monitoring endpoint as `host:port`.
    endpoint: String,
    /// Bound on the whole connect + request + body read.
    timeout: Duration,
}

impl HttpAlarmGateway {
    /// Create a gateway for `endpoint` (`host:port`, with or without a
    /// leading `http://`).
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let endpoint = endpoint
            .strip_prefix("http://")
            .unwrap_or(&endpoint)
            .trim_end_matches('/')
            .to_string();
        Self {
            endpoint,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_status(&self, name: &str) -> Result<AlarmStatus, anyhow::Error> {
        let uri = format!("http://{}/alarms/{}", self.endpoint, name);

        let stream = tokio::net::TcpStream::connect(&self.endpoint)
            .await
            .with_context(|| format!("connecting to alarm endpoint {}", self.endpoint))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .context("alarm endpoint handshake failed")?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", &self.endpoint)
            .header("user-agent", "perch-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .context("building alarm request")?;

        let resp = sender
            .send_request(req)
            .await
            .with_context(|| format!("alarm request to {uri} failed"))?;
        if !resp.status().is_success() {
            anyhow::bail!("alarm endpoint returned {} for {name}", resp.status());
        }

        use http_body_util::BodyExt;
        let body = resp
            .into_body()
            .collect()
            .await
            .context("reading alarm response body")?
            .to_bytes();
        let status: AlarmStatus = serde_json::from_slice(&body)
            .with_context(|| format!("malformed alarm body for {name}"))?;

        debug!(alarm = %name, state = %status.state, "alarm fetched");
        Ok(status)
    }
}

#[async_trait]
impl AlarmGateway for HttpAlarmGateway {
    async fn alarm_state(&self, name: &str) -> Result<AlarmStatus, anyhow::Error> {
        tokio::time::timeout(self.timeout, self.fetch_status(name))
            .await
            .map_err(|_| anyhow::anyhow!("alarm query for {name} timed out"))?
    }
}
