//! Rate-limited outbound request dispatching for Hestia
//!
//! Every outbound provider call from every component funnels through one
//! FIFO queue drained by a single worker task, which paces dispatches to a
//! fixed requests-per-second ceiling. This is what makes the global rate
//! limit hold no matter how many logical operations are in flight.

use crate::error::{HestiaError, Result};
use crate::logging::get_logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// HTTP method subset the provider APIs use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// An outbound provider call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
            bearer: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
            bearer: None,
        }
    }

    pub fn with_bearer(mut self, token: String) -> Self {
        self.bearer = Some(token);
        self
    }
}

/// Provider response as seen by callers
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Transport seam so the dispatcher can be tested without a network
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// HTTP transport over reqwest with a bounded per-call timeout
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        Ok(ApiResponse { status, body })
    }
}

/// One queued call; destroyed when its outcome is delivered to the sink
struct QueuedCall {
    request: ApiRequest,
    reply: oneshot::Sender<Result<ApiResponse>>,
}

/// FIFO dispatcher pacing all outbound calls to a fixed ceiling
#[derive(Clone)]
pub struct RateLimitedDispatcher {
    tx: mpsc::UnboundedSender<QueuedCall>,
}

impl RateLimitedDispatcher {
    /// Create the dispatcher and spawn its single worker task
    pub fn new(transport: Arc<dyn Transport>, max_requests_per_second: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pacing = Duration::from_secs_f64(1.0 / max_requests_per_second.max(1) as f64);
        tokio::spawn(Self::worker(rx, transport, pacing));
        Self { tx }
    }

    /// Enqueue a call; resolves or fails exactly once, independent of other
    /// queued calls.
    pub async fn submit(&self, request: ApiRequest) -> Result<ApiResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(QueuedCall {
                request,
                reply: reply_tx,
            })
            .map_err(|_| HestiaError::generic("Dispatcher worker has stopped"))?;
        reply_rx
            .await
            .map_err(|_| HestiaError::generic("Dispatch result dropped"))?
    }

    /// Single worker draining the queue. The remote call runs in its own
    /// task so a slow response never stalls the queue; the worker only
    /// waits the pacing interval between successive dispatch starts.
    async fn worker(
        mut rx: mpsc::UnboundedReceiver<QueuedCall>,
        transport: Arc<dyn Transport>,
        pacing: Duration,
    ) {
        let logger = get_logger("dispatch");
        while let Some(call) = rx.recv().await {
            let transport = Arc::clone(&transport);
            let call_logger = logger.clone();
            tokio::spawn(async move {
                let outcome = match transport.execute(&call.request).await {
                    Ok(resp) if resp.status >= 400 => {
                        let err = remote_error(&resp);
                        call_logger.debug(&format!(
                            "{} {} failed: {}",
                            call.request.method.as_str(),
                            call.request.path,
                            err
                        ));
                        Err(err)
                    }
                    other => other,
                };
                // Receiver may have been dropped; nothing left to deliver
                let _ = call.reply.send(outcome);
            });
            tokio::time::sleep(pacing).await;
        }
        logger.debug("Dispatch queue closed, worker exiting");
    }
}

/// Build the typed remote error once, at the dispatcher boundary
fn remote_error(resp: &ApiResponse) -> HestiaError {
    let provider_message = resp
        .body
        .get("error")
        .and_then(|v| v.as_str())
        .or_else(|| resp.body.get("message").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Provider returned status {}", resp.status));
    HestiaError::Remote {
        status_code: resp.status,
        provider_message,
        raw_body: resp.body.to_string(),
    }
}
