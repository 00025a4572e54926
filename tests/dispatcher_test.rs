use hestia::dispatch::{ApiRequest, ApiResponse, RateLimitedDispatcher, Transport};
use hestia::error::{HestiaError, Result};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

/// Transport that records dispatch start times and answers from a script
struct RecordingTransport {
    dispatched: Mutex<Vec<(Instant, String)>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
        }
    }

    fn dispatch_log(&self) -> Vec<(Instant, String)> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.dispatched
            .lock()
            .unwrap()
            .push((Instant::now(), request.path.clone()));

        match request.path.as_str() {
            "network_down" => Err(HestiaError::network("connection reset")),
            "rate_limited" => Ok(ApiResponse {
                status: 429,
                body: serde_json::json!({"error": "rate limit exceeded"}),
            }),
            "server_error" => Ok(ApiResponse {
                status: 500,
                body: serde_json::json!({"message": "internal"}),
            }),
            _ => Ok(ApiResponse {
                status: 200,
                body: serde_json::json!({"response": {"ok": true}}),
            }),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn dispatch_start_gaps_respect_the_rate_ceiling() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = RateLimitedDispatcher::new(transport.clone(), 20);

    let (a, b, c, d) = tokio::join!(
        dispatcher.submit(ApiRequest::get("one")),
        dispatcher.submit(ApiRequest::get("two")),
        dispatcher.submit(ApiRequest::get("three")),
        dispatcher.submit(ApiRequest::get("four")),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());

    let log = transport.dispatch_log();
    assert_eq!(log.len(), 4);
    // 20 rps -> at least 50ms between consecutive dispatch starts
    for pair in log.windows(2) {
        let gap = pair[1].0 - pair[0].0;
        assert!(
            gap >= Duration::from_millis(50),
            "dispatch gap {:?} below pacing interval",
            gap
        );
    }
}

#[tokio::test(start_paused = true)]
async fn submission_order_is_preserved() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = RateLimitedDispatcher::new(transport.clone(), 20);

    // join! polls (and therefore enqueues) in argument order
    let (a, b, c, d, e) = tokio::join!(
        dispatcher.submit(ApiRequest::get("first")),
        dispatcher.submit(ApiRequest::get("second")),
        dispatcher.submit(ApiRequest::get("third")),
        dispatcher.submit(ApiRequest::get("fourth")),
        dispatcher.submit(ApiRequest::get("fifth")),
    );
    for result in [a, b, c, d, e] {
        result.unwrap();
    }

    let order: Vec<String> = transport.dispatch_log().into_iter().map(|(_, p)| p).collect();
    assert_eq!(order, vec!["first", "second", "third", "fourth", "fifth"]);
}

#[tokio::test]
async fn one_failure_never_halts_the_queue() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = RateLimitedDispatcher::new(transport.clone(), 1000);

    let (ok1, bad, ok2) = tokio::join!(
        dispatcher.submit(ApiRequest::get("one")),
        dispatcher.submit(ApiRequest::get("network_down")),
        dispatcher.submit(ApiRequest::get("two")),
    );

    assert!(ok1.is_ok());
    assert!(matches!(bad.unwrap_err(), HestiaError::Network { .. }));
    assert!(ok2.is_ok());
    assert_eq!(transport.dispatch_log().len(), 3);
}

#[tokio::test]
async fn http_4xx_and_5xx_become_typed_remote_errors() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = RateLimitedDispatcher::new(transport, 1000);

    let err = dispatcher
        .submit(ApiRequest::get("rate_limited"))
        .await
        .unwrap_err();
    match err {
        HestiaError::Remote {
            status_code,
            provider_message,
            ..
        } => {
            assert_eq!(status_code, 429);
            assert_eq!(provider_message, "rate limit exceeded");
        }
        other => panic!("expected remote error, got {other}"),
    }

    let err = dispatcher
        .submit(ApiRequest::get("server_error"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(500));
}

#[tokio::test]
async fn successful_response_body_is_delivered() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = RateLimitedDispatcher::new(transport, 1000);

    let resp = dispatcher.submit(ApiRequest::get("one")).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["response"]["ok"], true);
}
