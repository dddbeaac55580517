//! Test webhook receiver.
//!
//! Each test spawns an isolated axum server on a random port that captures
//! every delivery and answers with programmable responses.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// One request captured by the receiver.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub headers: Vec<(String, String)>,
    pub body: JsonValue,
}

type PlannedResponse = (u16, Vec<(String, String)>);

#[derive(Default)]
struct ReceiverState {
    requests: Mutex<Vec<CapturedRequest>>,
    /// Responses popped per request; when empty, `default_status` is used.
    planned: Mutex<VecDeque<PlannedResponse>>,
    default_status: Mutex<u16>,
    /// Artificial handling delay, for concurrency tests.
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// A local webhook endpoint with captured requests and scripted responses.
pub struct WebhookReceiver {
    pub base_url: String,
    state: Arc<ReceiverState>,
    _shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl WebhookReceiver {
    pub async fn spawn() -> Self {
        let state = Arc::new(ReceiverState {
            default_status: Mutex::new(200),
            ..Default::default()
        });

        let app = Router::new()
            .fallback(handle_delivery)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener.local_addr().expect("Failed to get local address").port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Receiver failed");
        });

        Self {
            base_url,
            state,
            _shutdown_tx: shutdown_tx,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Status answered when no planned response is queued.
    pub fn set_default_status(&self, status: u16) {
        *self.state.default_status.lock().unwrap() = status;
    }

    /// Queue one response (consumed in FIFO order).
    pub fn plan_response(&self, status: u16, headers: &[(&str, &str)]) {
        self.state.planned.lock().unwrap().push_back((
            status,
            headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        ));
    }

    /// Delay every response, to hold requests in flight.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    /// Highest number of requests that were in flight simultaneously.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

async fn handle_delivery(
    State(state): State<Arc<ReceiverState>>,
    request: Request,
) -> Response {
    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let (parts, body) = request.into_parts();
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);

    state
        .requests
        .lock()
        .unwrap()
        .push(CapturedRequest { headers, body });

    let (status, response_headers) = state
        .planned
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| (*state.default_status.lock().unwrap(), vec![]));

    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    let mut response = Response::builder().status(status);
    for (name, value) in response_headers {
        response = response.header(name, value);
    }
    response
        .body(Body::from("ok"))
        .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
