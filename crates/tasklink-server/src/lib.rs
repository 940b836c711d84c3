//! One-shot local HTTP server that lets a command-line process wait for the
//! result of a browser interaction.
//!
//! ```text
//! CallbackListener::bind()      ← 127.0.0.1:0, port known before any request
//!     │  callback_url() is handed to the browser page
//!     ▼
//! wait_for_callback(listener, timeout)
//!     │  GET /callback?…  → first request fills the CallbackSlot
//!     ▼
//! ServerGuard::shutdown()       ← graceful stop, grace period, then abort
//! ```
//!
//! Exactly one server is bound per wait and none survives it.

pub mod callback;
pub mod error;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

pub use callback::{Decision, OAuthCallback, OAuthTokens, ReviewDecision};
pub use error::{CallbackError, Result};

pub const CALLBACK_PATH: &str = "/callback";

/// How long the OAuth consent page may take.
pub const OAUTH_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Plan reviews may sit open across long working sessions.
pub const PLAN_REVIEW_TIMEOUT: Duration = Duration::from_secs(4 * 24 * 60 * 60);

/// Time allowed for the confirmation page to flush before the server task
/// is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const RECEIVED_PAGE: &str = "<!doctype html><html><head><title>tasklink</title></head>\
<body style=\"font-family:sans-serif;text-align:center;margin-top:4em\">\
<h2>All set</h2><p>You can close this window and return to your terminal.</p></body></html>";

const DUPLICATE_PAGE: &str = "<!doctype html><html><head><title>tasklink</title></head>\
<body style=\"font-family:sans-serif;text-align:center;margin-top:4em\">\
<h2>Already received</h2><p>This request was already handled. You can close this window.</p></body></html>";

/// Query parameters of the callback request.
pub type CallbackParams = HashMap<String, String>;

// ---------------------------------------------------------------------------
// CallbackSlot
// ---------------------------------------------------------------------------

/// Single-fire completion handle shared with the route handler.
#[derive(Clone)]
pub struct CallbackSlot(Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>);

impl CallbackSlot {
    pub fn new() -> (Self, oneshot::Receiver<CallbackParams>) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    /// Deliver `params` if nothing was delivered yet. Returns whether this
    /// call was the one that fired.
    pub fn fire(&self, params: CallbackParams) -> bool {
        let sender = match self.0.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => tx.send(params).is_ok(),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the callback router. Exposed for in-process testing.
pub fn build_router(slot: CallbackSlot) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(slot)
}

async fn handle_callback(
    State(slot): State<CallbackSlot>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if slot.fire(params) {
        tracing::info!("browser callback received");
        (StatusCode::OK, Html(RECEIVED_PAGE)).into_response()
    } else {
        tracing::warn!("ignoring repeated browser callback");
        (StatusCode::CONFLICT, Html(DUPLICATE_PAGE)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Loopback listener bound on an OS-assigned port.
///
/// Binding happens synchronously so the caller can build the callback URL
/// (and make any blocking network calls) before entering the async wait.
#[derive(Debug)]
pub struct CallbackListener {
    inner: std::net::TcpListener,
    port: u16,
}

impl CallbackListener {
    pub fn bind() -> Result<Self> {
        let inner = std::net::TcpListener::bind(("127.0.0.1", 0))?;
        inner.set_nonblocking(true)?;
        let port = inner.local_addr()?.port();
        Ok(Self { inner, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn callback_url(&self) -> String {
        format!("http://127.0.0.1:{}{CALLBACK_PATH}", self.port)
    }
}

// ---------------------------------------------------------------------------
// Server lifetime
// ---------------------------------------------------------------------------

/// Owns the running server task. `shutdown` stops it in an orderly way;
/// dropping the guard without calling it still aborts the task.
struct ServerGuard {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ServerGuard {
    fn start(listener: tokio::net::TcpListener, app: Router) -> Self {
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stopped.await;
                })
                .await
        });
        Self {
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Stop accepting, let in-flight responses finish and idle keep-alive
    /// connections close, then abort whatever is left. On return the port
    /// is released.
    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(mut task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(Err(e))) => tracing::debug!("callback server exited with error: {e}"),
            Ok(_) => {}
            Err(_) => {
                tracing::debug!("callback server still busy after grace period; aborting");
                task.abort();
                let _ = task.await;
            }
        }
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

/// Serve `listener` until the first `/callback` request or `timeout`.
pub async fn wait_for_callback(
    listener: CallbackListener,
    timeout: Duration,
) -> Result<CallbackParams> {
    let port = listener.port;
    let listener = tokio::net::TcpListener::from_std(listener.inner)?;
    let (slot, received) = CallbackSlot::new();
    let server = ServerGuard::start(listener, build_router(slot));
    tracing::debug!("waiting up to {timeout:?} for callback on port {port}");

    let outcome = tokio::time::timeout(timeout, received).await;
    server.shutdown().await;

    match outcome {
        Ok(Ok(params)) => Ok(params),
        Ok(Err(_)) => Err(CallbackError::Closed),
        Err(_) => Err(CallbackError::Timeout(timeout)),
    }
}

/// Blocking form of [`wait_for_callback`] for synchronous callers. The
/// runtime lives only for the duration of the wait.
pub fn block_on_callback(listener: CallbackListener, timeout: Duration) -> Result<CallbackParams> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(wait_for_callback(listener, timeout))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn first_callback_fires_and_repeat_conflicts() {
        let (slot, mut received) = CallbackSlot::new();
        let app = build_router(slot);

        let (status, body) = get(&app, "/callback?decision=deny&feedback=not+ready").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("close this window"));

        let (status, _) = get(&app, "/callback?decision=allow").await;
        assert_eq!(status, StatusCode::CONFLICT);

        let params = received.try_recv().unwrap();
        assert_eq!(params.get("decision").map(String::as_str), Some("deny"));
        assert_eq!(params.get("feedback").map(String::as_str), Some("not ready"));
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let (slot, mut received) = CallbackSlot::new();
        let app = build_router(slot);
        let (status, _) = get(&app, "/favicon.ico").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(received.try_recv().is_err());
    }

    #[tokio::test]
    async fn live_callback_resolves_with_decision() {
        let listener = CallbackListener::bind().unwrap();
        let url = format!("{}?decision=deny&feedback=not+ready", listener.callback_url());
        let port = listener.port();
        let wait = tokio::spawn(wait_for_callback(listener, Duration::from_secs(10)));

        // Pooled client: its idle keep-alive connection must not hold the
        // server open.
        let client = reqwest::Client::new();
        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let _ = response.text().await.unwrap();

        let params = tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("wait finished despite keep-alive client")
            .unwrap()
            .unwrap();
        let decision = ReviewDecision::from_params(&params);
        assert_eq!(decision.decision, Decision::Deny);
        assert_eq!(decision.feedback.as_deref(), Some("not ready"));

        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_err());
        drop(client);
    }

    #[tokio::test]
    async fn timeout_rejects_and_closes_socket() {
        let listener = CallbackListener::bind().unwrap();
        let port = listener.port();

        let err = wait_for_callback(listener, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");

        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_err());
    }

    #[test]
    fn blocking_wait_times_out() {
        let listener = CallbackListener::bind().unwrap();
        let err = block_on_callback(listener, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, CallbackError::Timeout(_)));
    }

    #[test]
    fn callback_url_uses_bound_port() {
        let listener = CallbackListener::bind().unwrap();
        assert_eq!(
            listener.callback_url(),
            format!("http://127.0.0.1:{}/callback", listener.port())
        );
    }
}
