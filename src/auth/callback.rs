//! Local OAuth callback listener
//!
//! Binds the fixed loopback redirect port and serves two routes: the OAuth
//! redirect target, and a ready route that lets a concurrent `costa login`
//! recognise an active listener. The fixed port doubles as a cross-process
//! lock: whoever binds it drives the login, everyone else follows.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{AuthError, CALLBACK_PATH, READY_PATH};

const SUCCESS_PAGE: &str = include_str!("login_success.html");

/// Status string the ready route answers with.
pub const READY_STATUS: &str = "costa-login-ready";

/// How long a graceful shutdown may take before the server task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Result of trying to claim the redirect port.
pub enum Bind {
    Bound(TcpListener),
    /// Another process (normally another `costa login`) holds the port.
    PortInUse,
}

/// Claim the loopback redirect port.
pub async fn bind(port: u16) -> Result<Bind, AuthError> {
    match TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await {
        Ok(listener) => Ok(Bind::Bound(listener)),
        Err(e) if e.kind() == ErrorKind::AddrInUse => Ok(Bind::PortInUse),
        Err(e) => Err(AuthError::CallbackServer(format!(
            "failed to bind 127.0.0.1:{}: {}",
            port, e
        ))),
    }
}

/// Body of the ready route
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    /// Authorization URL the listener is waiting on
    #[serde(default)]
    pub authorize_url: Option<String>,
}

/// What the callback route delivers to the login driver.
pub struct CallbackEvents {
    pub codes: mpsc::Receiver<String>,
    pub errors: mpsc::Receiver<AuthError>,
}

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    authorize_url: Arc<str>,
    code_tx: mpsc::Sender<String>,
    error_tx: mpsc::Sender<AuthError>,
}

/// Running callback server. Dropping it stops the server as well.
pub struct CallbackServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Serve the callback and ready routes on an already-bound listener.
    pub fn start(
        listener: TcpListener,
        expected_state: &str,
        authorize_url: &str,
    ) -> (Self, CallbackEvents) {
        let (code_tx, codes) = mpsc::channel(1);
        let (error_tx, errors) = mpsc::channel(1);
        let state = CallbackState {
            expected_state: Arc::from(expected_state),
            authorize_url: Arc::from(authorize_url),
            code_tx,
            error_tx,
        };

        let router = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .route(READY_PATH, get(handle_ready))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::warn!("Callback server error: {}", e);
            }
        });

        (
            Self {
                shutdown_tx: Some(shutdown_tx),
                task: Some(task),
            },
            CallbackEvents { codes, errors },
        )
    }

    /// Stop accepting connections and wait briefly for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        tracing::debug!("Callback server stopped");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(error) = params.get("error") {
        let detail = match params.get("error_description") {
            Some(description) => format!("{}: {}", error, description),
            None => error.clone(),
        };
        let _ = state
            .error_tx
            .try_send(AuthError::AuthorizationDenied(detail));
        return (StatusCode::BAD_REQUEST, "Authorization was denied").into_response();
    }

    if params.get("state").map(String::as_str) != Some(&*state.expected_state) {
        let _ = state.error_tx.try_send(AuthError::StateMismatch);
        return (StatusCode::BAD_REQUEST, "Invalid state parameter").into_response();
    }

    let Some(code) = params.get("code").filter(|c| !c.is_empty()) else {
        let _ = state.error_tx.try_send(AuthError::NoCode);
        return (StatusCode::BAD_REQUEST, "No authorization code received").into_response();
    };

    let _ = state.code_tx.try_send(code.clone());
    Html(SUCCESS_PAGE).into_response()
}

async fn handle_ready(State(state): State<CallbackState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: READY_STATUS.to_string(),
        authorize_url: Some(state.authorize_url.to_string()),
    })
}
