//! Browser login: OAuth2 authorization code with PKCE
//!
//! One `LoginFlow` drives one `costa login`. The invocation that binds the
//! redirect port serves the callback and exchanges the code. An invocation
//! that finds the port taken becomes a follower: it opens the same
//! authorization page and polls the token store until the listener has
//! persisted a token.

use std::sync::Arc;
use std::time::Instant;

use super::callback::{self, Bind, CallbackServer, ReadyResponse, READY_STATUS};
use super::manager::TokenManager;
use super::oauth;
use super::pkce::PkceParams;
use super::tokens::Token;
use super::AuthError;

/// Opens the authorization page for the user.
pub trait Browser: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// The desktop's default browser.
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginPhase {
    Idle,
    GeneratingParameters,
    BindingCallback,
    AwaitingRedirect,
    JoiningExistingListener,
    ExchangingCode,
    Authenticated,
    Failed,
    TimedOut,
}

/// How a login attempt ended.
#[derive(Debug)]
pub enum LoginOutcome {
    /// Credentials were already stored; nothing was done.
    AlreadyAuthenticated,
    /// This invocation ran the flow. A failed follow-up service token fetch
    /// is reported here but does not fail the login.
    Authenticated {
        service_token_error: Option<AuthError>,
    },
    /// Another invocation ran the flow and persisted the token.
    Joined,
}

pub struct LoginFlow {
    manager: Arc<TokenManager>,
    browser: Arc<dyn Browser>,
    phase: LoginPhase,
}

impl LoginFlow {
    pub fn new(manager: Arc<TokenManager>, browser: Arc<dyn Browser>) -> Self {
        Self {
            manager,
            browser,
            phase: LoginPhase::Idle,
        }
    }

    fn enter(&mut self, phase: LoginPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "Login phase");
        self.phase = phase;
    }

    pub async fn run(mut self) -> Result<LoginOutcome, AuthError> {
        if self.manager.is_authenticated() {
            tracing::debug!("Already authenticated, skipping login flow");
            return Ok(LoginOutcome::AlreadyAuthenticated);
        }

        let result = self.drive().await;
        match &result {
            Ok(_) => {}
            Err(AuthError::Timeout) => self.enter(LoginPhase::TimedOut),
            Err(e) => {
                tracing::debug!("Login failed: {}", e);
                self.enter(LoginPhase::Failed);
            }
        }
        result
    }

    async fn drive(&mut self) -> Result<LoginOutcome, AuthError> {
        self.enter(LoginPhase::GeneratingParameters);
        let params = PkceParams::generate()?;
        let authorize_url = oauth::authorize_url(
            self.manager.oauth_client(),
            self.manager.config(),
            &params,
        );

        self.enter(LoginPhase::BindingCallback);
        match callback::bind(self.manager.config().redirect_port).await? {
            Bind::Bound(listener) => self.lead(listener, &params, authorize_url.as_str()).await,
            Bind::PortInUse => self.follow(authorize_url.as_str()).await,
        }
    }

    /// Listener path: serve the callback, wait for the code, exchange it.
    ///
    /// The server, and with it the ready route, stays up until the token is
    /// persisted, so a follower never sees the listener gone mid-exchange.
    async fn lead(
        &mut self,
        listener: tokio::net::TcpListener,
        params: &PkceParams,
        authorize_url: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let (server, mut events) = CallbackServer::start(listener, &params.state, authorize_url);

        self.enter(LoginPhase::AwaitingRedirect);
        self.present(authorize_url);

        let received = tokio::select! {
            Some(code) = events.codes.recv() => Ok(code),
            Some(err) = events.errors.recv() => Err(err),
            _ = tokio::time::sleep(self.manager.config().login_timeout) => Err(AuthError::Timeout),
        };
        let persisted = match received {
            Ok(code) => self.exchange_and_persist(&code, params).await,
            Err(e) => Err(e),
        };
        server.shutdown().await;
        persisted?;

        self.enter(LoginPhase::Authenticated);
        tracing::info!("OAuth login complete");

        let service_token_error = match self.manager.get_service_token().await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Failed to fetch coding token after login: {}", e);
                Some(e)
            }
        };
        Ok(LoginOutcome::Authenticated {
            service_token_error,
        })
    }

    async fn exchange_and_persist(
        &mut self,
        code: &str,
        params: &PkceParams,
    ) -> Result<(), AuthError> {
        self.enter(LoginPhase::ExchangingCode);
        let primary = oauth::exchange_code(
            self.manager.oauth_client(),
            self.manager.config(),
            code,
            &params.code_verifier,
        )
        .await?;

        let _guard = self.manager.lock.lock().await;
        self.manager.store().save(&Token {
            oauth: Some(primary),
            coding: None,
        })?;
        Ok(())
    }

    /// Follower path: another invocation owns the callback port. Open the
    /// page it is waiting on and watch the token store for its result.
    async fn follow(&mut self, own_authorize_url: &str) -> Result<LoginOutcome, AuthError> {
        self.enter(LoginPhase::JoiningExistingListener);
        let config = self.manager.config().clone();

        let probe_client = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.service_timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("HTTP client: {}", e)))?;

        let ready = probe_listener(&probe_client, &config.ready_url()).await;
        let url = match ready.as_ref().and_then(|r| r.authorize_url.as_deref()) {
            Some(url) => {
                tracing::info!("Another login is in progress, joining it");
                url.to_string()
            }
            None => {
                tracing::warn!(
                    "Port {} is in use but no login listener answered; waiting for a token anyway",
                    config.redirect_port
                );
                own_authorize_url.to_string()
            }
        };
        self.present(&url);

        let deadline = Instant::now() + config.login_timeout;
        let mut listener_seen = ready.is_some();
        let mut last_probe = Instant::now();
        let mut ticker = tokio::time::interval(config.poll_interval);

        loop {
            ticker.tick().await;

            if self.manager.is_authenticated() {
                tracing::info!("Login completed by the other invocation");
                return Ok(LoginOutcome::Joined);
            }
            if Instant::now() >= deadline {
                return Err(AuthError::Timeout);
            }

            if last_probe.elapsed() >= config.liveness_interval {
                last_probe = Instant::now();
                let alive = probe_listener(&probe_client, &config.ready_url())
                    .await
                    .is_some();
                if alive {
                    listener_seen = true;
                } else if listener_seen {
                    // The listener saves before it shuts down, so check once more
                    if self.manager.is_authenticated() {
                        return Ok(LoginOutcome::Joined);
                    }
                    return Err(AuthError::CallbackServer(
                        "the other login ended without signing in; please try again".to_string(),
                    ));
                }
            }
        }
    }

    fn present(&self, url: &str) {
        println!("Opening browser for authentication...");
        println!();
        println!("If the browser doesn't open automatically, visit:");
        println!("{}", url);
        println!();

        if let Err(e) = self.browser.open(url) {
            tracing::debug!("Could not open browser: {}", e);
        }
    }
}

/// Ask the process holding the redirect port whether it is a login listener.
async fn probe_listener(client: &reqwest::Client, ready_url: &str) -> Option<ReadyResponse> {
    let resp = client.get(ready_url).send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let ready: ReadyResponse = resp.json().await.ok()?;
    (ready.status == READY_STATUS).then_some(ready)
}
