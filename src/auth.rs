//! Client for the external authentication server (`/api/auth/*`).
//!
//! "Not signed in" is `None`, never an error. Every call is bounded by a
//! timeout because the auth server may be asleep on a free hosting tier.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::{HttpRequest, HttpResponse, Transport};

pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

impl AuthUser {
    /// Name if set, else the local part of the email.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.email.split('@').next().unwrap_or(&self.email),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub user_id: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub user: AuthUser,
    pub session: SessionInfo,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SocialProvider {
    Google,
    Github,
}

impl SocialProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            SocialProvider::Google => "google",
            SocialProvider::Github => "github",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthError {
    #[error(
        "Auth server timeout after {}ms - server may be sleeping or unreachable",
        .0.as_millis()
    )]
    Timeout(Duration),

    #[error("{0}")]
    Invalid(String),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Auth request failed: {0}")]
    Transport(String),

    #[error("Malformed auth response: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: AuthUser,
}

#[derive(Deserialize)]
struct RedirectEnvelope {
    url: String,
}

#[derive(Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    message: Option<String>,
}

pub struct AuthClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl AuthClient {
    pub fn new(base_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn sign_in_email(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::Invalid(
                "Email and password are required".to_string(),
            ));
        }

        let body = json!({ "email": email, "password": password });
        let envelope: UserEnvelope = self.post("/sign-in/email", body).await?;
        info!("Signed in as {}", envelope.user.email);
        Ok(envelope.user)
    }

    pub async fn sign_up_email(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<AuthUser, AuthError> {
        if email.trim().is_empty() || password.is_empty() || name.trim().is_empty() {
            return Err(AuthError::Invalid("All fields are required".to_string()));
        }

        let body = json!({ "email": email, "password": password, "name": name });
        let envelope: UserEnvelope = self.post("/sign-up/email", body).await?;
        info!("Signed up {}", envelope.user.email);
        Ok(envelope.user)
    }

    /// Returns the provider's authorization URL to redirect the user to.
    pub async fn sign_in_social(
        &self,
        provider: SocialProvider,
        callback_url: Option<&str>,
    ) -> Result<String, AuthError> {
        let mut body = json!({ "provider": provider.as_str() });
        if let Some(callback_url) = callback_url {
            body["callbackURL"] = Value::String(callback_url.to_string());
        }

        let envelope: RedirectEnvelope = self.post("/sign-in/social", body).await?;
        Ok(envelope.url)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _: Value = self.post("/sign-out", json!({})).await?;
        info!("Signed out");
        Ok(())
    }

    pub async fn get_session(&self) -> Result<Option<AuthSession>, AuthError> {
        let url = format!("{}/api/auth/get-session", self.base_url);
        let response = self.send(HttpRequest::get(url)).await?;

        if response.status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let session: Option<AuthSession> = parse(&response)?;
        debug!(
            "Session check: {}",
            session
                .as_ref()
                .map(|session| session.user.email.as_str())
                .unwrap_or("anonymous")
        );
        Ok(session)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current_user().await.is_some()
    }

    pub async fn current_user(&self) -> Option<AuthUser> {
        match self.get_session().await {
            Ok(session) => session.map(|session| session.user),
            Err(err) => {
                warn!("Auth check failed: {}", err);
                None
            }
        }
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, AuthError> {
        let url = format!("{}/api/auth{}", self.base_url, path);
        let response = self.send(HttpRequest::post(url, body)).await?;
        parse(&response)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        with_timeout(self.timeout, self.transport.send(request))
            .await?
            .map_err(|err| AuthError::Transport(err.to_string()))
    }
}

async fn with_timeout<T>(limit: Duration, future: impl Future<Output = T>) -> Result<T, AuthError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| AuthError::Timeout(limit))
}

fn parse<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, AuthError> {
    if !response.status.is_success() {
        let message = response
            .json::<AuthErrorBody>()
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| format!("HTTP {}", response.status.as_u16()));
        return Err(AuthError::Rejected {
            status: response.status.as_u16(),
            message,
        });
    }

    response
        .json()
        .map_err(|err| AuthError::Malformed(err.to_string()))
}

/// Observes the signed-in user by polling the auth server.
///
/// Subscribers get a `watch` receiver that changes only when the user does.
/// A poll that overlaps an explicit `publish` is discarded. Polling stops
/// when the watcher is dropped.
pub struct SessionWatcher {
    sender: Arc<watch::Sender<Option<AuthUser>>>,
    generation: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl SessionWatcher {
    pub fn spawn(auth: Arc<AuthClient>, interval: Duration) -> Self {
        let (sender, _) = watch::channel(None);
        let sender = Arc::new(sender);
        let generation = Arc::new(AtomicU64::new(0));
        let publisher = sender.clone();
        let published = generation.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let seen = published.load(Ordering::SeqCst);
                let user = auth.current_user().await;
                if published.load(Ordering::SeqCst) == seen {
                    publish(&publisher, user);
                } else {
                    debug!("Discarding session poll that raced a sign in/out");
                }
            }
        });

        Self {
            sender,
            generation,
            task,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.sender.borrow().clone()
    }

    /// Records a change the host already knows about (sign in/out) without
    /// waiting for the next poll.
    pub fn publish(&self, user: Option<AuthUser>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        publish(&self.sender, user);
    }
}

impl Drop for SessionWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn publish(sender: &watch::Sender<Option<AuthUser>>, user: Option<AuthUser>) {
    sender.send_if_modified(|current| {
        if *current == user {
            return false;
        }
        match &user {
            Some(user) => info!("Auth session active for {}", user.email),
            None => info!("Auth session ended"),
        }
        *current = user;
        true
    });
}
