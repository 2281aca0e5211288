use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::client::{
    ChatClient, ChatClientError, HistoryMessage, QueryContext, QueryRequest, Role,
    DEFAULT_HISTORY_LIMIT, MAX_RETRY_AFTER_SECS,
};
use crate::session::SessionIdStore;

const MIN_SELECTION_CHARS: usize = 10;
const MAX_SELECTION_CHARS: usize = 500;

/// One entry in the transcript; insertion order is chronological.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<QueryContext>>,
    pub timestamp: String,
}

impl ChatMessage {
    pub fn user(content: &str, selected_text: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            selected_text,
            sources: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn assistant(content: String, sources: Vec<QueryContext>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            selected_text: None,
            sources: Some(sources),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Failed exchanges get a placeholder without sources.
    pub fn failure(error_message: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: format!("❌ {error_message}"),
            selected_text: None,
            sources: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl From<HistoryMessage> for ChatMessage {
    fn from(message: HistoryMessage) -> Self {
        Self {
            role: message.role,
            content: message.content,
            selected_text: message.selected_text,
            sources: message.sources,
            timestamp: message.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WidgetSnapshot {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub error: Option<String>,
    pub retry_in_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum Banner {
    Error(String),
    RateLimited { message: String, until: Instant },
}

/// Conversation state for one reader: the transcript, the session id and the
/// error banner. Callers keep at most one `ask` in flight.
pub struct ChatWidget {
    client: Arc<ChatClient>,
    sessions: SessionIdStore,
    session_id: String,
    messages: Vec<ChatMessage>,
    banner: Option<Banner>,
    history_limit: u32,
    initialized: bool,
}

impl ChatWidget {
    pub fn new(client: Arc<ChatClient>, sessions: SessionIdStore) -> Self {
        Self {
            client,
            sessions,
            session_id: String::new(),
            messages: Vec::new(),
            banner: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            initialized: false,
        }
    }

    pub fn with_history_limit(mut self, history_limit: u32) -> Self {
        self.history_limit = history_limit;
        self
    }

    /// Picks up the stored session and its history. History failures leave an
    /// empty transcript.
    pub async fn initialize(&mut self) {
        self.initialized = true;
        self.session_id = self.sessions.get_session_id();
        if self.session_id.is_empty() {
            warn!("No session storage, conversation history disabled");
            return;
        }

        info!("Initializing session {}", self.session_id);
        match self
            .client
            .get_history(&self.session_id, self.history_limit)
            .await
        {
            Ok(history) => {
                info!("Loaded {} history messages", history.messages.len());
                self.messages = history.messages.into_iter().map(ChatMessage::from).collect();
            }
            Err(err) => error!("Failed to load conversation history: {}", err),
        }
    }

    /// Runs `initialize` once per sign-in; later calls keep the live transcript.
    pub async fn ensure_initialized(&mut self) {
        if !self.initialized {
            self.initialize().await;
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Sends a question and appends both sides of the exchange. Returns the
    /// assistant entry (answer or failure placeholder); blank queries are ignored.
    pub async fn ask(
        &mut self,
        query: &str,
        selected_text: Option<String>,
    ) -> Option<&ChatMessage> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        self.banner = None;
        self.messages.push(ChatMessage::user(query, selected_text.clone()));

        let mut request = QueryRequest::new(query).with_session_id(&self.session_id);
        request.selected_text = selected_text;

        let reply = match self.client.submit_query(&request).await {
            Ok(response) => {
                if !response.session_id.is_empty() && response.session_id != self.session_id {
                    info!("Backend assigned session {}", response.session_id);
                    self.session_id = response.session_id;
                }
                ChatMessage::assistant(response.answer, response.sources)
            }
            Err(err) => {
                let message = self.report(&err);
                ChatMessage::failure(&message)
            }
        };

        self.messages.push(reply);
        self.messages.last()
    }

    /// Asks about a highlighted passage of more than 10 and fewer than 500 characters.
    pub async fn ask_about_selection(&mut self, text: &str) -> Option<&ChatMessage> {
        let text = text.trim();
        let length = text.chars().count();
        if length <= MIN_SELECTION_CHARS || length >= MAX_SELECTION_CHARS {
            return None;
        }

        let query = format!("Explain this: \"{text}\"");
        self.ask(&query, Some(text.to_string())).await
    }

    /// Deletes the backend history and starts over with a new session id.
    pub async fn clear_history(&mut self) -> Result<(), ChatClientError> {
        self.banner = None;

        if !self.session_id.is_empty() {
            if let Err(err) = self.client.clear_history(&self.session_id).await {
                error!("Failed to clear conversation history: {}", err);
                self.banner = Some(Banner::Error(format!("Failed to clear history: {err}")));
                return Err(err);
            }
        }

        self.messages.clear();
        self.sessions.clear_session_id();
        self.session_id = self.sessions.get_session_id();
        Ok(())
    }

    /// Logout discards the transcript and the session id.
    pub fn handle_signed_out(&mut self) {
        info!("User signed out, destroying chat session");
        self.messages.clear();
        self.banner = None;
        self.sessions.clear_session_id();
        self.session_id.clear();
        self.initialized = false;
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Current banner text. A rate-limit banner disappears once its countdown ends.
    pub fn error(&self) -> Option<&str> {
        match &self.banner {
            Some(Banner::Error(message)) => Some(message),
            Some(Banner::RateLimited { message, until }) if Instant::now() < *until => {
                Some(message)
            }
            _ => None,
        }
    }

    /// Whole seconds left on the rate-limit countdown, rounded up.
    pub fn retry_in_secs(&self) -> u64 {
        match &self.banner {
            Some(Banner::RateLimited { until, .. }) => {
                let remaining = until.saturating_duration_since(Instant::now());
                remaining.as_millis().div_ceil(1000) as u64
            }
            _ => 0,
        }
    }

    pub fn snapshot(&self) -> WidgetSnapshot {
        WidgetSnapshot {
            session_id: self.session_id.clone(),
            messages: self.messages.clone(),
            error: self.error().map(str::to_string),
            retry_in_secs: self.retry_in_secs(),
        }
    }

    fn report(&mut self, err: &ChatClientError) -> String {
        warn!("Query failed: {}", err);

        if let Some(retry_after) = err.retry_after() {
            let secs = retry_after.as_secs();
            let message =
                format!("Rate limit exceeded. Please wait {secs} seconds and try again.");
            let now = Instant::now();
            let until = now
                .checked_add(retry_after)
                .or_else(|| now.checked_add(Duration::from_secs(MAX_RETRY_AFTER_SECS)))
                .unwrap_or(now);
            self.banner = Some(Banner::RateLimited {
                message: message.clone(),
                until,
            });
            return message;
        }

        let message = format!("Error: {err}");
        self.banner = Some(Banner::Error(message.clone()));
        message
    }
}
