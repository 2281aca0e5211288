//! Client for the RAG backend: `/query`, `/health` and `/history/{id}`.

pub mod error;
pub mod models;
pub mod retry;
pub mod transport;

use std::sync::Arc;

use log::{debug, info, warn};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

pub use error::{classify, ChatClientError, DEFAULT_RETRY_AFTER_SECS, MAX_RETRY_AFTER_SECS};
pub use models::{
    HealthResponse, HistoryMessage, HistoryResponse, QueryContext, QueryRequest, QueryResponse,
    Role, ServiceStatus,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

pub struct ChatClient {
    api_endpoint: String,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(api_endpoint: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn api_endpoint(&self) -> &str {
        &self.api_endpoint
    }

    /// Submits a question, retrying rate-limited and transient failures with
    /// exponential backoff. Client errors are returned after a single call.
    pub async fn submit_query(
        &self,
        request: &QueryRequest,
    ) -> Result<QueryResponse, ChatClientError> {
        if request.query.trim().is_empty() {
            return Err(ChatClientError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }

        let url = format!("{}/query", self.api_endpoint);
        let body = serde_json::to_value(request)
            .map_err(|err| ChatClientError::InvalidRequest(err.to_string()))?;
        let max_attempts = self.retry.max_attempts();

        debug!(
            "Submitting query to {}: {}",
            url,
            request.query.chars().take(50).collect::<String>()
        );

        let mut attempt = 0;
        loop {
            info!("Attempt {}/{}", attempt + 1, max_attempts);

            let error = match self.send_query(&url, &body).await {
                Ok(response) => {
                    info!(
                        "Query answered: {} characters, {} sources, session {}",
                        response.answer.len(),
                        response.sources.len(),
                        response.session_id
                    );
                    return Ok(response);
                }
                Err(err) => err,
            };

            match self.retry.decide(attempt, &error) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt + 1,
                        max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::Abort => return Err(error),
                RetryDecision::Exhausted => {
                    return Err(ChatClientError::Exhausted {
                        attempts: attempt + 1,
                        last: Box::new(error),
                    })
                }
            }
        }
    }

    async fn send_query(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<QueryResponse, ChatClientError> {
        let response = self
            .transport
            .send(HttpRequest::post(url, body.clone()))
            .await
            .map_err(|err| ChatClientError::network("Query request failed", &err))?;

        debug!("Query response status: {}", response.status);
        parse_success(&response)
    }

    /// Single attempt; health checks are never retried.
    pub async fn get_health(&self) -> Result<HealthResponse, ChatClientError> {
        let url = format!("{}/health", self.api_endpoint);
        let response = self
            .transport
            .send(HttpRequest::get(url))
            .await
            .map_err(|err| ChatClientError::network("Health check failed", &err))?;

        parse_success(&response)
    }

    /// A 404 means the session has no history yet.
    pub async fn get_history(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<HistoryResponse, ChatClientError> {
        let mut url = self.history_url(session_id)?;
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        let response = self
            .transport
            .send(HttpRequest::get(url.as_str()))
            .await
            .map_err(|err| ChatClientError::network("Failed to get history", &err))?;

        if response.status == StatusCode::NOT_FOUND {
            debug!("No history for session {}", session_id);
            return Ok(HistoryResponse::empty(session_id));
        }

        parse_success(&response)
    }

    /// Idempotent: 404 and 204 both count as cleared.
    pub async fn clear_history(&self, session_id: &str) -> Result<(), ChatClientError> {
        let url = self.history_url(session_id)?;
        let response = self
            .transport
            .send(HttpRequest::delete(url.as_str()))
            .await
            .map_err(|err| ChatClientError::network("Failed to clear history", &err))?;

        if response.status == StatusCode::NOT_FOUND || response.status.is_success() {
            info!("History cleared for session {}", session_id);
            return Ok(());
        }

        Err(classify(&response))
    }

    // `/history/{session_id}` with the id percent-encoded as one path segment
    fn history_url(&self, session_id: &str) -> Result<Url, ChatClientError> {
        let invalid = || {
            ChatClientError::InvalidRequest(format!("bad API endpoint: {}", self.api_endpoint))
        };
        let mut url = Url::parse(&self.api_endpoint).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push("history")
            .push(session_id);
        Ok(url)
    }
}

fn parse_success<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ChatClientError> {
    if !response.status.is_success() {
        return Err(classify(response));
    }

    response
        .json()
        .map_err(|err| ChatClientError::malformed_body(&err))
}
