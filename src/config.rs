use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use regex::Regex;

use crate::client::RetryPolicy;

pub const DEFAULT_API_ENDPOINT: &str = "http://localhost:8000";
pub const DEFAULT_AUTH_URL: &str = "http://localhost:3001";
pub const API_META_NAME: &str = "rag-chatbot-api";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub api_endpoint: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_jitter: bool,
    pub request_timeout_secs: u64,
    pub history_limit: u32,
    pub auth_url: String,
    pub auth_timeout_ms: u64,
    pub session_poll_secs: u64,
    pub storage_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let page_marker = match env::var("SITE_INDEX_HTML") {
            Ok(path) => read_page_marker(&path),
            Err(_) => None,
        };
        let env_default = env::var("API_ENDPOINT").ok();
        let api_endpoint = resolve_api_endpoint(page_marker.as_deref(), env_default.as_deref());
        info!("Using RAG backend at: {}", api_endpoint);

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 8080)?,
            api_endpoint,
            max_retries: env_or("CHAT_MAX_RETRIES", 3)?,
            retry_delay_ms: env_or("CHAT_RETRY_DELAY_MS", 1000)?,
            retry_jitter: env_or("CHAT_RETRY_JITTER", false)?,
            request_timeout_secs: env_or("CHAT_REQUEST_TIMEOUT_SECS", 60)?,
            history_limit: env_or("CHAT_HISTORY_LIMIT", 50)?,
            auth_url: env::var("AUTH_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
            auth_timeout_ms: env_or("AUTH_TIMEOUT_MS", 5000)?,
            session_poll_secs: env_or("AUTH_POLL_INTERVAL_SECS", 3)?,
            storage_path: env::var("CHAT_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_storage_path()),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
            .with_jitter(self.retry_jitter)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_secs(self.session_poll_secs.max(1))
    }
}

// Unset → default; set but unparseable → error naming the variable
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {name}: {raw:?}")),
        _ => Ok(default),
    }
}

fn default_storage_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("robotics-book-assistant")
        .join("storage.json")
}

/// Page marker, then environment default, then the built-in endpoint. Blank
/// tiers are skipped and trailing slashes dropped.
pub fn resolve_api_endpoint(page_marker: Option<&str>, env_default: Option<&str>) -> String {
    [page_marker, env_default]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(DEFAULT_API_ENDPOINT)
        .trim_end_matches('/')
        .to_string()
}

/// Reads `<meta name="rag-chatbot-api" content="...">` from a rendered page.
/// The attribute value is entity-decoded.
pub fn page_marker_from_html(html: &str) -> Option<String> {
    let tag = Regex::new(r#"(?is)<meta\b[^>]*>"#).ok()?;
    let name = Regex::new(&format!(r#"(?i)\bname\s*=\s*["']{API_META_NAME}["']"#)).ok()?;
    let content = Regex::new(r#"(?i)\bcontent\s*=\s*["']([^"']*)["']"#).ok()?;

    let marker = tag
        .find_iter(html)
        .map(|meta| meta.as_str())
        .filter(|meta| name.is_match(meta))
        .find_map(|meta| content.captures(meta))
        .map(|captures| decode_entities(&captures[1]).trim().to_string())
        .filter(|value| !value.is_empty());
    marker
}

// Named entities a template engine emits, plus decimal and hex references.
// Anything unrecognised is left as written.
fn decode_entities(raw: &str) -> String {
    let Ok(entity) = Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);") else {
        return raw.to_string();
    };

    entity
        .replace_all(raw, |captures: &regex::Captures| {
            let body = &captures[1];
            let decoded = match body {
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "lt" => Some('<'),
                "gt" => Some('>'),
                _ if body.starts_with("#x") || body.starts_with("#X") => {
                    u32::from_str_radix(&body[2..], 16).ok().and_then(char::from_u32)
                }
                _ if body.starts_with('#') => body[1..].parse().ok().and_then(char::from_u32),
                _ => None,
            };
            decoded.map_or_else(|| captures[0].to_string(), String::from)
        })
        .into_owned()
}

fn read_page_marker(path: &str) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(html) => page_marker_from_html(&html),
        Err(err) => {
            warn!("Cannot read site index {}: {}", path, err);
            None
        }
    }
}
