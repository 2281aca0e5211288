pub mod handlers;
pub mod models;
pub mod routes;

use std::sync::Arc;

use actix_web::web::Data;
use log::info;
use tera::Tera;
use tokio::sync::Mutex;

use crate::auth::{AuthClient, SessionWatcher};
use crate::client::ChatClient;
use crate::config::AppConfig;
use crate::widget::ChatWidget;

// App state structure
pub struct AppState {
    pub tera: Tera,
    pub config: AppConfig,
    pub client: Arc<ChatClient>,
    pub auth: Arc<AuthClient>,
    pub watcher: SessionWatcher,
    // one conversation, one request in flight at a time
    pub widget: Mutex<ChatWidget>,
}

/// Follows the signed-in user: a sign-in (re)loads the conversation, a
/// sign-out destroys it.
pub fn follow_auth_changes(state: Data<AppState>) {
    let mut changes = state.watcher.subscribe();

    actix_web::rt::spawn(async move {
        while changes.changed().await.is_ok() {
            // the value may have moved on while waiting for the lock
            let mut widget = state.widget.lock().await;
            let signed_in = state.watcher.current().is_some();

            match (signed_in, widget.is_initialized()) {
                (true, false) => {
                    info!("User signed in, loading conversation");
                    widget.ensure_initialized().await;
                }
                (false, true) => widget.handle_signed_out(),
                _ => {}
            }
        }
    });
}
