use std::sync::Arc;

use actix_files as fs;
use actix_web::{web::Data, App, HttpServer};
use dotenv::dotenv;
use log::{error, info};
use tera::Tera;
use tokio::sync::Mutex;

use robotics_book_assistant::auth::{AuthClient, SessionWatcher};
use robotics_book_assistant::client::{ChatClient, ReqwestTransport};
use robotics_book_assistant::config::AppConfig;
use robotics_book_assistant::session::{FileStore, SessionIdStore};
use robotics_book_assistant::web::{self, routes, AppState};
use robotics_book_assistant::widget::ChatWidget;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting robotics book assistant");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Backend and auth server share one cookie-carrying HTTP stack
    let transport = match ReqwestTransport::new(Some(config.request_timeout())) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let client = Arc::new(
        ChatClient::new(&config.api_endpoint, transport.clone())
            .with_retry_policy(config.retry_policy()),
    );
    let auth =
        Arc::new(AuthClient::new(&config.auth_url, transport).with_timeout(config.auth_timeout()));
    info!("Using auth server at: {}", auth.base_url());

    info!("Session storage at: {}", config.storage_path.display());
    let sessions = SessionIdStore::new(Arc::new(FileStore::new(config.storage_path.clone())));
    let widget = ChatWidget::new(client.clone(), sessions).with_history_limit(config.history_limit);

    let watcher = SessionWatcher::spawn(auth.clone(), config.session_poll_interval());

    // Initialize template engine
    let mut tera = match Tera::new("templates/**/*") {
        Ok(t) => t,
        Err(e) => {
            error!("Template parsing error: {}", e);
            std::process::exit(1);
        }
    };
    tera.autoescape_on(vec![".html"]);

    let bind = (config.host.clone(), config.port);

    // Create app state
    let app_state = Data::new(AppState {
        tera,
        config,
        client,
        auth,
        watcher,
        widget: Mutex::new(widget),
    });
    web::follow_auth_changes(app_state.clone());

    info!("Listening on http://{}:{}", bind.0, bind.1);

    // Start web server
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(routes::configure)
            .service(fs::Files::new("/static", "./static"))
    })
    .bind(bind)?
    .run()
    .await
}
