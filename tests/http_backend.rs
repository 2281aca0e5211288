use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::{test, web, App, HttpResponse, HttpServer};
use serde_json::{json, Value};

use robotics_book_assistant::auth::{AuthClient, AuthUser, SessionWatcher};
use robotics_book_assistant::client::{
    ChatClient, ChatClientError, QueryRequest, ReqwestTransport, RetryPolicy,
};
use robotics_book_assistant::config::{page_marker_from_html, AppConfig};
use robotics_book_assistant::session::{MemoryStore, SessionIdStore};
use robotics_book_assistant::web::{follow_auth_changes, routes, AppState};
use robotics_book_assistant::widget::ChatWidget;

// Stand-in for both the RAG backend and the auth server
#[derive(Default)]
struct MockBackend {
    query_statuses: Mutex<VecDeque<u16>>,
    query_calls: AtomicUsize,
    signed_in: AtomicBool,
}

fn answer() -> Value {
    json!({
        "answer": "A PID controller corrects error with proportional, integral and derivative terms.",
        "sources": [{
            "chunk_text": "PID control ...",
            "chapter_number": 4,
            "chapter_title": "Control Systems",
            "similarity_score": 0.93,
            "position": 1
        }],
        "session_id": "abc",
        "message_id": "m1"
    })
}

fn user() -> Value {
    json!({ "id": "u1", "email": "ada@example.com", "name": "Ada", "emailVerified": true })
}

async fn query(backend: web::Data<MockBackend>) -> HttpResponse {
    backend.query_calls.fetch_add(1, Ordering::SeqCst);
    let status = backend.query_statuses.lock().unwrap().pop_front().unwrap_or(200);
    match status {
        200 => HttpResponse::Ok().json(answer()),
        429 => HttpResponse::TooManyRequests()
            .insert_header(("Retry-After", "5"))
            .finish(),
        400 => HttpResponse::BadRequest().json(json!({ "detail": "Query is too long" })),
        _ => HttpResponse::InternalServerError().finish(),
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "services": { "qdrant": "connected", "llm": "connected", "database": "connected" }
    }))
}

async fn get_history() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "detail": "Session not found" }))
}

async fn delete_history() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

async fn get_session(backend: web::Data<MockBackend>) -> HttpResponse {
    if backend.signed_in.load(Ordering::SeqCst) {
        HttpResponse::Ok().json(json!({
            "user": user(),
            "session": { "id": "s1", "userId": "u1", "expiresAt": "2030-01-01T00:00:00.000Z" }
        }))
    } else {
        HttpResponse::Ok().json(Value::Null)
    }
}

async fn sign_in(backend: web::Data<MockBackend>) -> HttpResponse {
    backend.signed_in.store(true, Ordering::SeqCst);
    HttpResponse::Ok().json(json!({ "redirect": false, "token": "t", "user": user() }))
}

async fn sign_out(backend: web::Data<MockBackend>) -> HttpResponse {
    backend.signed_in.store(false, Ordering::SeqCst);
    HttpResponse::Ok().json(json!({ "success": true }))
}

fn start_backend(statuses: Vec<u16>) -> (SocketAddr, web::Data<MockBackend>) {
    let backend = web::Data::new(MockBackend {
        query_statuses: Mutex::new(statuses.into()),
        ..Default::default()
    });
    let shared = backend.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(shared.clone())
            .route("/query", web::post().to(query))
            .route("/health", web::get().to(health))
            .route("/history/{session_id}", web::get().to(get_history))
            .route("/history/{session_id}", web::delete().to(delete_history))
            .route("/api/auth/get-session", web::get().to(get_session))
            .route("/api/auth/sign-in/email", web::post().to(sign_in))
            .route("/api/auth/sign-out", web::post().to(sign_out))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .expect("bind mock backend");

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    (addr, backend)
}

fn chat_client(addr: SocketAddr) -> ChatClient {
    let transport = Arc::new(ReqwestTransport::new(Some(Duration::from_secs(5))).unwrap());
    ChatClient::new(&format!("http://{addr}/"), transport)
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(10)))
}

#[actix_web::test]
async fn test_query_round_trip_over_http() {
    let (addr, backend) = start_backend(vec![200]);

    let response = chat_client(addr)
        .submit_query(&QueryRequest::new("What is a PID controller?"))
        .await
        .unwrap();

    assert_eq!(response.session_id, "abc");
    assert_eq!(response.sources[0].chapter_title, "Control Systems");
    assert_eq!(backend.query_calls.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn test_three_rate_limits_over_http() {
    let (addr, backend) = start_backend(vec![429, 429, 429]);

    let error = chat_client(addr)
        .submit_query(&QueryRequest::new("What is a PID controller?"))
        .await
        .unwrap_err();

    assert_eq!(backend.query_calls.load(Ordering::SeqCst), 3);
    assert!(matches!(error, ChatClientError::Exhausted { attempts: 3, .. }));
    assert_eq!(error.retry_after(), Some(Duration::from_secs(5)));
}

#[actix_web::test]
async fn test_server_error_then_success_over_http() {
    let (addr, backend) = start_backend(vec![500, 200]);

    let response = chat_client(addr)
        .submit_query(&QueryRequest::new("What is SLAM?"))
        .await
        .unwrap();

    assert_eq!(response.message_id, "m1");
    assert_eq!(backend.query_calls.load(Ordering::SeqCst), 2);
}

#[actix_web::test]
async fn test_client_error_over_http_is_single_call() {
    let (addr, backend) = start_backend(vec![400, 200]);

    let error = chat_client(addr)
        .submit_query(&QueryRequest::new("What is SLAM?"))
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "Query is too long");
    assert_eq!(error.status_code(), Some(400));
    assert_eq!(backend.query_calls.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn test_history_and_health_over_http() {
    let (addr, _backend) = start_backend(vec![]);
    let client = chat_client(addr);

    let history = client.get_history("abc", 50).await.unwrap();
    assert_eq!(history.session_id, "abc");
    assert!(history.messages.is_empty());

    client.clear_history("abc").await.unwrap();

    let health = client.get_health().await.unwrap();
    assert_eq!(health.services.qdrant, "connected");
}

#[actix_web::test]
async fn test_unreachable_backend_is_transient() {
    // nothing listens on port 9 locally
    let client = chat_client("127.0.0.1:9".parse().unwrap())
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)));

    let error = client
        .submit_query(&QueryRequest::new("What is SLAM?"))
        .await
        .unwrap_err();

    assert!(matches!(error, ChatClientError::Exhausted { attempts: 2, .. }));
    assert_eq!(error.status_code(), None);
}

fn host_state(addr: SocketAddr) -> web::Data<AppState> {
    let transport = Arc::new(ReqwestTransport::new(Some(Duration::from_secs(5))).unwrap());
    let base = format!("http://{addr}");
    let client = Arc::new(
        ChatClient::new(&base, transport.clone())
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(10))),
    );
    let auth = Arc::new(AuthClient::new(&base, transport));
    let watcher = SessionWatcher::spawn(auth.clone(), Duration::from_secs(60));
    let widget = ChatWidget::new(
        client.clone(),
        SessionIdStore::new(Arc::new(MemoryStore::new())),
    );

    let mut tera = tera::Tera::default();
    tera.add_raw_template("index.html", include_str!("../templates/index.html"))
        .unwrap();
    tera.autoescape_on(vec![".html"]);

    let config = AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        api_endpoint: base,
        max_retries: 3,
        retry_delay_ms: 10,
        retry_jitter: false,
        request_timeout_secs: 5,
        history_limit: 50,
        auth_url: format!("http://{addr}"),
        auth_timeout_ms: 5000,
        session_poll_secs: 60,
        storage_path: std::env::temp_dir().join("unused-storage.json"),
    };

    web::Data::new(AppState {
        tera,
        config,
        client,
        auth,
        watcher,
        widget: tokio::sync::Mutex::new(widget),
    })
}

#[actix_web::test]
async fn test_host_requires_sign_in_then_answers() {
    let (addr, _backend) = start_backend(vec![200]);
    let state = host_state(addr);
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(json!({ "query": "What is a PID controller?" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/auth/sign-in")
        .set_json(json!({ "email": "ada@example.com", "password": "hunter2" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["display_name"], "Ada");

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(json!({ "query": "What is a PID controller?" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["reply"]["role"], "assistant");
    assert_eq!(body["reply"]["sources"][0]["chapter_number"], 4);
    assert_eq!(body["state"]["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["state"]["session_id"], "abc");

    let req = test::TestRequest::get().uri("/api/chat").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["signed_in"], true);
    assert_eq!(body["retry_in_secs"], 0);
}

#[actix_web::test]
async fn test_host_index_embeds_endpoint_marker() {
    let (addr, _backend) = start_backend(vec![]);
    let state = host_state(addr);
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let html = String::from_utf8(body.to_vec()).unwrap();

    assert_eq!(page_marker_from_html(&html), Some(format!("http://{addr}")));

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn test_host_selection_bounds_and_sign_out() {
    let (addr, backend) = start_backend(vec![]);
    backend.signed_in.store(true, Ordering::SeqCst);
    let state = host_state(addr);
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/auth/session").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["user"]["email"], "ada@example.com");

    let req = test::TestRequest::post()
        .uri("/api/chat/selection")
        .set_json(json!({ "text": "short" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post().uri("/api/auth/sign-out").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(state.watcher.current().is_none());
}

#[actix_web::test]
async fn test_host_sign_out_discards_conversation() {
    let (addr, backend) = start_backend(vec![200]);
    let state = host_state(addr);
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/chat").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "signed_in": false }));

    let req = test::TestRequest::delete().uri("/api/chat/history").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/auth/sign-in")
        .set_json(json!({ "email": "ada@example.com", "password": "hunter2" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(state.widget.lock().await.is_initialized());

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(json!({ "query": "x".repeat(2001) }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(backend.query_calls.load(Ordering::SeqCst), 0);

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(json!({ "query": "What is a PID controller?" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(state.widget.lock().await.messages().len(), 2);

    let req = test::TestRequest::post().uri("/api/auth/sign-out").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let widget = state.widget.lock().await;
    assert!(widget.messages().is_empty());
    assert_eq!(widget.session_id(), "");
}

async fn wait_until_initialized(state: &web::Data<AppState>, initialized: bool) {
    for _ in 0..200 {
        if state.widget.lock().await.is_initialized() == initialized {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("widget never reached initialized = {initialized}");
}

#[actix_web::test]
async fn test_watched_session_changes_drive_widget() {
    let (addr, _backend) = start_backend(vec![]);
    let state = host_state(addr);
    follow_auth_changes(state.clone());
    let user: AuthUser = serde_json::from_value(user()).unwrap();

    // as if the poll noticed a sign-in made elsewhere (social callback)
    state.watcher.publish(Some(user));
    wait_until_initialized(&state, true).await;
    assert!(!state.widget.lock().await.session_id().is_empty());

    state.watcher.publish(None);
    wait_until_initialized(&state, false).await;
    let widget = state.widget.lock().await;
    assert!(widget.messages().is_empty());
    assert_eq!(widget.session_id(), "");
}
