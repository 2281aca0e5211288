use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use log::{error, info};
use serde_json::json;
use tera::Context;

use crate::auth::{AuthError, AuthUser};
use crate::web::models::{
    ChatRequest, ChatResponse, ChatState, RedirectResponse, SelectionRequest, SignInRequest,
    SignUpRequest, SocialSignInRequest, UserResponse, MAX_QUERY_CHARS,
};
use crate::web::AppState;

// Index page handler
pub async fn index(data: web::Data<AppState>) -> impl Responder {
    let user = data.watcher.current();
    let mut context = Context::new();
    context.insert("api_endpoint", data.client.api_endpoint());
    context.insert("auth_url", data.auth.base_url());
    context.insert("poll_secs", &data.config.session_poll_interval().as_secs());
    context.insert("user_name", &user.as_ref().map(|user| user.display_name().to_string()));

    match data.tera.render("index.html", &context) {
        Ok(html) => HttpResponse::Ok().content_type("text/html").body(html),
        Err(e) => {
            error!("Template error: {}", e);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

// Health check endpoint
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn backend_health(data: web::Data<AppState>) -> impl Responder {
    match data.client.get_health().await {
        Ok(health) => HttpResponse::Ok().json(health),
        Err(e) => {
            error!("Backend health check failed: {}", e);
            HttpResponse::BadGateway().json(json!({ "error": e.to_string() }))
        }
    }
}

// Signed-out readers only learn that they are signed out
pub async fn chat_state(data: web::Data<AppState>) -> impl Responder {
    if data.watcher.current().is_none() {
        return HttpResponse::Ok().json(ChatState {
            signed_in: false,
            widget: None,
        });
    }

    let mut widget = data.widget.lock().await;
    widget.ensure_initialized().await;
    HttpResponse::Ok().json(ChatState {
        signed_in: true,
        widget: Some(widget.snapshot()),
    })
}

// Chat API endpoint; the assistant is only available to signed-in readers
pub async fn chat(data: web::Data<AppState>, req: web::Json<ChatRequest>) -> impl Responder {
    if data.watcher.current().is_none() {
        return sign_in_required();
    }

    let ChatRequest { query, selected_text } = req.into_inner();
    if query.trim().chars().count() > MAX_QUERY_CHARS {
        return HttpResponse::BadRequest().json(json!({
            "error": format!("Query must be at most {MAX_QUERY_CHARS} characters")
        }));
    }

    let mut widget = data.widget.lock().await;
    widget.ensure_initialized().await;

    match widget.ask(&query, selected_text).await.cloned() {
        Some(reply) => HttpResponse::Ok().json(ChatResponse {
            reply,
            state: widget.snapshot(),
        }),
        None => HttpResponse::BadRequest().json(json!({ "error": "Query must not be empty" })),
    }
}

pub async fn ask_selection(
    data: web::Data<AppState>,
    req: web::Json<SelectionRequest>,
) -> impl Responder {
    if data.watcher.current().is_none() {
        return sign_in_required();
    }

    let mut widget = data.widget.lock().await;
    widget.ensure_initialized().await;
    match widget.ask_about_selection(&req.text).await.cloned() {
        Some(reply) => HttpResponse::Ok().json(ChatResponse {
            reply,
            state: widget.snapshot(),
        }),
        None => HttpResponse::BadRequest().json(json!({
            "error": "Selection must be between 10 and 500 characters"
        })),
    }
}

pub async fn clear_history(data: web::Data<AppState>) -> impl Responder {
    if data.watcher.current().is_none() {
        return sign_in_required();
    }

    let mut widget = data.widget.lock().await;
    match widget.clear_history().await {
        Ok(()) => HttpResponse::Ok().json(widget.snapshot()),
        Err(e) => HttpResponse::BadGateway().json(json!({
            "error": format!("Failed to clear history: {}", e)
        })),
    }
}

pub async fn auth_session(data: web::Data<AppState>) -> impl Responder {
    let user = data.auth.current_user().await;
    apply_auth_change(&data, user.clone()).await;
    HttpResponse::Ok().json(UserResponse::from(user))
}

pub async fn sign_in(data: web::Data<AppState>, req: web::Json<SignInRequest>) -> impl Responder {
    match data.auth.sign_in_email(&req.email, &req.password).await {
        Ok(user) => {
            apply_auth_change(&data, Some(user.clone())).await;
            HttpResponse::Ok().json(UserResponse::from(Some(user)))
        }
        Err(e) => auth_error(e),
    }
}

pub async fn sign_up(data: web::Data<AppState>, req: web::Json<SignUpRequest>) -> impl Responder {
    match data.auth.sign_up_email(&req.email, &req.password, &req.name).await {
        Ok(user) => {
            apply_auth_change(&data, Some(user.clone())).await;
            HttpResponse::Ok().json(UserResponse::from(Some(user)))
        }
        Err(e) => auth_error(e),
    }
}

pub async fn social_sign_in(
    data: web::Data<AppState>,
    req: web::Json<SocialSignInRequest>,
) -> impl Responder {
    info!("Social sign in via {}", req.provider.as_str());
    match data
        .auth
        .sign_in_social(req.provider, req.callback_url.as_deref())
        .await
    {
        Ok(url) => HttpResponse::Ok().json(RedirectResponse { url }),
        Err(e) => auth_error(e),
    }
}

pub async fn sign_out(data: web::Data<AppState>) -> impl Responder {
    match data.auth.sign_out().await {
        Ok(()) => {
            apply_auth_change(&data, None).await;
            HttpResponse::Ok().json(UserResponse::from(None))
        }
        Err(e) => auth_error(e),
    }
}

// Publishes and updates the widget under its lock before the response goes out
async fn apply_auth_change(data: &AppState, user: Option<AuthUser>) {
    let mut widget = data.widget.lock().await;
    data.watcher.publish(user.clone());
    match (user.is_some(), widget.is_initialized()) {
        (true, false) => widget.ensure_initialized().await,
        (false, true) => widget.handle_signed_out(),
        _ => {}
    }
}

fn sign_in_required() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({ "error": "Sign in to use the assistant" }))
}

fn auth_error(e: AuthError) -> HttpResponse {
    error!("Auth request failed: {}", e);
    let status = match &e {
        AuthError::Invalid(_) => StatusCode::BAD_REQUEST,
        AuthError::Rejected { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        AuthError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AuthError::Transport(_) | AuthError::Malformed(_) => StatusCode::BAD_GATEWAY,
    };
    HttpResponse::build(status).json(json!({ "error": e.to_string() }))
}
