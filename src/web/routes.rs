use actix_web::web;
use crate::web::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/backend/health", web::get().to(handlers::backend_health))
            .route("/chat", web::get().to(handlers::chat_state))
            .route("/chat", web::post().to(handlers::chat))
            .route("/chat/selection", web::post().to(handlers::ask_selection))
            .route("/chat/history", web::delete().to(handlers::clear_history))
            .route("/auth/session", web::get().to(handlers::auth_session))
            .route("/auth/sign-in", web::post().to(handlers::sign_in))
            .route("/auth/sign-up", web::post().to(handlers::sign_up))
            .route("/auth/social", web::post().to(handlers::social_sign_in))
            .route("/auth/sign-out", web::post().to(handlers::sign_out))
    )
    .route("/", web::get().to(handlers::index))
    .route("/health", web::get().to(handlers::health_check));
}
