pub mod cache;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod events;
pub mod extractors;
pub mod feed;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod reservation;
pub mod routes;
pub mod seed;
pub mod state;
pub mod upload;
pub mod utils;

use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_scalar::{Scalar, Servable as ScalarServable};

use crate::config::CorsConfig;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Plaza API",
        version = "1.0.0",
        description = "Real-time chat, event ticketing and media feed"
    ),
    paths(
        handlers::chat::open_socket,
        handlers::chat::upload_attachments,
        handlers::chat::history,
        handlers::chat::direct_chat,
        handlers::chat::list_chats,
        handlers::chat::mark_read,
        handlers::chat::presence,
        handlers::ticket::create_ticket,
        handlers::ticket::list_tickets,
        handlers::ticket::edit_ticket,
        handlers::ticket::delete_ticket,
        handlers::ticket::buy_ticket,
        handlers::ticket::regenerate_seats,
        handlers::ticket::ticket_qr,
        handlers::ticket::verify_ticket,
        handlers::seat::seat_map,
        handlers::seat::lock_seats,
        handlers::seat::unlock_seats,
        handlers::seat::confirm_purchase,
        handlers::feed::create_post,
        handlers::feed::get_post,
        handlers::feed::update_post,
        handlers::feed::delete_post,
        handlers::health::health,
    ),
    tags(
        (name = "Chat", description = "Rooms, history and attachments"),
        (name = "Tickets", description = "Ticket types, purchases and verification"),
        (name = "Seats", description = "Seat locks and seated purchases"),
        (name = "Feed", description = "Posts with transcoded media"),
        (name = "Operations", description = "Health"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_default();
        components.add_security_scheme(
            "jwt",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(cors.max_age));

    if cors.allow_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = cors
        .allow_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let chat_upload = Router::new()
        .route("/newchat/upload", post(handlers::chat::upload_attachments))
        .layer(handlers::chat::chat_upload_body_limit(
            config.storage.chat_max_upload_size,
        ));

    Router::new()
        .route("/ws/{room}", get(handlers::chat::open_socket))
        .route("/health", get(handlers::health::health))
        .merge(chat_upload)
        .nest("/api", routes::api_routes(&config))
        .with_state(state)
        .nest_service("/static", ServeDir::new(&config.storage.static_root))
        .merge(Scalar::with_url("/scalar", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors))
}
