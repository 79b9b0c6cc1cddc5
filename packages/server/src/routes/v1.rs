use axum::{
    Router,
    routing::{get, patch, post},
};

use crate::config::AppConfig;
use crate::handlers;
use crate::state::AppState;

pub fn routes(config: &AppConfig) -> Router<AppState> {
    Router::new()
        .nest("/newchat", chat_routes())
        .nest("/ticket", ticket_routes())
        .nest("/seats", seat_routes())
        .nest("/feed", feed_routes(config))
}

fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::chat::list_chats))
        .route("/direct", post(handlers::chat::direct_chat))
        .route("/{room}", get(handlers::chat::history))
        .route("/{room}/read", post(handlers::chat::mark_read))
        .route("/{room}/presence", get(handlers::chat::presence))
}

fn ticket_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/event/{event}",
            get(handlers::ticket::list_tickets).post(handlers::ticket::create_ticket),
        )
        .route(
            "/event/{event}/{ticket}",
            patch(handlers::ticket::edit_ticket)
                .delete(handlers::ticket::delete_ticket),
        )
        .route("/event/{event}/{ticket}/buy", post(handlers::ticket::buy_ticket))
        .route(
            "/event/{event}/{ticket}/seats/regenerate",
            post(handlers::ticket::regenerate_seats),
        )
        .route(
            "/event/{event}/{ticket}/qr/{code}",
            get(handlers::ticket::ticket_qr),
        )
        .route("/verify/{event}", get(handlers::ticket::verify_ticket))
}

fn seat_routes() -> Router<AppState> {
    Router::new()
        .route("/{event}", get(handlers::seat::seat_map))
        .route("/{event}/lock-seats", post(handlers::seat::lock_seats))
        .route("/{event}/unlock-seats", post(handlers::seat::unlock_seats))
        .route(
            "/{event}/ticket/{ticket}/confirm-purchase",
            post(handlers::seat::confirm_purchase),
        )
}

fn feed_routes(config: &AppConfig) -> Router<AppState> {
    let upload = Router::new()
        .route("/post", post(handlers::feed::create_post))
        .layer(handlers::feed::post_body_limit(
            config.storage.max_upload_size,
        ));

    let crud = Router::new().route(
        "/post/{postid}",
        get(handlers::feed::get_post)
            .patch(handlers::feed::update_post)
            .delete(handlers::feed::delete_post),
    );

    upload.merge(crud)
}
