pub mod conversations;
pub mod groups;
pub mod messages;
pub mod reactions;
pub mod wsroute;

use crate::metrics;
use actix_web::{get, web, HttpResponse};

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

#[get("/metrics")]
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            tracing::error!(error = %e, "failed to render metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Register every endpoint. `/messages/search` must precede
/// `/messages/{conversation_id}`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(metrics_endpoint)
        .service(wsroute::ws_handler)
        .service(conversations::open_direct)
        .service(conversations::create_conversation)
        .service(conversations::list_conversations)
        .service(conversations::get_conversation)
        .service(conversations::update_conversation)
        .service(conversations::join_conversation)
        .service(conversations::leave_conversation)
        .service(conversations::add_member)
        .service(conversations::archive_conversation)
        .service(conversations::unarchive_conversation)
        .service(conversations::mark_conversation_read)
        .service(conversations::pin_message)
        .service(conversations::unpin_message)
        .service(groups::remove_member)
        .service(groups::update_member_role)
        .service(groups::update_member_permissions)
        .service(groups::mute_member)
        .service(groups::approve_join_request)
        .service(groups::reject_join_request)
        .service(messages::send_message)
        .service(messages::search_messages)
        .service(messages::get_history)
        .service(messages::edit_message)
        .service(messages::delete_message)
        .service(messages::mark_read)
        .service(messages::forward_message)
        .service(reactions::add_reaction)
        .service(reactions::remove_reaction);
}
