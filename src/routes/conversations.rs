use crate::{
    error::AppError,
    middleware::User,
    models::Conversation,
    services::conversation_service::{CreateConversation, MembershipOutcome, UpdateConversation},
    state::AppState,
};
use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct DirectRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize, Default)]
pub struct JoinRequestBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct MembershipResponse {
    pub outcome: MembershipOutcome,
    pub conversation: Conversation,
}

#[derive(Serialize)]
pub struct ConversationList {
    pub conversations: Vec<Conversation>,
    pub total: usize,
}

/// POST /conversations/direct
#[post("/conversations/direct")]
pub async fn open_direct(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<DirectRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .get_or_create_direct(user.id, body.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// POST /conversations
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversation>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .create_group_or_channel(user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(conversation))
}

/// GET /conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let conversations = state.conversations.list_for_user(user.id).await?;
    Ok(HttpResponse::Ok().json(ConversationList {
        total: conversations.len(),
        conversations,
    }))
}

/// GET /conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .get_for_member(path.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// PUT /conversations/{id}
#[put("/conversations/{id}")]
pub async fn update_conversation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    body: web::Json<UpdateConversation>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .update_info(path.into_inner(), user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// POST /conversations/{id}/join
#[post("/conversations/{id}/join")]
pub async fn join_conversation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    body: Option<web::Json<JoinRequestBody>>,
) -> Result<HttpResponse, AppError> {
    let message = body.and_then(|b| b.into_inner().message);
    let (outcome, conversation) = state
        .conversations
        .join(path.into_inner(), user.id, message)
        .await?;
    let response = MembershipResponse {
        outcome,
        conversation,
    };
    Ok(match outcome {
        MembershipOutcome::Requested => HttpResponse::Accepted().json(response),
        _ => HttpResponse::Ok().json(response),
    })
}

/// POST /conversations/{id}/leave
#[post("/conversations/{id}/leave")]
pub async fn leave_conversation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state.conversations.leave(path.into_inner(), user.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /conversations/{id}/add
#[post("/conversations/{id}/add")]
pub async fn add_member(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    body: web::Json<AddMemberRequest>,
) -> Result<HttpResponse, AppError> {
    let (outcome, conversation) = state
        .conversations
        .add_member(path.into_inner(), user.id, body.user_id)
        .await?;
    let response = MembershipResponse {
        outcome,
        conversation,
    };
    Ok(match outcome {
        MembershipOutcome::Requested => HttpResponse::Accepted().json(response),
        _ => HttpResponse::Ok().json(response),
    })
}

#[post("/conversations/{id}/archive")]
pub async fn archive_conversation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .set_archived(path.into_inner(), user.id, true)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

#[post("/conversations/{id}/unarchive")]
pub async fn unarchive_conversation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .set_archived(path.into_inner(), user.id, false)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// POST /conversations/{id}/read
/// Move the caller's last-read pointer to the latest message.
#[post("/conversations/{id}/read")]
pub async fn mark_conversation_read(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let participant = state
        .conversations
        .mark_conversation_read(path.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(participant))
}

#[post("/conversations/{id}/pins/{message_id}")]
pub async fn pin_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, message_id) = path.into_inner();
    let conversation = state
        .conversations
        .pin_message(conversation_id, user.id, message_id, true)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

#[delete("/conversations/{id}/pins/{message_id}")]
pub async fn unpin_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, message_id) = path.into_inner();
    let conversation = state
        .conversations
        .pin_message(conversation_id, user.id, message_id, false)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}
