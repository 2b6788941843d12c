use crate::{
    error::AppError,
    middleware::User,
    models::Message,
    services::message_service::SendMessage,
    state::AppState,
    store::Cursor,
};
use actix_web::{delete, get, post, put, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    /// Tie-breaker for messages sharing `before`'s timestamp.
    #[serde(default)]
    pub before_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn cursor(&self) -> Option<Cursor> {
        self.before.map(|created_at| match self.before_id {
            Some(id) => Cursor { created_at, id },
            None => Cursor::before_time(created_at),
        })
    }
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct EditRequest {
    pub text: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    #[default]
    Me,
    Everyone,
}

#[derive(Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub scope: DeleteScope,
}

#[derive(Deserialize)]
pub struct ForwardRequest {
    pub conversation_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Pass as `before` and `before_id` to fetch the next older page.
    pub next_before: Option<DateTime<Utc>>,
    pub next_before_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct MessageList {
    pub messages: Vec<Message>,
}

/// POST /messages/send
#[post("/messages/send")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<SendMessage>,
) -> Result<HttpResponse, AppError> {
    let message = state.messages.send(user.id, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(message))
}

/// GET /messages/search?q=&limit=
#[get("/messages/search")]
pub async fn search_messages(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<SearchParams>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .messages
        .search(user.id, &query.q, query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(MessageList { messages }))
}

/// GET /messages/{conversation_id}?before=&before_id=&limit=
#[get("/messages/{conversation_id}")]
pub async fn get_history(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .messages
        .history(user.id, path.into_inner(), query.cursor(), query.limit)
        .await?;
    let next = messages.last().map(Cursor::of);
    Ok(HttpResponse::Ok().json(MessagePage {
        messages,
        next_before: next.map(|c| c.created_at),
        next_before_id: next.map(|c| c.id),
    }))
}

/// PUT /messages/{id}
#[put("/messages/{id}")]
pub async fn edit_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    body: web::Json<EditRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .messages
        .edit(user.id, path.into_inner(), body.into_inner().text)
        .await?;
    Ok(HttpResponse::Ok().json(message))
}

/// DELETE /messages/{id}?scope=me|everyone
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    query: web::Query<DeleteParams>,
) -> Result<HttpResponse, AppError> {
    let message_id = path.into_inner();
    match query.scope {
        DeleteScope::Me => {
            state.messages.delete_for_me(user.id, message_id).await?;
        }
        DeleteScope::Everyone => {
            state.messages.delete_for_everyone(user.id, message_id).await?;
        }
    }
    Ok(HttpResponse::NoContent().finish())
}

/// POST /messages/{id}/read
#[post("/messages/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let message = state.messages.mark_read(user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(message))
}

/// POST /messages/{id}/forward
#[post("/messages/{id}/forward")]
pub async fn forward_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    body: web::Json<ForwardRequest>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .messages
        .forward(user.id, path.into_inner(), body.into_inner().conversation_ids)
        .await?;
    Ok(HttpResponse::Created().json(MessageList { messages }))
}
