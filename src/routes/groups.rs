//! Membership administration for group and channel conversations.
//!
//! Authorization is decided by the conversation service through the
//! permission resolver; handlers only parse and forward.

use crate::{
    error::AppError,
    middleware::User,
    models::{MemberRole, PermissionSet},
    state::AppState,
};
use actix_web::{delete, patch, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

// ============================================
// Request DTOs
// ============================================

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

// ============================================
// Endpoints
// ============================================

/// DELETE /conversations/{id}/members/{user_id}
#[delete("/conversations/{id}/members/{user_id}")]
pub async fn remove_member(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, target) = path.into_inner();
    state
        .conversations
        .remove_member(conversation_id, user.id, target)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// PATCH /conversations/{id}/members/{user_id}/role
#[patch("/conversations/{id}/members/{user_id}/role")]
pub async fn update_member_role(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<UpdateRoleRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, target) = path.into_inner();
    let role: MemberRole = body.role.parse().map_err(AppError::BadRequest)?;
    let conversation = state
        .conversations
        .update_role(conversation_id, user.id, target, role)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// PATCH /conversations/{id}/members/{user_id}/permissions
/// Replaces the member's explicit permission flags.
#[patch("/conversations/{id}/members/{user_id}/permissions")]
pub async fn update_member_permissions(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<PermissionSet>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, target) = path.into_inner();
    let conversation = state
        .conversations
        .update_permissions(conversation_id, user.id, target, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// PATCH /conversations/{id}/members/{user_id}/mute
#[patch("/conversations/{id}/members/{user_id}/mute")]
pub async fn mute_member(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<MuteRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, target) = path.into_inner();
    let conversation = state
        .conversations
        .mute_member(conversation_id, user.id, target, body.muted, body.until)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

#[post("/conversations/{id}/join-requests/{user_id}/approve")]
pub async fn approve_join_request(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, requester) = path.into_inner();
    let conversation = state
        .conversations
        .approve_request(conversation_id, user.id, requester)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

#[post("/conversations/{id}/join-requests/{user_id}/reject")]
pub async fn reject_join_request(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, requester) = path.into_inner();
    state
        .conversations
        .reject_request(conversation_id, user.id, requester)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
