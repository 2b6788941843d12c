use crate::{error::AppError, middleware::User, models::Message, state::AppState};
use actix_web::{delete, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct ReactRequest {
    pub emoji: String,
}

#[derive(Serialize)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: usize,
    pub user_reacted: bool,
}

#[derive(Serialize)]
pub struct ReactionsResponse {
    pub message_id: Uuid,
    pub reactions: Vec<ReactionCount>,
}

impl ReactionsResponse {
    /// Aggregate per emoji, most used first.
    fn of(message: &Message, viewer: Uuid) -> Self {
        let mut counts: BTreeMap<&str, (usize, bool)> = BTreeMap::new();
        for reaction in &message.reactions {
            let entry = counts.entry(reaction.emoji.as_str()).or_default();
            entry.0 += 1;
            entry.1 |= reaction.user_id == viewer;
        }
        let mut reactions: Vec<ReactionCount> = counts
            .into_iter()
            .map(|(emoji, (count, user_reacted))| ReactionCount {
                emoji: emoji.to_string(),
                count,
                user_reacted,
            })
            .collect();
        reactions.sort_by(|a, b| b.count.cmp(&a.count));
        Self {
            message_id: message.id,
            reactions,
        }
    }
}

/// POST /messages/{id}/react
/// Set the caller's reaction, replacing any earlier one.
#[post("/messages/{id}/react")]
pub async fn add_reaction(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    body: web::Json<ReactRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .messages
        .react(user.id, path.into_inner(), body.into_inner().emoji)
        .await?;
    Ok(HttpResponse::Ok().json(ReactionsResponse::of(&message, user.id)))
}

/// DELETE /messages/{id}/react
#[delete("/messages/{id}/react")]
pub async fn remove_reaction(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let message = state.messages.unreact(user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ReactionsResponse::of(&message, user.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageContent, MessageType};
    use chrono::Utc;

    #[test]
    fn test_reaction_counts_flag_viewer() {
        let viewer = Uuid::new_v4();
        let mut message = Message::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            MessageType::Text,
            MessageContent::Text { text: "hi".into() },
            None,
            Utc::now(),
        );
        message.set_reaction(viewer, "👍", Utc::now());
        message.set_reaction(Uuid::new_v4(), "👍", Utc::now());
        message.set_reaction(Uuid::new_v4(), "🎉", Utc::now());

        let response = ReactionsResponse::of(&message, viewer);
        assert_eq!(response.reactions[0].emoji, "👍");
        assert_eq!(response.reactions[0].count, 2);
        assert!(response.reactions[0].user_reacted);
        assert!(!response.reactions[1].user_reacted);
    }
}
