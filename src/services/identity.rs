//! User existence lookups against the identity collaborator.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, user_id: Uuid) -> AppResult<bool>;

    /// `NotFound` unless the user exists.
    async fn require_user(&self, user_id: Uuid) -> AppResult<()> {
        if self.user_exists(user_id).await? {
            Ok(())
        } else {
            Err(AppError::not_found(format!("user {user_id}")))
        }
    }
}

/// HTTP client for `GET {base}/internal/users/{id}`.
#[derive(Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl IdentityClient {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::StartServer(format!("identity client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UserDirectory for IdentityClient {
    async fn user_exists(&self, user_id: Uuid) -> AppResult<bool> {
        let url = format!("{}/internal/users/{}", self.base_url, user_id);
        let resp = self.http.get(&url).send().await.map_err(|e| {
            tracing::warn!(error = %e, user_id = %user_id, "identity lookup failed");
            AppError::ServiceUnavailable("identity service unreachable".into())
        })?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => {
                tracing::warn!(status = %other, user_id = %user_id, "unexpected identity response");
                Err(AppError::ServiceUnavailable(format!(
                    "identity service returned {other}"
                )))
            }
        }
    }
}

/// Fixed set of known users.
#[derive(Default)]
pub struct StaticUserDirectory {
    users: RwLock<HashSet<Uuid>>,
}

impl StaticUserDirectory {
    pub fn new(users: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().collect()),
        }
    }

    pub async fn insert(&self, user_id: Uuid) {
        self.users.write().await.insert(user_id);
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn user_exists(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self.users.read().await.contains(&user_id))
    }
}

/// Treats every id as existing. Used when no identity service is configured
/// and the bearer token is the only source of identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustTokenDirectory;

#[async_trait]
impl UserDirectory for TrustTokenDirectory {
    async fn user_exists(&self, _user_id: Uuid) -> AppResult<bool> {
        Ok(true)
    }
}
