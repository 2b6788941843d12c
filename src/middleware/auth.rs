//! Bearer JWT authentication.
//!
//! Tokens are HS256 with `sub` holding the user UUID. Handlers take a
//! [`User`] argument; the extractor validates the `Authorization` header
//! against the keys stored in [`AppState`].

use crate::error::AppError;
use crate::state::AppState;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// HS256 key pair derived from the shared secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Validate a token and return the user it was issued for.
    pub fn verify(&self, token: &str) -> Result<Uuid, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::warn!(error = %e, "JWT validation failed");
            AppError::Unauthorized
        })?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| {
            tracing::warn!("JWT subject is not a UUID");
            AppError::Unauthorized
        })
    }

    /// Issue a token for `user_id` that expires `ttl_secs` from now.
    pub fn issue(&self, user_id: Uuid, ttl_secs: i64) -> Result<String, AppError> {
        let exp = (chrono::Utc::now().timestamp() + ttl_secs).max(0) as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!(error = %e, "failed to sign token");
            AppError::Internal
        })
    }
}

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct User {
    pub id: Uuid,
}

impl FromRequest for User {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let result = match (req.app_data::<web::Data<AppState>>(), bearer_token(req)) {
            (Some(state), Some(token)) => state.jwt.verify(token).map(|id| User { id }),
            (None, _) => {
                tracing::error!("application state missing from request");
                Err(AppError::Internal)
            }
            (_, None) => Err(AppError::Unauthorized),
        };
        ready(result)
    }
}
