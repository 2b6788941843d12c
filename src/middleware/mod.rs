pub mod auth;
pub mod error_handling;
pub mod request_id;

pub use auth::{JwtKeys, User};
pub use request_id::RequestIdMiddleware;
