pub mod auth;
pub mod user;

pub use auth::{AuthTokenContext, AuthTokenHistoryEntry, TokenWindow};
pub use user::UserIdContext;
