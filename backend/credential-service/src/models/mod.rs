/// Data models for credentials and sessions
pub mod claims;
pub mod refresh_token;
pub mod reset_token;
pub mod user;

pub use claims::AccessClaims;
pub use refresh_token::{NewRefreshToken, RefreshToken};
pub use reset_token::{NewResetToken, ResetToken};
pub use user::{NewUser, User};
