/// Business logic layer
pub mod credential_service;
pub mod password_reset;
pub mod token_lifecycle;

pub use credential_service::{ClientContext, CredentialService, RoutePolicies, TokenPair};
pub use password_reset::{hash_reset_token, PasswordReset, ResetNotifier, TracingNotifier};
pub use token_lifecycle::{generate_token, RotatedToken, TokenLifecycle};
