/// Security primitives: password hashing, access tokens, lockout and rate
/// limiting
pub mod access_token;
pub mod lockout;
pub mod password;
pub mod rate_limiter;

pub use access_token::{AccessTokenAuthority, IssuedToken, JwtAuthority};
pub use lockout::{AccountLockout, AttemptOutcome, LockoutConfig};
pub use password::{hash_password, verify_password};
pub use rate_limiter::{RateLimitConfig, RateLimiter, RoutePolicy, StoreFailurePolicy};
