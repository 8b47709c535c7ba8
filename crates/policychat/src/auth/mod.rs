//! Authentication.
//!
//! Tokens are HS256 JWTs issued by `POST /auth/token`. In dev mode, configured
//! dev users may also present `dev:<id>` tokens.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError, DevUser};
pub use error::AuthError;
pub use middleware::{AuthState, CurrentUser, auth_middleware};
