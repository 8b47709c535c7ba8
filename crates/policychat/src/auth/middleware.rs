//! Bearer token validation and issuance.

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::{debug, warn};
use std::sync::Arc;

use super::{AuthConfig, AuthError, Claims, DevUser};

const TOKEN_ISSUER: &str = "policychat";

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    secret: Arc<String>,
    decoding_key: DecodingKey,
}

impl AuthState {
    /// Resolves `env:VAR_NAME` in `jwt_secret`. A dev-mode server without a
    /// secret signs with a per-process random one.
    pub fn new(mut config: AuthConfig) -> Self {
        let secret = match config.resolve_jwt_secret() {
            Ok(Some(secret)) => secret,
            Ok(None) | Err(_) => {
                warn!("no usable JWT secret configured; issued tokens will not survive a restart");
                AuthConfig::generate_jwt_secret()
            }
        };
        config.jwt_secret = Some(secret.clone());

        let decoding_key = DecodingKey::from_secret(secret.as_bytes());

        Self {
            config: Arc::new(config),
            secret: Arc::new(secret),
            decoding_key,
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        self.config.dev_mode
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    /// Check credentials against configured dev users. Always `None` outside dev mode.
    pub fn validate_dev_credentials(&self, username: &str, password: &str) -> Option<&DevUser> {
        if !self.config.dev_mode {
            return None;
        }

        self.config
            .dev_users
            .iter()
            .find(|u| u.id == username && u.verify_password(password))
    }

    /// Validate a JWT, or a `dev:<id>` token in dev mode.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        if self.config.dev_mode
            && let Some(user_id) = token.strip_prefix("dev:")
        {
            return self.dev_user_claims(user_id);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            warn!("JWT validation failed: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        Ok(token_data.claims)
    }

    fn dev_user_claims(&self, user_id: &str) -> Result<Claims, AuthError> {
        let user = self
            .config
            .dev_users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or(AuthError::UserNotFound)?;

        let now = Utc::now().timestamp();
        Ok(Claims {
            sub: user.id.clone(),
            iss: Some("dev".to_string()),
            exp: now + 3600 * self.config.token_ttl_hours,
            iat: Some(now),
            name: Some(user.name.clone()),
            preferred_username: Some(user.id.clone()),
        })
    }

    /// Issue a signed token for `user_id`.
    pub fn issue_token(&self, user_id: &str, name: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: Some(TOKEN_ISSUER.to_string()),
            exp: now + 3600 * self.config.token_ttl_hours,
            iat: Some(now),
            name: Some(name.to_string()),
            preferred_username: Some(user_id.to_string()),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub claims: Claims,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    pub fn display_name(&self) -> &str {
        self.claims.display_name()
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Requires `Authorization: Bearer <token>` and injects `CurrentUser`.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;

    let token = bearer_token_from_header(header)?;
    let claims = auth.validate_token(token)?;
    debug!("authenticated {}", claims.sub);

    req.extensions_mut().insert(CurrentUser { claims });

    Ok(next.run(req).await)
}
