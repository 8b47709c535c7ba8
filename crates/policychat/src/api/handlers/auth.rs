//! Token issuance.

use axum::{Form, Json, extract::State, extract::rejection::FormRejection};
use policychat_protocol::TokenResponse;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::auth::AuthError;

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

/// `POST /auth/token` with form fields `username` and `password`.
///
/// Dev users are checked first (dev mode only), then stored users.
#[instrument(skip(state, form))]
pub async fn issue_token(
    State(state): State<AppState>,
    form: Result<Form<TokenForm>, FormRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let Form(form) = form?;

    let (user_id, name) =
        if let Some(dev) = state.auth.validate_dev_credentials(&form.username, &form.password) {
            (dev.id.clone(), dev.name.clone())
        } else if let Some(user) = state
            .users
            .verify_credentials(&form.username, &form.password)
            .await?
        {
            (user.id, user.display_name)
        } else {
            return Err(AuthError::InvalidCredentials.into());
        };

    let access_token = state.auth.issue_token(&user_id, &name)?;
    info!(user_id = %user_id, "issued access token");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}
