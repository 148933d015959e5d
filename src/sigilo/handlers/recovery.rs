use crate::error::{Envelope, Fault, FieldError};
use crate::sigilo::handlers::{bearer, client_ip, valid_password};
use crate::sigilo::AppState;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct PasswordReset {
    password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SystemReset {
    system_token: String,
}

#[utoipa::path(
    post,
    path= "/recovery/password",
    responses (
        (status = 200, description = "Password replaced, recovery session consumed"),
        (status = 401, description = "Missing, expired, or superseded recovery token"),
        (status = 403, description = "Token is not a password-recovery grant"),
        (status = 409, description = "New password equals the current one"),
    ),
    tag= "recovery"
)]
#[instrument(skip_all)]
pub async fn recovery_password(
    state: Extension<AppState>,
    headers: HeaderMap,
    payload: Option<Json<PasswordReset>>,
) -> Result<impl IntoResponse, Fault> {
    let token = bearer(&headers)?;
    let body = match payload {
        Some(Json(body)) => body,
        None => {
            return Err(Fault::Unprocessable(vec![FieldError::new(
                "body",
                "Missing or malformed JSON payload.",
            )]))
        }
    };
    if !valid_password(&body.password) {
        return Err(Fault::Unprocessable(vec![FieldError::new(
            "password",
            "Password must be between 8 and 128 characters.",
        )]));
    }

    state
        .sessions
        .reset_password(token, &body.password, &client_ip(&headers))
        .await?;

    Ok((StatusCode::OK, Json(Envelope::empty(StatusCode::OK))))
}

#[utoipa::path(
    post,
    path= "/recovery/system",
    responses (
        (status = 200, description = "Account rebound to the new device"),
        (status = 401, description = "Missing, expired, or superseded recovery token"),
        (status = 403, description = "Token is not a system-recovery grant"),
        (status = 409, description = "System token expired or device already bound"),
    ),
    tag= "recovery"
)]
#[instrument(skip_all)]
pub async fn recovery_system(
    state: Extension<AppState>,
    headers: HeaderMap,
    payload: Option<Json<SystemReset>>,
) -> Result<impl IntoResponse, Fault> {
    let token = bearer(&headers)?;
    let body = match payload {
        Some(Json(body)) => body,
        None => {
            return Err(Fault::Unprocessable(vec![FieldError::new(
                "body",
                "Missing or malformed JSON payload.",
            )]))
        }
    };
    if body.system_token.is_empty() {
        return Err(Fault::Unprocessable(vec![FieldError::new(
            "systemToken",
            "Missing system token.",
        )]));
    }

    state
        .sessions
        .reset_system(token, &body.system_token, &client_ip(&headers))
        .await?;

    Ok((StatusCode::OK, Json(Envelope::empty(StatusCode::OK))))
}
