use crate::catalog;
use crate::device::BindOutcome;
use crate::error::{Envelope, Fault, FieldError};
use crate::model::{none, DeviceFingerprint};
use crate::sigilo::handlers::{bearer, client_ip};
use crate::sigilo::AppState;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

/// Hardware attributes as collected and signed by the client.
#[derive(ToSchema, Deserialize, Debug)]
pub struct SystemInfo {
    bios: String,
    board: String,
    cpu: String,
    disk: String,
    os: String,
    signature: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SystemGrant {
    system_token: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DetailsGrant {
    details_token: String,
}

impl From<SystemInfo> for DeviceFingerprint {
    fn from(info: SystemInfo) -> Self {
        Self {
            bios: info.bios,
            board: info.board,
            cpu: info.cpu,
            disk: info.disk,
            os: info.os,
            created_at: none(),
            signature: info.signature,
        }
    }
}

#[utoipa::path(
    post,
    path= "/user/system",
    responses (
        (status = 200, description = "Device matched (System token issued) or rotated (session ended)", body = [SystemGrant], content_type = "application/json"),
        (status = 201, description = "First device bound to the account"),
        (status = 401, description = "Missing, expired, or superseded session token"),
        (status = 403, description = "Submitted fingerprint fails its signature check"),
    ),
    tag= "user"
)]
#[instrument(skip_all)]
pub async fn system_check(
    state: Extension<AppState>,
    headers: HeaderMap,
    payload: Option<Json<SystemInfo>>,
) -> Result<Response, Fault> {
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
    if body.signature.is_empty() {
        return Err(Fault::Unprocessable(vec![FieldError::new(
            "signature",
            "Missing fingerprint signature.",
        )]));
    }

    let outcome = state
        .sessions
        .check_system(token, body.into(), &client_ip(&headers))
        .await?;

    let response = match outcome {
        BindOutcome::FirstBind => (
            StatusCode::CREATED,
            Json(Envelope::empty(StatusCode::CREATED)),
        )
            .into_response(),
        BindOutcome::Matched { system_token } => (
            StatusCode::OK,
            Json(Envelope::ok(StatusCode::OK, SystemGrant { system_token })),
        )
            .into_response(),
        BindOutcome::Rotated => {
            // The bearer token died with the rotation; tell the client why.
            let envelope = Envelope::<serde_json::Value> {
                status: StatusCode::OK.as_u16(),
                data: None,
                message: Some(catalog::DEVICE_ROTATED.to_string()),
            };
            (StatusCode::OK, Json(envelope)).into_response()
        }
    };
    Ok(response)
}

#[utoipa::path(
    post,
    path= "/user/details",
    responses (
        (status = 200, description = "Account details sealed into a short-lived token", body = [DetailsGrant], content_type = "application/json"),
        (status = 401, description = "Missing, expired, or superseded session token"),
        (status = 429, description = "Daily details quota exhausted"),
    ),
    tag= "user"
)]
#[instrument(skip_all)]
pub async fn details(
    state: Extension<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Fault> {
    let token = bearer(&headers)?;
    let details_token = state.sessions.account_details(token).await?;

    Ok((
        StatusCode::OK,
        Json(Envelope::ok(StatusCode::OK, DetailsGrant { details_token })),
    ))
}
