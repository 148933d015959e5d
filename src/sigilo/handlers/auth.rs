use crate::error::{Envelope, Fault, FieldError};
use crate::session::Registration;
use crate::sigilo::handlers::{
    bearer, client_ip, valid_code, valid_email, valid_name, valid_password, valid_uid,
};
use crate::sigilo::AppState;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct UserRegister {
    secret: String,
    email: String,
    fname: String,
    lname: String,
    country: String,
    password: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredBody {
    uid: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct UserLogin {
    uid: String,
    email: String,
    password: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    online_token: String,
    offline_token: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ChallengeRequest {
    uid: String,
    email: String,
    reason: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ChallengeAnswer {
    uid: String,
    email: String,
    reason: String,
    code: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryGrant {
    online_token: String,
}

fn payload_or_fault<T>(payload: Option<Json<T>>) -> Result<T, Fault> {
    match payload {
        Some(Json(payload)) => Ok(payload),
        None => Err(Fault::Unprocessable(vec![FieldError::new(
            "body",
            "Missing or malformed JSON payload.",
        )])),
    }
}

#[utoipa::path(
    post,
    path= "/auth/register",
    responses (
        (status = 201, description = "Account created", body = [RegisteredBody], content_type = "application/json"),
        (status = 404, description = "Email is not on the eligibility allow-list"),
        (status = 409, description = "Account for the email or generated uid already exists"),
        (status = 503, description = "Confirmation mail could not be delivered"),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    state: Extension<AppState>,
    headers: HeaderMap,
    payload: Option<Json<UserRegister>>,
) -> Result<impl IntoResponse, Fault> {
    let body = payload_or_fault(payload)?;

    let mut fields = Vec::new();
    if body.secret.is_empty() {
        fields.push(FieldError::new("secret", "Missing registration code."));
    }
    if !valid_email(&body.email) {
        fields.push(FieldError::new("email", "Invalid email address."));
    }
    if !valid_name(&body.fname) {
        fields.push(FieldError::new("fname", "Invalid first name."));
    }
    if !valid_name(&body.lname) {
        fields.push(FieldError::new("lname", "Invalid last name."));
    }
    if !valid_name(&body.country) {
        fields.push(FieldError::new("country", "Invalid country."));
    }
    if !valid_password(&body.password) {
        fields.push(FieldError::new(
            "password",
            "Password must be between 8 and 128 characters.",
        ));
    }
    if !fields.is_empty() {
        return Err(Fault::Unprocessable(fields));
    }

    let registered = state
        .sessions
        .register(Registration {
            secret: body.secret,
            email: body.email,
            fname: body.fname,
            lname: body.lname,
            country: body.country,
            password: body.password,
            ip: client_ip(&headers),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(
            StatusCode::CREATED,
            RegisteredBody {
                uid: registered.uid,
            },
        )),
    ))
}

#[utoipa::path(
    post,
    path= "/auth/login",
    responses (
        (status = 200, description = "Authenticated, token pair issued", body = [TokenPair], content_type = "application/json"),
        (status = 401, description = "Wrong credentials"),
        (status = 403, description = "Banned account or tampered record"),
        (status = 429, description = "Daily login quota exhausted"),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    state: Extension<AppState>,
    headers: HeaderMap,
    payload: Option<Json<UserLogin>>,
) -> Result<impl IntoResponse, Fault> {
    let body = payload_or_fault(payload)?;

    let mut fields = Vec::new();
    if !valid_uid(&body.uid) {
        fields.push(FieldError::new("uid", "Invalid user id."));
    }
    if !valid_email(&body.email) {
        fields.push(FieldError::new("email", "Invalid email address."));
    }
    if !valid_password(&body.password) {
        fields.push(FieldError::new("password", "Invalid password."));
    }
    if !fields.is_empty() {
        return Err(Fault::Unprocessable(fields));
    }

    let tokens = state
        .sessions
        .login(&body.uid, &body.email, &body.password, &client_ip(&headers))
        .await?;

    Ok((
        StatusCode::OK,
        Json(Envelope::ok(
            StatusCode::OK,
            TokenPair {
                online_token: tokens.online_token,
                offline_token: tokens.offline_token,
            },
        )),
    ))
}

#[utoipa::path(
    post,
    path= "/auth/challenge",
    responses (
        (status = 202, description = "Verification code generated and mailed"),
        (status = 409, description = "Unknown reason, live session, or a code is still pending"),
        (status = 503, description = "Code mail could not be delivered"),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn challenge(
    state: Extension<AppState>,
    headers: HeaderMap,
    payload: Option<Json<ChallengeRequest>>,
) -> Result<impl IntoResponse, Fault> {
    let body = payload_or_fault(payload)?;

    let mut fields = Vec::new();
    if !valid_uid(&body.uid) {
        fields.push(FieldError::new("uid", "Invalid user id."));
    }
    if !valid_email(&body.email) {
        fields.push(FieldError::new("email", "Invalid email address."));
    }
    if !fields.is_empty() {
        return Err(Fault::Unprocessable(fields));
    }

    state
        .sessions
        .request_challenge(&body.uid, &body.email, &body.reason, &client_ip(&headers))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(Envelope::empty(StatusCode::ACCEPTED)),
    ))
}

#[utoipa::path(
    post,
    path= "/auth/validate",
    responses (
        (status = 200, description = "Code accepted, recovery token issued", body = [RecoveryGrant], content_type = "application/json"),
        (status = 401, description = "Wrong code or forged challenge"),
        (status = 409, description = "Code expired"),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn validate(
    state: Extension<AppState>,
    headers: HeaderMap,
    payload: Option<Json<ChallengeAnswer>>,
) -> Result<impl IntoResponse, Fault> {
    let body = payload_or_fault(payload)?;

    let mut fields = Vec::new();
    if !valid_uid(&body.uid) {
        fields.push(FieldError::new("uid", "Invalid user id."));
    }
    if !valid_email(&body.email) {
        fields.push(FieldError::new("email", "Invalid email address."));
    }
    if !valid_code(&body.code) {
        fields.push(FieldError::new("code", "Code must be eight digits."));
    }
    if !fields.is_empty() {
        return Err(Fault::Unprocessable(fields));
    }

    let online_token = state
        .sessions
        .validate_challenge(
            &body.uid,
            &body.email,
            &body.reason,
            &body.code,
            &client_ip(&headers),
        )
        .await?;

    Ok((
        StatusCode::OK,
        Json(Envelope::ok(StatusCode::OK, RecoveryGrant { online_token })),
    ))
}

#[utoipa::path(
    post,
    path= "/auth/logout",
    responses (
        (status = 200, description = "Session ended"),
        (status = 401, description = "Missing, expired, or superseded session token"),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    state: Extension<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Fault> {
    let token = bearer(&headers)?;
    state.sessions.logout(token, &client_ip(&headers)).await?;

    Ok((StatusCode::OK, Json(Envelope::empty(StatusCode::OK))))
}
