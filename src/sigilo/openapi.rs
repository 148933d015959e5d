#![allow(clippy::needless_for_each)]

use crate::sigilo::handlers::{
    auth,
    auth::{__path_challenge, __path_login, __path_logout, __path_register, __path_validate},
    health,
    health::__path_health,
    recovery,
    recovery::{__path_recovery_password, __path_recovery_system},
    user,
    user::{__path_details, __path_system_check},
};
use axum::response::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        register,
        login,
        challenge,
        validate,
        logout,
        recovery_password,
        recovery_system,
        system_check,
        details
    ),
    components(schemas(
        health::Health,
        auth::UserRegister,
        auth::RegisteredBody,
        auth::UserLogin,
        auth::TokenPair,
        auth::ChallengeRequest,
        auth::ChallengeAnswer,
        auth::RecoveryGrant,
        recovery::PasswordReset,
        recovery::SystemReset,
        user::SystemInfo,
        user::SystemGrant,
        user::DetailsGrant
    )),
    tags(
        (name = "sigilo", description = "Identity and session API with tamper-evident records")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

// axum handler serving the generated document
pub async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = openapi();
        let paths = &doc.paths.paths;
        for route in [
            "/health",
            "/auth/register",
            "/auth/login",
            "/auth/challenge",
            "/auth/validate",
            "/auth/logout",
            "/recovery/password",
            "/recovery/system",
            "/user/system",
            "/user/details",
        ] {
            assert!(paths.contains_key(route), "missing route {route}");
        }
    }
}
