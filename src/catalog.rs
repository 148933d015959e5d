//! Fixed catalog of reason strings surfaced to callers.

pub const NOT_ELIGIBLE: &str = "You are not eligible for creating an account. Please make sure you have an eligibility confirmation before registering.";
pub const EMAIL_ALREADY_EXISTS: &str = "An account for the provided email address already exists. Please provide a different email address.";
pub const UID_ALREADY_EXISTS: &str = "An account for the generated user id already exists. Please try again after some time.";
pub const ACCOUNT_NOT_FOUND: &str = "The requested account was not found.";
pub const BAD_CREDENTIALS: &str = "Credentials provided by you are wrong or invalid. Please check your credentials and try again.";
pub const BANNED_ACCOUNT: &str = "This account is suspended for violating the terms of service.";
pub const TAMPERED_RECORD: &str = "Access not allowed, the account needs a check. The account profile holds information which fails to validate its integrity.";
pub const TAMPERED_SYSTEM: &str = "The submitted system information fails to validate its integrity.";
pub const BAD_CHALLENGE_TYPE: &str = "The provided challenge type is invalid, no verification code was generated.";
pub const CHALLENGE_PENDING: &str = "A verification code was already issued and is still valid. Please use it or wait for it to expire.";
pub const CHALLENGE_EXPIRED: &str = "The verification code has expired. Please request a new one and try again.";
pub const BAD_CHALLENGE: &str = "The verification challenge could not be validated. Please request a new code.";
pub const NO_CHALLENGE: &str = "No pending verification challenge was found for this account.";
pub const SESSION_ACTIVE: &str = "An authenticated session is already active for this account.";
pub const SAME_PASSWORD: &str = "The new password matches the current one. Please choose a different password.";
pub const SAME_SYSTEM: &str = "The submitted system matches the one already bound to this account.";
pub const SYSTEM_TOKEN_EXPIRED: &str = "The system token has expired. Please request a fresh one and try again.";
pub const DEVICE_ROTATED: &str = "A new device was detected; the previous session was ended. Please sign in again.";
pub const INSUFFICIENT_PRIVILEGES: &str = "You do not have the level of access required for this operation.";
pub const BAD_AUTHORIZATION: &str = "The authorization token is wrong or invalid. Please try again with a valid token.";
pub const SESSION_EXPIRED: &str = "The session has expired. Please sign in again.";
pub const ACCESS_DENIED: &str = "Access to that resource is denied.";
pub const TOO_MANY_REQUESTS: &str = "The daily quota for this action is exhausted. Please try again tomorrow.";
pub const MAIL_FAILED: &str = "The confirmation email could not be delivered. Please try again later.";
pub const CONCURRENT_UPDATE: &str = "The account record changed underneath this request. Please retry.";
pub const INTERNAL: &str = "There was an error on the server and the request could not be completed.";
