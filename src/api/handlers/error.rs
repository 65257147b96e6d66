//! Client-facing error taxonomy.
//!
//! Every failure a handler can surface maps to exactly one variant, so
//! outcomes stay exhaustively checkable instead of leaking mixed sentinels
//! from storage code. Internal errors are logged with their chain and
//! rendered as an opaque 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use super::auth::tokens::InvalidToken;

#[derive(Debug)]
pub enum ApiError {
    /// No usable credential was presented.
    NotAuthenticated,
    /// A credential was presented but did not match.
    AuthenticationFailed,
    /// Signature or expiry failure, deliberately collapsed to one kind.
    InvalidToken,
    /// Unknown opaque pass/invitation token.
    GrantNotFound,
    /// Exclusive grant binding violated.
    GrantConflict,
    /// The actor is not the owner of the resource.
    OwnershipViolation(&'static str),
    /// A referenced entity is absent.
    NotFound(&'static str),
    /// Malformed or rejected input.
    Validation(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotAuthenticated | Self::AuthenticationFailed | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::GrantNotFound | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::GrantConflict => StatusCode::CONFLICT,
            Self::OwnershipViolation(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::NotAuthenticated => "Not authenticated".to_string(),
            Self::AuthenticationFailed => "Incorrect email or password".to_string(),
            Self::InvalidToken => "Invalid or expired token".to_string(),
            Self::GrantNotFound => "Invalid link".to_string(),
            Self::GrantConflict => "Pass already bound to another user".to_string(),
            Self::OwnershipViolation(message) | Self::NotFound(message) => (*message).to_string(),
            Self::Validation(message) => message.clone(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("request failed: {err:#}");
        }
        let body = Json(json!({ "detail": self.detail() }));
        (self.status(), body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<InvalidToken> for ApiError {
    fn from(_: InvalidToken) -> Self {
        Self::InvalidToken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::NotAuthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::AuthenticationFailed.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::GrantNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::GrantConflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::OwnershipViolation("nope").status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("Event not found").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Validation("bad".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_is_opaque() {
        let err = ApiError::Internal(anyhow::anyhow!("connection refused to 10.0.0.5"));
        assert_eq!(err.detail(), "Internal server error");
    }

    #[test]
    fn invalid_token_collapses() {
        let err: ApiError = InvalidToken.into();
        assert!(matches!(err, ApiError::InvalidToken));
    }
}
