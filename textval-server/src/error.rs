//! Mapping of [`GateError`] onto HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use textval_gate::{Denial, GateError, llm::LlmError};
use tracing::{error, warn};

/// A [`GateError`] on its way to the client.
///
/// The body is always `{"error": <code>, "message": <text>}`. Server-side
/// faults are logged in full and reach the client with a generic message.
#[derive(Debug)]
pub struct ApiError(pub GateError);

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        Self(err)
    }
}

impl From<Denial> for ApiError {
    fn from(denial: Denial) -> Self {
        Self(GateError::Denied(denial))
    }
}

/// Status code for an error.
#[must_use]
pub fn status_for(err: &GateError) -> StatusCode {
    match err {
        GateError::AuthenticationFailed(_) | GateError::WebhookRejected(_) => StatusCode::UNAUTHORIZED,
        GateError::AuthUnavailable(_) | GateError::Llm(LlmError::Timeout(_)) => StatusCode::SERVICE_UNAVAILABLE,
        GateError::Denied(Denial::InputTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        GateError::Denied(Denial::QuotaExceeded { .. }) | GateError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        GateError::Denied(_) => StatusCode::FORBIDDEN,
        GateError::NotFoundOrForbidden => StatusCode::NOT_FOUND,
        GateError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GateError::Llm(_) => StatusCode::BAD_GATEWAY,
        GateError::ProfileNotFound(_)
        | GateError::UnknownProfileTemplate { .. }
        | GateError::Store(_)
        | GateError::HttpError(_)
        | GateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);

        let message = match &err {
            GateError::ProfileNotFound(user_id) => {
                error!(user_id = %user_id, "CRITICAL: authenticated user has no entitlement record");
                "account setup is not complete, please contact support".to_owned()
            }
            GateError::Llm(e) => {
                warn!(error = %e, "language model failure");
                "the text service is temporarily unavailable, please retry".to_owned()
            }
            _ if status.is_server_error() => {
                error!(error = %err, code = err.code(), "request failed");
                "internal server error".to_owned()
            }
            _ => err.to_string(),
        };

        (status, Json(json!({ "error": err.code(), "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use textval_gate::{entitlement::UserId, plan::Workflow};

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GateError::AuthenticationFailed("expired".into()), StatusCode::UNAUTHORIZED),
            (GateError::WebhookRejected("bad signature".into()), StatusCode::UNAUTHORIZED),
            (GateError::AuthUnavailable("jwks down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (GateError::ProfileNotFound(UserId::new("user_1")), StatusCode::INTERNAL_SERVER_ERROR),
            (Denial::QuotaExceeded { limit: 10 }.into(), StatusCode::TOO_MANY_REQUESTS),
            (Denial::InputTooLarge { max: 2000, actual: 2001 }.into(), StatusCode::PAYLOAD_TOO_LARGE),
            (Denial::ResourceLimitExceeded { max: 1 }.into(), StatusCode::FORBIDDEN),
            (
                Denial::ProfileNotAllowed { workflow: Workflow::Validator, profile: "X".into() }.into(),
                StatusCode::FORBIDDEN,
            ),
            (GateError::NotFoundOrForbidden, StatusCode::NOT_FOUND),
            (GateError::InvalidInput("short".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (GateError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (GateError::Llm(LlmError::EmptyResponse), StatusCode::BAD_GATEWAY),
            (GateError::Llm(LlmError::Timeout(Duration::from_secs(30))), StatusCode::SERVICE_UNAVAILABLE),
            (GateError::Store("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{err:?}");
        }
    }

    #[test]
    fn test_client_errors_keep_message() {
        let response = ApiError::from(Denial::QuotaExceeded { limit: 10 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
