use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use eventhall_core::EventId;
use eventhall_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "event not found"),
        DispatchError::CapacityExceeded {
            capacity,
            registered,
            requested,
        } => json_error(
            StatusCode::BAD_REQUEST,
            "capacity_exceeded",
            format!(
                "registration count would be {requested}, allowed range is 0..={capacity} (currently {registered})"
            ),
        ),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "concurrency_conflict", msg),
        DispatchError::Store(e) => {
            tracing::error!(error = %e, "event store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_event_id(raw: &str) -> Result<EventId, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid event id"))
}

/// Unwrap a JSON body, turning axum's rejection (malformed JSON, missing
/// fields, out-of-range numbers) into a 400 `validation_error`.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    body.map(|Json(value)| value)
        .map_err(|rejection| json_error(StatusCode::BAD_REQUEST, "validation_error", rejection.body_text()))
}
