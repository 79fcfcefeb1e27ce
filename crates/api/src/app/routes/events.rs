use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};

use eventhall_catalog::{BookingDirection, CreateEvent, EventCommand, UpdateEvent};
use eventhall_core::EventId;
use eventhall_infra::event_store::EventFilter;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_events).post(create_event))
        .route("/:id", get(get_event).put(update_event).delete(delete_event))
        .route("/:id/registration", put(adjust_registration))
        .route("/:id/has-capacity", get(has_capacity))
        .route("/:id/bookings", put(change_booking))
}

pub async fn list_events(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListEventsQuery>,
) -> axum::response::Response {
    let filter = EventFilter::from_is_past(query.is_past);
    let events = match services.list(filter).await {
        Ok(v) => v,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    let now = services.now();
    let body: Vec<dto::EventResponse> = events
        .iter()
        .map(|e| dto::EventResponse::from_event(e, now))
        .collect();

    (StatusCode::OK, Json(body)).into_response()
}

pub async fn get_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let event_id = match errors::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.load(event_id).await {
        Ok(event) => (
            StatusCode::OK,
            Json(dto::EventResponse::from_event(&event, services.now())),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_event(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::EventRequest>, JsonRejection>,
) -> axum::response::Response {
    let details = match errors::json_body(body).and_then(dto::EventRequest::into_details) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let event_id = EventId::new();
    let dispatched = match services
        .dispatch(EventCommand::Create(CreateEvent { event_id, details }))
        .await
    {
        Ok(v) => v,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    tracing::info!(event_id = %event_id, "event created");

    (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/events/{event_id}"))],
        Json(dto::EventResponse::from_event(&dispatched.event, services.now())),
    )
        .into_response()
}

pub async fn update_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::EventRequest>, JsonRejection>,
) -> axum::response::Response {
    let event_id = match errors::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let details = match errors::json_body(body).and_then(dto::EventRequest::into_details) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .dispatch(EventCommand::Update(UpdateEvent { event_id, details }))
        .await
    {
        Ok(dispatched) => (
            StatusCode::OK,
            Json(dto::EventResponse::from_event(&dispatched.event, services.now())),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn delete_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let event_id = match errors::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.delete(event_id).await {
        Ok(()) => {
            tracing::info!(event_id = %event_id, "event deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn adjust_registration(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::RegistrationRequest>, JsonRejection>,
) -> axum::response::Response {
    let event_id = match errors::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let body = match errors::json_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.adjuster().adjust(event_id, body.increment_by).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn has_capacity(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let event_id = match errors::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.adjuster().has_capacity(event_id).await {
        Ok(open) => (StatusCode::OK, Json(open)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn change_booking(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::BookingRequest>, JsonRejection>,
) -> axum::response::Response {
    let event_id = match errors::parse_event_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let body = match errors::json_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let direction = if body.is_increment {
        BookingDirection::Increment
    } else {
        BookingDirection::Decrement
    };

    match services.adjuster().change_booking(event_id, direction).await {
        Ok(adjustment) => (
            StatusCode::OK,
            Json(dto::RegistrationResponse::from(adjustment)),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
