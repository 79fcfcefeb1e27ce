use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventhall_catalog::{Event, EventDetails};
use eventhall_core::EventId;
use eventhall_infra::registration::Adjustment;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /api/events` and `PUT /api/events/:id`.
///
/// `id` and `registered` are server-owned and not accepted here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub image_url: Option<String>,
    pub capacity: i64,
}

impl EventRequest {
    /// Range-check the numeric fields; text fields are validated by the domain.
    pub fn into_details(self) -> Result<EventDetails, axum::response::Response> {
        let capacity = u32::try_from(self.capacity)
            .ok()
            .filter(|c| *c >= 1)
            .ok_or_else(|| {
                errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    "capacity must be at least 1",
                )
            })?;

        Ok(EventDetails {
            title: self.title,
            description: self.description,
            date: self.date,
            location: self.location,
            image_url: self.image_url,
            capacity,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub increment_by: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub is_increment: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsQuery {
    pub is_past: Option<bool>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub image_url: Option<String>,
    pub capacity: u32,
    pub registered: u32,
    /// Computed from the server clock at response time.
    pub is_past: bool,
}

impl EventResponse {
    pub fn from_event(event: &Event, now: DateTime<Utc>) -> Self {
        let details = event.details();
        Self {
            id: event.id_typed(),
            title: details.title.clone(),
            description: details.description.clone(),
            date: details.date,
            location: details.location.clone(),
            image_url: details.image_url.clone(),
            capacity: details.capacity,
            registered: event.registered(),
            is_past: event.is_past(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: EventId,
    pub registered: u32,
    pub capacity: u32,
    pub changed: bool,
}

impl From<Adjustment> for RegistrationResponse {
    fn from(value: Adjustment) -> Self {
        Self {
            id: value.event_id,
            registered: value.registered,
            capacity: value.capacity,
            changed: value.changed,
        }
    }
}
