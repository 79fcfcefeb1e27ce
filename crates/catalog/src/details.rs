use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use eventhall_core::{DomainError, DomainResult};

/// Maximum length (in characters) of an event title.
pub const MAX_TITLE_LEN: usize = 100;

/// Maximum length (in characters) of an event location.
pub const MAX_LOCATION_LEN: usize = 100;

/// Fractional-second digits kept on `date`; Postgres `TIMESTAMPTZ` stores microseconds.
pub const DATE_PRECISION_DIGITS: u16 = 6;

/// The client-editable part of an event.
///
/// Create and update both carry a full `EventDetails`; the server-owned fields
/// (`id`, `registered`, `version`) live on [`crate::Event`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetails {
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub image_url: Option<String>,
    pub capacity: u32,
}

impl EventDetails {
    /// Copy with `date` truncated to [`DATE_PRECISION_DIGITS`], so every store
    /// hands back the timestamp that was accepted.
    pub fn normalized(&self) -> Self {
        Self {
            date: self.date.trunc_subsecs(DATE_PRECISION_DIGITS),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        require_text("title", &self.title, Some(MAX_TITLE_LEN))?;
        require_text("description", &self.description, None)?;
        require_text("location", &self.location, Some(MAX_LOCATION_LEN))?;

        if let Some(url) = &self.image_url {
            if url.trim().is_empty() {
                return Err(DomainError::validation("image_url cannot be blank"));
            }
        }

        if self.capacity < 1 {
            return Err(DomainError::validation("capacity must be at least 1"));
        }

        Ok(())
    }

    /// `true` once `now` is strictly after the event date.
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        now > self.date
    }
}

fn require_text(field: &str, value: &str, max_len: Option<usize>) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    if let Some(max) = max_len {
        if value.chars().count() > max {
            return Err(DomainError::validation(format!(
                "{field} cannot be longer than {max} characters"
            )));
        }
    }
    Ok(())
}
