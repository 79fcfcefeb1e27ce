//! Listing filters for the event catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventhall_catalog::Event;

/// Which part of the catalog to list, relative to a supplied `now`.
///
/// - `All`: every event, in storage (insertion) order
/// - `Upcoming`: `date > now`, soonest first
/// - `Past`: `date <= now`, most recent first
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
    #[default]
    All,
    Upcoming,
    Past,
}

impl EventFilter {
    /// Map the HTTP `isPast` query flag onto a filter.
    pub fn from_is_past(is_past: Option<bool>) -> Self {
        match is_past {
            None => EventFilter::All,
            Some(true) => EventFilter::Past,
            Some(false) => EventFilter::Upcoming,
        }
    }

    pub fn matches(self, event: &Event, now: DateTime<Utc>) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Upcoming => event.date() > now,
            EventFilter::Past => event.date() <= now,
        }
    }

    /// Order an already-filtered list the way this filter promises.
    pub fn sort(self, events: &mut [Event]) {
        match self {
            EventFilter::All => {}
            EventFilter::Upcoming => events.sort_by_key(Event::date),
            EventFilter::Past => events.sort_by_key(|e| std::cmp::Reverse(e.date())),
        }
    }
}
