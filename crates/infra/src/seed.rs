//! Demo catalog inserted at startup when `EVENTHALL_SEED_DEMO` is set.

use chrono::{DateTime, Duration, Months, SubsecRound, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use eventhall_catalog::{Event, EventDetails};
use eventhall_core::{DomainError, EventId};

use crate::event_store::{EventStore, EventStoreError};

pub const TECH_CONFERENCE_ID: Uuid = Uuid::from_u128(0xb0788d2f_8003_43c1_92a4_edc76a7c5dde);
pub const CAREER_FAIR_ID: Uuid = Uuid::from_u128(0x6313179f_7837_473a_a4d5_a5571b43e6a6);
pub const ALUMNI_NIGHT_ID: Uuid = Uuid::from_u128(0xbf3f3002_7e53_441e_8b76_f6280be284aa);

fn months_from(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_add_months(Months::new(months))
        .unwrap_or(now + Duration::days(30 * i64::from(months)))
}

/// The three demo events, dated relative to `now`.
pub fn demo_events(now: DateTime<Utc>) -> Result<Vec<Event>, DomainError> {
    let now = now.trunc_subsecs(eventhall_catalog::DATE_PRECISION_DIGITS);
    let tech = Event::create(
        EventId::from_uuid(TECH_CONFERENCE_ID),
        EventDetails {
            title: "Technology Conference 2025".to_string(),
            description: "Annual technology conference covering AI, ML, and cloud technologies."
                .to_string(),
            date: months_from(now, 1),
            location: "Main Campus Auditorium".to_string(),
            image_url: Some("https://example.com/images/tech-conf.jpg".to_string()),
            capacity: 200,
        },
    )?;

    let fair = Event::create(
        EventId::from_uuid(CAREER_FAIR_ID),
        EventDetails {
            title: "Career Fair".to_string(),
            description: "Connect with over 50 employers looking to hire students and graduates."
                .to_string(),
            date: months_from(now, 2),
            location: "Student Union Building".to_string(),
            image_url: Some("https://example.com/images/career-fair.jpg".to_string()),
            capacity: 500,
        },
    )?;

    // Already happened, mostly full.
    let alumni = Event::restore(
        EventId::from_uuid(ALUMNI_NIGHT_ID),
        EventDetails {
            title: "Alumni Networking Night".to_string(),
            description: "Connect with successful alumni and build your professional network."
                .to_string(),
            date: now - Duration::days(30),
            location: "Business School, Room 305".to_string(),
            image_url: Some("https://example.com/images/alumni-event.jpg".to_string()),
            capacity: 100,
        },
        89,
        1,
    )?;

    Ok(vec![tech, fair, alumni])
}

/// Insert the demo events that are not already stored.
///
/// Returns how many were inserted; re-running against a persistent store is a no-op.
pub async fn seed_demo_events<S>(store: &S, now: DateTime<Utc>) -> Result<usize, EventStoreError>
where
    S: EventStore + ?Sized,
{
    let events = demo_events(now).map_err(|e| EventStoreError::InvalidData(e.to_string()))?;

    let mut inserted = 0;
    for event in &events {
        match store.insert(event).await {
            Ok(()) => inserted += 1,
            Err(EventStoreError::Duplicate(id)) => debug!(event_id = %id, "demo event already present"),
            Err(err) => return Err(err),
        }
    }

    info!(inserted, "demo events seeded");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{EventFilter, InMemoryEventStore};

    #[tokio::test]
    async fn seeds_once() {
        let store = InMemoryEventStore::new();
        let now = Utc::now();

        assert_eq!(seed_demo_events(&store, now).await.unwrap(), 3);
        assert_eq!(seed_demo_events(&store, now).await.unwrap(), 0);

        let upcoming = store.list(EventFilter::Upcoming, now).await.unwrap();
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].id_typed(), EventId::from_uuid(TECH_CONFERENCE_ID));

        let past = store.list(EventFilter::Past, now).await.unwrap();
        assert_eq!(past.len(), 1);
        assert_eq!(past[0].registered(), 89);
        assert!(past[0].has_capacity());
    }
}
