use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use eventhall_catalog::Event;
use eventhall_core::{AggregateRoot, EventId, ExpectedVersion};

use super::query::EventFilter;
use super::r#trait::{EventStore, EventStoreError};

#[derive(Debug, Default)]
struct Records {
    by_id: HashMap<EventId, Event>,
    /// Insertion order, for `EventFilter::All`.
    order: Vec<EventId>,
}

/// In-memory event store.
///
/// Intended for tests/dev. Every write checks and mutates under a single
/// write-lock acquisition.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    records: RwLock<Records>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::Unavailable("lock poisoned".to_string())
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert(&self, event: &Event) -> Result<(), EventStoreError> {
        let id = event.id_typed();
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;

        if records.by_id.contains_key(&id) {
            return Err(EventStoreError::Duplicate(id));
        }

        records.by_id.insert(id, event.clone());
        records.order.push(id);
        Ok(())
    }

    async fn load(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.by_id.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: EventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventStoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;

        let mut events: Vec<Event> = records
            .order
            .iter()
            .filter_map(|id| records.by_id.get(id))
            .filter(|e| filter.matches(e, now))
            .cloned()
            .collect();
        filter.sort(&mut events);

        Ok(events)
    }

    async fn save(
        &self,
        event: &Event,
        expected_version: ExpectedVersion,
    ) -> Result<(), EventStoreError> {
        let id = event.id_typed();
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;

        let stored = records
            .by_id
            .get_mut(&id)
            .ok_or(EventStoreError::NotFound(id))?;

        let current = stored.version();
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        *stored = event.clone();
        Ok(())
    }

    async fn delete(&self, id: EventId) -> Result<bool, EventStoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;

        if records.by_id.remove(&id).is_none() {
            return Ok(false);
        }
        records.order.retain(|existing| *existing != id);
        Ok(true)
    }

    async fn exists(&self, id: EventId) -> Result<bool, EventStoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.by_id.contains_key(&id))
    }
}
