use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use eventhall_catalog::Event;
use eventhall_core::{EventId, ExpectedVersion};

use super::query::EventFilter;

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, capacity).
///
/// ## Error Categories
///
/// - **Concurrency**: compare-and-swap on the record version failed
/// - **NotFound**: no record with the requested id
/// - **Duplicate**: insert of an id that already exists
/// - **InvalidData**: a stored row does not form a valid record
/// - **Unavailable**: the backend could not be reached (pool closed, IO, lock poisoned)
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("event not found: {0}")]
    NotFound(EventId),

    #[error("event already exists: {0}")]
    Duplicate(EventId),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed storage of [`Event`] records.
///
/// ## Write Semantics
///
/// - `insert` persists a freshly created record (version 1) and fails with
///   `Duplicate` if the id is taken.
/// - `save` is the compare-and-swap primitive: it replaces the stored record only
///   when the stored version matches `expected_version`, and writes the new
///   record's version. A mismatch is `Concurrency`; a missing row is `NotFound`.
/// - `delete` is a hard delete and reports whether a row was removed.
///
/// Every write is a single atomic step, so a dropped future leaves the record
/// either fully written or untouched.
///
/// ## Read Semantics
///
/// Reads observe every write that completed before them (single node).
/// `list` evaluates the upcoming/past split against the supplied `now`.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(&self, event: &Event) -> Result<(), EventStoreError>;

    async fn load(&self, id: EventId) -> Result<Option<Event>, EventStoreError>;

    async fn list(
        &self,
        filter: EventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventStoreError>;

    async fn save(
        &self,
        event: &Event,
        expected_version: ExpectedVersion,
    ) -> Result<(), EventStoreError>;

    async fn delete(&self, id: EventId) -> Result<bool, EventStoreError>;

    async fn exists(&self, id: EventId) -> Result<bool, EventStoreError> {
        Ok(self.load(id).await?.is_some())
    }
}

#[async_trait::async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn insert(&self, event: &Event) -> Result<(), EventStoreError> {
        (**self).insert(event).await
    }

    async fn load(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        (**self).load(id).await
    }

    async fn list(
        &self,
        filter: EventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventStoreError> {
        (**self).list(filter, now).await
    }

    async fn save(
        &self,
        event: &Event,
        expected_version: ExpectedVersion,
    ) -> Result<(), EventStoreError> {
        (**self).save(event, expected_version).await
    }

    async fn delete(&self, id: EventId) -> Result<bool, EventStoreError> {
        (**self).delete(id).await
    }

    async fn exists(&self, id: EventId) -> Result<bool, EventStoreError> {
        (**self).exists(id).await
    }
}
