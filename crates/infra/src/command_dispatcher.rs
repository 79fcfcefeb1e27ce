//! Command execution pipeline (application-level orchestration).
//!
//! Every mutation of an event record goes through [`CommandDispatcher`]:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the record and its version
//!   ↓
//! 2. Handle command (pure decision logic, produces changes)
//!   ↓
//! 3. Apply changes to a copy
//!   ↓
//! 4. Save with compare-and-swap on the loaded version
//!   ↓  (version moved underneath us)
//! 5. Back off, reload, re-decide, up to `RetryPolicy::max_attempts`
//! ```
//!
//! Full-record updates, registration deltas and booking changes share this one
//! path, so the record version is the single coordination point per event.
//! A decision that fails (capacity, validation, not found) is returned as-is and
//! never retried; only version conflicts are.

use thiserror::Error;
use tracing::{debug, instrument, warn};

use eventhall_catalog::{Event, EventCommand};
use eventhall_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion};

use crate::event_store::{EventStore, EventStoreError};
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No event with the requested id.
    #[error("event not found")]
    NotFound,
    /// The change would leave `registered` outside `[0, capacity]`. Definitive.
    #[error("capacity exceeded: {requested} requested, {registered}/{capacity} registered")]
    CapacityExceeded {
        capacity: u32,
        registered: u32,
        requested: i64,
    },
    /// Domain validation failure (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),
    /// Domain invariant failure (deterministic).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// The record already exists.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Version conflicts outlasted the retry budget. Transient.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// The store failed (unavailable, corrupt row).
    #[error("store error: {0}")]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::NotFound(_) => DispatchError::NotFound,
            EventStoreError::Duplicate(id) => {
                DispatchError::Conflict(format!("event {id} already exists"))
            }
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::CapacityExceeded {
                capacity,
                registered,
                requested,
            } => DispatchError::CapacityExceeded {
                capacity,
                registered,
                requested,
            },
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// The record as stored after the command.
    pub event: Event,
    /// Number of changes committed. Zero when the command was accepted as a no-op.
    pub applied: usize,
    /// How many attempts the compare-and-swap loop took.
    pub attempts: u32,
}

/// Runs event commands against an [`EventStore`] with optimistic concurrency.
#[derive(Debug)]
pub struct CommandDispatcher<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> CommandDispatcher<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl<S> CommandDispatcher<S>
where
    S: EventStore,
{
    /// Dispatch a command, retrying on version conflicts.
    ///
    /// `Create` inserts a new record; a concurrent insert of the same id is
    /// treated like a version conflict, so the retry observes the winner and
    /// reports `Conflict`. Every other command requires the record to exist.
    ///
    /// Returns `DispatchError::Concurrency` only after `max_attempts` consecutive
    /// conflicts; the stored record is untouched by this call in that case.
    #[instrument(
        skip(self, command),
        fields(command = command.name(), event_id = %command.event_id()),
        err
    )]
    pub async fn dispatch(&self, command: EventCommand) -> Result<Dispatched, DispatchError> {
        let event_id = command.event_id();
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            // 1) Load current state (absent records start empty)
            let loaded = self.store.load(event_id).await?;
            let exists = loaded.is_some();
            let current = loaded.unwrap_or_else(|| Event::empty(event_id));

            // 2) Decide (no mutation)
            let changes = current.handle(&command).map_err(DispatchError::from)?;
            if changes.is_empty() {
                return Ok(Dispatched {
                    event: current,
                    applied: 0,
                    attempts: attempt + 1,
                });
            }

            // 3) Apply to a copy
            let expected = ExpectedVersion::Exact(current.version());
            let mut next = current;
            for change in &changes {
                next.apply(change);
            }

            // 4) Compare-and-swap
            let written = if exists {
                self.store.save(&next, expected).await
            } else {
                self.store.insert(&next).await
            };

            match written {
                Ok(()) => {
                    debug!(
                        attempt = attempt + 1,
                        version = next.version(),
                        registered = next.registered(),
                        "command committed"
                    );
                    return Ok(Dispatched {
                        event: next,
                        applied: changes.len(),
                        attempts: attempt + 1,
                    });
                }
                Err(EventStoreError::Concurrency(_) | EventStoreError::Duplicate(_)) => {
                    if attempt + 1 == max_attempts {
                        break;
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "version conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DispatchError::Concurrency(format!(
            "gave up on event {event_id} after {max_attempts} conflicting attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use eventhall_catalog::{AdjustRegistration, CreateEvent, EventDetails, UpdateEvent};
    use eventhall_core::EventId;

    use crate::event_store::{EventFilter, InMemoryEventStore};

    fn details(capacity: u32) -> EventDetails {
        EventDetails {
            title: "Hack Night".to_string(),
            description: "Bring a laptop".to_string(),
            date: Utc::now() + chrono::Duration::days(1),
            location: "Lab 4".to_string(),
            image_url: None,
            capacity,
        }
    }

    fn dispatcher() -> CommandDispatcher<Arc<InMemoryEventStore>> {
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            RetryPolicy::new(8, Duration::from_millis(1)),
        )
    }

    async fn create(
        dispatcher: &CommandDispatcher<Arc<InMemoryEventStore>>,
        capacity: u32,
    ) -> EventId {
        let event_id = EventId::new();
        dispatcher
            .dispatch(EventCommand::Create(CreateEvent {
                event_id,
                details: details(capacity),
            }))
            .await
            .unwrap();
        event_id
    }

    #[tokio::test]
    async fn create_then_adjust_persists_each_step() {
        let dispatcher = dispatcher();
        let event_id = create(&dispatcher, 10).await;

        let out = dispatcher
            .dispatch(EventCommand::AdjustRegistration(AdjustRegistration {
                event_id,
                delta: 4,
            }))
            .await
            .unwrap();
        assert_eq!(out.applied, 1);
        assert_eq!(out.attempts, 1);

        let stored = dispatcher.store().load(event_id).await.unwrap().unwrap();
        assert_eq!(stored.registered(), 4);
        assert_eq!(stored.version(), 2);
    }

    #[tokio::test]
    async fn creating_an_existing_id_is_a_conflict() {
        let dispatcher = dispatcher();
        let event_id = create(&dispatcher, 10).await;

        let err = dispatcher
            .dispatch(EventCommand::Create(CreateEvent {
                event_id,
                details: details(10),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[tokio::test]
    async fn commands_for_missing_events_are_not_found() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .dispatch(EventCommand::AdjustRegistration(AdjustRegistration {
                event_id: EventId::new(),
                delta: 1,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));
    }

    #[tokio::test]
    async fn rejected_commands_leave_the_record_untouched() {
        let dispatcher = dispatcher();
        let event_id = create(&dispatcher, 3).await;

        let err = dispatcher
            .dispatch(EventCommand::AdjustRegistration(AdjustRegistration {
                event_id,
                delta: 4,
            }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::CapacityExceeded {
                capacity: 3,
                registered: 0,
                requested: 4
            }
        ));

        let stored = dispatcher.store().load(event_id).await.unwrap().unwrap();
        assert_eq!(stored.registered(), 0);
        assert_eq!(stored.version(), 1);
    }

    /// Store that reports a version conflict on the first `n` saves.
    struct Contended {
        inner: InMemoryEventStore,
        conflicts_left: AtomicU32,
    }

    #[async_trait::async_trait]
    impl EventStore for Contended {
        async fn insert(&self, event: &Event) -> Result<(), EventStoreError> {
            self.inner.insert(event).await
        }

        async fn load(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
            self.inner.load(id).await
        }

        async fn list(
            &self,
            filter: EventFilter,
            now: DateTime<Utc>,
        ) -> Result<Vec<Event>, EventStoreError> {
            self.inner.list(filter, now).await
        }

        async fn save(
            &self,
            event: &Event,
            expected_version: ExpectedVersion,
        ) -> Result<(), EventStoreError> {
            let left = self.conflicts_left.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts_left.store(left - 1, Ordering::SeqCst);
                return Err(EventStoreError::Concurrency("simulated".to_string()));
            }
            self.inner.save(event, expected_version).await
        }

        async fn delete(&self, id: EventId) -> Result<bool, EventStoreError> {
            self.inner.delete(id).await
        }
    }

    async fn contended(conflicts: u32, max_attempts: u32) -> (CommandDispatcher<Contended>, EventId) {
        let store = Contended {
            inner: InMemoryEventStore::new(),
            conflicts_left: AtomicU32::new(conflicts),
        };
        let event = Event::create(EventId::new(), details(10)).unwrap();
        store.insert(&event).await.unwrap();
        (
            CommandDispatcher::new(store, RetryPolicy::new(max_attempts, Duration::ZERO)),
            event.id_typed(),
        )
    }

    #[tokio::test]
    async fn retries_through_transient_conflicts() {
        let (dispatcher, event_id) = contended(2, 3).await;

        let out = dispatcher
            .dispatch(EventCommand::AdjustRegistration(AdjustRegistration {
                event_id,
                delta: 1,
            }))
            .await
            .unwrap();
        assert_eq!(out.attempts, 3);
        assert_eq!(out.event.registered(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (dispatcher, event_id) = contended(5, 3).await;

        let err = dispatcher
            .dispatch(EventCommand::AdjustRegistration(AdjustRegistration {
                event_id,
                delta: 1,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));

        let stored = dispatcher.store().load(event_id).await.unwrap().unwrap();
        assert_eq!(stored.registered(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_update_and_adjust_lose_nothing() {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            RetryPolicy::new(64, Duration::from_micros(100)),
        ));
        let event_id = create(&dispatcher, 10).await;

        let mut renamed = details(50);
        renamed.title = "Hack Night XL".to_string();

        let adjusts: Vec<_> = (0..20)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    dispatcher
                        .dispatch(EventCommand::AdjustRegistration(AdjustRegistration {
                            event_id,
                            delta: 1,
                        }))
                        .await
                })
            })
            .collect();
        let update = {
            let dispatcher = Arc::clone(&dispatcher);
            let renamed = renamed.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(EventCommand::Update(UpdateEvent {
                        event_id,
                        details: renamed,
                    }))
                    .await
            })
        };

        let mut applied = 0u32;
        for handle in adjusts {
            match handle.await.unwrap() {
                Ok(_) => applied += 1,
                Err(DispatchError::CapacityExceeded { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        update.await.unwrap().unwrap();

        let stored = dispatcher.store().load(event_id).await.unwrap().unwrap();
        assert_eq!(stored.details(), &renamed);
        assert_eq!(stored.registered(), applied);
        assert!(stored.registered() <= stored.capacity());
        // Every committed change bumped the version exactly once.
        assert_eq!(stored.version(), 1 + u64::from(applied) + 1);
    }
}
