//! Capacity-constrained registration counter.
//!
//! [`RegistrationAdjuster`] is the one entry point for changing an event's
//! `registered` count. Both the delta path (`adjust`) and the booking path
//! (`increment_if_room` / `decrement_if_positive`) dispatch through the same
//! [`CommandDispatcher`], so they serialize on the same record version.

use std::sync::Arc;

use tracing::{info, instrument};

use eventhall_catalog::{AdjustRegistration, BookingDirection, ChangeBooking, EventCommand};
use eventhall_core::EventId;

use crate::command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
use crate::event_store::EventStore;

/// Outcome of an accepted registration change.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub event_id: EventId,
    pub registered: u32,
    pub capacity: u32,
    /// `false` when the change was accepted as a no-op (`delta == 0`, or a
    /// booking decrement at zero).
    pub changed: bool,
}

impl From<Dispatched> for Adjustment {
    fn from(value: Dispatched) -> Self {
        Self {
            event_id: value.event.id_typed(),
            registered: value.event.registered(),
            capacity: value.event.capacity(),
            changed: value.applied > 0,
        }
    }
}

#[derive(Debug)]
pub struct RegistrationAdjuster<S> {
    dispatcher: Arc<CommandDispatcher<S>>,
    max_delta: i32,
}

impl<S> Clone for RegistrationAdjuster<S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            max_delta: self.max_delta,
        }
    }
}

impl<S> RegistrationAdjuster<S>
where
    S: EventStore,
{
    /// `max_delta` bounds `|delta|` for a single `adjust` call.
    pub fn new(dispatcher: Arc<CommandDispatcher<S>>, max_delta: i32) -> Self {
        Self {
            dispatcher,
            max_delta: max_delta.saturating_abs(),
        }
    }

    pub fn max_delta(&self) -> i32 {
        self.max_delta
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher<S>> {
        &self.dispatcher
    }

    /// Apply a signed delta to `registered`.
    ///
    /// Rejected with `CapacityExceeded` when the result would leave
    /// `[0, capacity]`; the stored record is unchanged in that case.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn adjust(&self, event_id: EventId, delta: i32) -> Result<Adjustment, DispatchError> {
        if delta.unsigned_abs() > self.max_delta.unsigned_abs() {
            return Err(DispatchError::Validation(format!(
                "incrementBy must be between -{max} and {max}",
                max = self.max_delta
            )));
        }

        let command = EventCommand::AdjustRegistration(AdjustRegistration { event_id, delta });
        self.run(command).await
    }

    /// Add one registration, rejecting when the event is full.
    pub async fn increment_if_room(&self, event_id: EventId) -> Result<Adjustment, DispatchError> {
        self.change_booking(event_id, BookingDirection::Increment)
            .await
    }

    /// Remove one registration; at zero this is accepted and changes nothing.
    pub async fn decrement_if_positive(
        &self,
        event_id: EventId,
    ) -> Result<Adjustment, DispatchError> {
        self.change_booking(event_id, BookingDirection::Decrement)
            .await
    }

    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn change_booking(
        &self,
        event_id: EventId,
        direction: BookingDirection,
    ) -> Result<Adjustment, DispatchError> {
        let command = EventCommand::ChangeBooking(ChangeBooking {
            event_id,
            direction,
        });
        self.run(command).await
    }

    /// `registered < capacity` at the time of the read. Advisory only.
    pub async fn has_capacity(&self, event_id: EventId) -> Result<bool, DispatchError> {
        let event = self
            .dispatcher
            .store()
            .load(event_id)
            .await?
            .ok_or(DispatchError::NotFound)?;
        Ok(event.has_capacity())
    }

    async fn run(&self, command: EventCommand) -> Result<Adjustment, DispatchError> {
        match self.dispatcher.dispatch(command).await {
            Ok(dispatched) => Ok(dispatched.into()),
            Err(err @ DispatchError::CapacityExceeded { .. }) => {
                info!(error = %err, "registration change rejected");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use eventhall_catalog::{CreateEvent, EventDetails};

    use crate::event_store::InMemoryEventStore;
    use crate::retry::RetryPolicy;

    type Adjuster = RegistrationAdjuster<Arc<InMemoryEventStore>>;

    fn adjuster(max_attempts: u32) -> Adjuster {
        let dispatcher = CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            RetryPolicy::new(max_attempts, Duration::from_micros(50)),
        );
        RegistrationAdjuster::new(Arc::new(dispatcher), 100)
    }

    async fn event_with(adjuster: &Adjuster, capacity: u32, registered: i32) -> EventId {
        let event_id = EventId::new();
        adjuster
            .dispatcher()
            .dispatch(EventCommand::Create(CreateEvent {
                event_id,
                details: EventDetails {
                    title: "Alumni Night".to_string(),
                    description: "Networking".to_string(),
                    date: Utc::now() + chrono::Duration::days(10),
                    location: "Room 305".to_string(),
                    image_url: None,
                    capacity,
                },
            }))
            .await
            .unwrap();
        if registered != 0 {
            adjuster.adjust(event_id, registered).await.unwrap();
        }
        event_id
    }

    async fn stored_registered(adjuster: &Adjuster, event_id: EventId) -> (u32, u64) {
        use eventhall_core::AggregateRoot;
        let event = adjuster
            .dispatcher()
            .store()
            .load(event_id)
            .await
            .unwrap()
            .unwrap();
        (event.registered(), event.version())
    }

    #[tokio::test]
    async fn adjust_reports_the_new_count() {
        let adjuster = adjuster(8);
        let event_id = event_with(&adjuster, 100, 0).await;

        let out = adjuster.adjust(event_id, 7).await.unwrap();
        assert_eq!(out.registered, 7);
        assert_eq!(out.capacity, 100);
        assert!(out.changed);

        let out = adjuster.adjust(event_id, 0).await.unwrap();
        assert_eq!(out.registered, 7);
        assert!(!out.changed);
    }

    #[tokio::test]
    async fn adjust_rejects_deltas_beyond_the_limit() {
        let adjuster = adjuster(8);
        let event_id = event_with(&adjuster, 500, 0).await;

        for delta in [101, -101, i32::MIN] {
            let err = adjuster.adjust(event_id, delta).await.unwrap_err();
            assert!(matches!(err, DispatchError::Validation(_)), "{delta}: {err:?}");
        }
        assert!(adjuster.adjust(event_id, 100).await.is_ok());
        assert!(adjuster.adjust(event_id, -100).await.is_ok());
    }

    #[tokio::test]
    async fn rejected_adjustments_never_touch_stored_state() {
        let adjuster = adjuster(8);
        let event_id = event_with(&adjuster, 5, 5).await;
        let before = stored_registered(&adjuster, event_id).await;

        for _ in 0..3 {
            let err = adjuster.adjust(event_id, 1).await.unwrap_err();
            assert!(matches!(err, DispatchError::CapacityExceeded { .. }));
            let err = adjuster.adjust(event_id, -6).await.unwrap_err();
            assert!(matches!(err, DispatchError::CapacityExceeded { .. }));
        }

        assert_eq!(stored_registered(&adjuster, event_id).await, before);
    }

    #[tokio::test]
    async fn missing_events_are_not_found_not_capacity() {
        let adjuster = adjuster(8);
        let missing = EventId::new();

        assert!(matches!(
            adjuster.adjust(missing, 1).await,
            Err(DispatchError::NotFound)
        ));
        assert!(matches!(
            adjuster.has_capacity(missing).await,
            Err(DispatchError::NotFound)
        ));
        assert!(matches!(
            adjuster.increment_if_room(missing).await,
            Err(DispatchError::NotFound)
        ));
    }

    #[tokio::test]
    async fn has_capacity_is_false_exactly_when_full() {
        let adjuster = adjuster(8);
        let event_id = event_with(&adjuster, 3, 2).await;

        assert!(adjuster.has_capacity(event_id).await.unwrap());
        adjuster.adjust(event_id, 1).await.unwrap();
        assert!(!adjuster.has_capacity(event_id).await.unwrap());
        adjuster.adjust(event_id, -3).await.unwrap();
        assert!(adjuster.has_capacity(event_id).await.unwrap());
    }

    #[tokio::test]
    async fn booking_increment_rejects_and_decrement_clamps() {
        let adjuster = adjuster(8);
        let event_id = event_with(&adjuster, 1, 0).await;

        let out = adjuster.decrement_if_positive(event_id).await.unwrap();
        assert_eq!(out.registered, 0);
        assert!(!out.changed);

        adjuster.increment_if_room(event_id).await.unwrap();
        let err = adjuster.increment_if_room(event_id).await.unwrap_err();
        assert!(matches!(err, DispatchError::CapacityExceeded { .. }));

        let out = adjuster.decrement_if_positive(event_id).await.unwrap();
        assert_eq!(out.registered, 0);
        assert!(out.changed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn last_seat_goes_to_exactly_one_caller() {
        let adjuster = adjuster(8);
        let event_id = event_with(&adjuster, 100, 99).await;

        let a = tokio::spawn({
            let adjuster = adjuster.clone();
            async move { adjuster.adjust(event_id, 1).await }
        });
        let b = tokio::spawn({
            let adjuster = adjuster.clone();
            async move { adjuster.adjust(event_id, 1).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let applied = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(DispatchError::CapacityExceeded { .. })))
            .count();
        assert_eq!((applied, rejected), (1, 1));
        assert_eq!(stored_registered(&adjuster, event_id).await.0, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_decrement_at_zero_is_rejected() {
        let adjuster = adjuster(8);
        let event_id = event_with(&adjuster, 10, 0).await;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let adjuster = adjuster.clone();
                tokio::spawn(async move { adjuster.adjust(event_id, -1).await })
            })
            .collect();
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                Err(DispatchError::CapacityExceeded { .. })
            ));
        }
        assert_eq!(stored_registered(&adjuster, event_id).await, (0, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn oversubscription_admits_exactly_capacity() {
        const CAPACITY: u32 = 20;
        const CALLERS: usize = 60;

        // More attempts than seats: a caller only loses a CAS when someone else
        // committed, and at most CAPACITY commits can happen.
        let adjuster = adjuster(CAPACITY + 8);
        let event_id = event_with(&adjuster, CAPACITY, 0).await;

        let handles: Vec<_> = (0..CALLERS)
            .map(|i| {
                let adjuster = adjuster.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        adjuster.adjust(event_id, 1).await
                    } else {
                        adjuster.increment_if_room(event_id).await
                    }
                })
            })
            .collect();

        let mut applied = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => applied += 1,
                Err(DispatchError::CapacityExceeded { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(applied, CAPACITY as usize);
        assert_eq!(rejected, CALLERS - CAPACITY as usize);
        let (registered, version) = stored_registered(&adjuster, event_id).await;
        assert_eq!(registered, CAPACITY);
        assert_eq!(version, 1 + u64::from(CAPACITY));
    }
}
