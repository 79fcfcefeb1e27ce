use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventhall_core::{Aggregate, AggregateRoot, DomainError, DomainResult, EventId};

use crate::details::EventDetails;

/// Aggregate root: a scheduled event with a bounded registration counter.
///
/// Invariant: `0 <= registered <= details.capacity` for every instance that can
/// be observed outside this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    id: EventId,
    details: EventDetails,
    registered: u32,
    version: u64,
    created: bool,
}

impl Event {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: EventId) -> Self {
        Self {
            id,
            details: EventDetails::default(),
            registered: 0,
            version: 0,
            created: false,
        }
    }

    /// Run the create command against an empty aggregate and return the result.
    pub fn create(id: EventId, details: EventDetails) -> DomainResult<Self> {
        let mut event = Self::empty(id);
        let changes = event.handle(&EventCommand::Create(CreateEvent {
            event_id: id,
            details,
        }))?;
        for change in &changes {
            event.apply(change);
        }
        Ok(event)
    }

    /// Rebuild an aggregate from persisted state.
    ///
    /// Only the counter invariant is checked here; details are trusted as they
    /// were validated when written.
    pub fn restore(
        id: EventId,
        details: EventDetails,
        registered: u32,
        version: u64,
    ) -> DomainResult<Self> {
        if details.capacity < 1 {
            return Err(DomainError::invariant(format!(
                "event {id} has capacity {}",
                details.capacity
            )));
        }
        if registered > details.capacity {
            return Err(DomainError::invariant(format!(
                "event {id} has {registered} registered over capacity {}",
                details.capacity
            )));
        }
        if version == 0 {
            return Err(DomainError::invariant(format!(
                "event {id} was persisted without a version"
            )));
        }

        Ok(Self {
            id,
            details,
            registered,
            version,
            created: true,
        })
    }

    pub fn id_typed(&self) -> EventId {
        self.id
    }

    pub fn details(&self) -> &EventDetails {
        &self.details
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.details.date
    }

    pub fn capacity(&self) -> u32 {
        self.details.capacity
    }

    pub fn registered(&self) -> u32 {
        self.registered
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn has_capacity(&self) -> bool {
        self.registered < self.details.capacity
    }

    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.details.is_past(now)
    }
}

impl AggregateRoot for Event {
    type Id = EventId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateEvent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEvent {
    pub event_id: EventId,
    pub details: EventDetails,
}

/// Command: UpdateEvent (full replace of the client-editable details).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub event_id: EventId,
    pub details: EventDetails,
}

/// Command: AdjustRegistration by a signed delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustRegistration {
    pub event_id: EventId,
    pub delta: i32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingDirection {
    Increment,
    Decrement,
}

/// Command: ChangeBooking by one seat.
///
/// Increment is rejected when full; decrement at zero is accepted and changes
/// nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBooking {
    pub event_id: EventId,
    pub direction: BookingDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCommand {
    Create(CreateEvent),
    Update(UpdateEvent),
    AdjustRegistration(AdjustRegistration),
    ChangeBooking(ChangeBooking),
}

impl EventCommand {
    pub fn event_id(&self) -> EventId {
        match self {
            EventCommand::Create(c) => c.event_id,
            EventCommand::Update(c) => c.event_id,
            EventCommand::AdjustRegistration(c) => c.event_id,
            EventCommand::ChangeBooking(c) => c.event_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventCommand::Create(_) => "event.create",
            EventCommand::Update(_) => "event.update",
            EventCommand::AdjustRegistration(_) => "event.adjust_registration",
            EventCommand::ChangeBooking(_) => "event.change_booking",
        }
    }
}

/// Change: EventCreated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCreated {
    pub event_id: EventId,
    pub details: EventDetails,
}

/// Change: DetailsReplaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailsReplaced {
    pub event_id: EventId,
    pub details: EventDetails,
}

/// Change: RegistrationChanged (absolute new count, with the previous one for logs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationChanged {
    pub event_id: EventId,
    pub previous: u32,
    pub registered: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventChange {
    Created(EventCreated),
    DetailsReplaced(DetailsReplaced),
    RegistrationChanged(RegistrationChanged),
}

impl Aggregate for Event {
    type Command = EventCommand;
    type Change = EventChange;
    type Error = DomainError;

    fn apply(&mut self, change: &Self::Change) {
        match change {
            EventChange::Created(c) => {
                self.id = c.event_id;
                self.details = c.details.clone();
                self.registered = 0;
                self.created = true;
            }
            EventChange::DetailsReplaced(c) => {
                self.details = c.details.clone();
            }
            EventChange::RegistrationChanged(c) => {
                self.registered = c.registered;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Change>, Self::Error> {
        match command {
            EventCommand::Create(cmd) => self.handle_create(cmd),
            EventCommand::Update(cmd) => self.handle_update(cmd),
            EventCommand::AdjustRegistration(cmd) => self.handle_adjust(cmd),
            EventCommand::ChangeBooking(cmd) => self.handle_booking(cmd),
        }
    }
}

impl Event {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_event_id(&self, event_id: EventId) -> Result<(), DomainError> {
        if self.id != event_id {
            return Err(DomainError::invariant("event_id mismatch"));
        }
        Ok(())
    }

    fn registration_change(&self, requested: i64) -> Result<EventChange, DomainError> {
        let registered = u32::try_from(requested)
            .ok()
            .filter(|r| *r <= self.details.capacity)
            .ok_or_else(|| {
                DomainError::capacity_exceeded(self.details.capacity, self.registered, requested)
            })?;

        Ok(EventChange::RegistrationChanged(RegistrationChanged {
            event_id: self.id,
            previous: self.registered,
            registered,
        }))
    }

    fn handle_create(&self, cmd: &CreateEvent) -> Result<Vec<EventChange>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("event already exists"));
        }
        self.ensure_event_id(cmd.event_id)?;
        let details = cmd.details.normalized();
        details.validate()?;

        Ok(vec![EventChange::Created(EventCreated {
            event_id: cmd.event_id,
            details,
        })])
    }

    fn handle_update(&self, cmd: &UpdateEvent) -> Result<Vec<EventChange>, DomainError> {
        self.ensure_created()?;
        self.ensure_event_id(cmd.event_id)?;
        let details = cmd.details.normalized();
        details.validate()?;

        if details.capacity < self.registered {
            return Err(DomainError::capacity_exceeded(
                details.capacity,
                self.registered,
                i64::from(self.registered),
            ));
        }
        if details == self.details {
            return Ok(vec![]);
        }

        Ok(vec![EventChange::DetailsReplaced(DetailsReplaced {
            event_id: cmd.event_id,
            details,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustRegistration) -> Result<Vec<EventChange>, DomainError> {
        self.ensure_created()?;
        self.ensure_event_id(cmd.event_id)?;

        if cmd.delta == 0 {
            return Ok(vec![]);
        }

        let requested = i64::from(self.registered) + i64::from(cmd.delta);
        Ok(vec![self.registration_change(requested)?])
    }

    fn handle_booking(&self, cmd: &ChangeBooking) -> Result<Vec<EventChange>, DomainError> {
        self.ensure_created()?;
        self.ensure_event_id(cmd.event_id)?;

        match cmd.direction {
            BookingDirection::Increment => {
                let requested = i64::from(self.registered) + 1;
                Ok(vec![self.registration_change(requested)?])
            }
            // Decrementing an empty event is a no-op rather than a rejection.
            BookingDirection::Decrement if self.registered == 0 => Ok(vec![]),
            BookingDirection::Decrement => {
                let requested = i64::from(self.registered) - 1;
                Ok(vec![self.registration_change(requested)?])
            }
        }
    }
}
