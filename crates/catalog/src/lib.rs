//! Event catalog domain module.
//!
//! This crate contains the business rules for scheduled events and their
//! registration counter, implemented purely as deterministic domain logic
//! (no IO, no HTTP, no storage).

pub mod details;
pub mod event;

pub use details::{DATE_PRECISION_DIGITS, EventDetails, MAX_LOCATION_LEN, MAX_TITLE_LEN};
pub use event::{
    AdjustRegistration, BookingDirection, ChangeBooking, CreateEvent, DetailsReplaced, Event,
    EventChange, EventCommand, EventCreated, RegistrationChanged, UpdateEvent,
};
