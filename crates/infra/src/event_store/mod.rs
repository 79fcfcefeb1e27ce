//! Keyed storage of event records.
//!
//! The store is the leaf dependency of the registration path: it offers plain
//! CRUD plus a version compare-and-swap (`save`), and nothing else.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventFilter;
pub use r#trait::{EventStore, EventStoreError};
