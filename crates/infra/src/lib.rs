//! Infrastructure layer: storage backends, the command pipeline, the
//! registration adjuster, configuration and demo data.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod registration;
pub mod retry;
pub mod seed;
