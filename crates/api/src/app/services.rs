use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;

use eventhall_catalog::{Event, EventCommand};
use eventhall_core::{Clock, EventId, SystemClock};
use eventhall_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError, Dispatched},
    config::{AppConfig, RegistrationConfig},
    event_store::{EventFilter, EventStore, InMemoryEventStore, PostgresEventStore},
    registration::RegistrationAdjuster,
    seed,
};

/// Shared store handle; `Arc<dyn EventStore>` is itself an `EventStore`.
pub type DynEventStore = Arc<dyn EventStore>;

/// Infrastructure wiring shared by all handlers.
pub struct AppServices {
    store: DynEventStore,
    dispatcher: Arc<CommandDispatcher<DynEventStore>>,
    adjuster: RegistrationAdjuster<DynEventStore>,
    clock: Arc<dyn Clock>,
}

impl AppServices {
    pub fn new(store: DynEventStore, registration: &RegistrationConfig, clock: Arc<dyn Clock>) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&store),
            registration.retry_policy(),
        ));
        let adjuster = RegistrationAdjuster::new(Arc::clone(&dispatcher), registration.max_delta);

        Self {
            store,
            dispatcher,
            adjuster,
            clock,
        }
    }

    /// In-memory store, default registration settings, wall clock.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryEventStore::new()),
            &RegistrationConfig::default(),
            Arc::new(SystemClock),
        )
    }

    pub fn store(&self) -> &DynEventStore {
        &self.store
    }

    pub fn adjuster(&self) -> &RegistrationAdjuster<DynEventStore> {
        &self.adjuster
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn dispatch(&self, command: EventCommand) -> Result<Dispatched, DispatchError> {
        self.dispatcher.dispatch(command).await
    }

    pub async fn load(&self, id: EventId) -> Result<Event, DispatchError> {
        self.store.load(id).await?.ok_or(DispatchError::NotFound)
    }

    pub async fn list(&self, filter: EventFilter) -> Result<Vec<Event>, DispatchError> {
        Ok(self.store.list(filter, self.now()).await?)
    }

    pub async fn delete(&self, id: EventId) -> Result<(), DispatchError> {
        if self.store.delete(id).await? {
            Ok(())
        } else {
            Err(DispatchError::NotFound)
        }
    }
}

/// Build services from configuration.
///
/// - `DATABASE_URL` set: Postgres store (schema created if missing)
/// - otherwise: in-memory store
///
/// Demo events are inserted when `seed_demo` is enabled.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store: DynEventStore = match &config.database {
        Some(db) => {
            let pool = PgPoolOptions::new()
                .max_connections(db.max_connections)
                .connect(&db.url)
                .await
                .context("failed to connect to Postgres")?;
            let store = PostgresEventStore::new(pool);
            store
                .ensure_schema()
                .await
                .context("failed to create events schema")?;
            tracing::info!("using Postgres event store");
            Arc::new(store)
        }
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
    };

    let services = AppServices::new(store, &config.registration, Arc::new(SystemClock));

    if config.seed_demo {
        seed::seed_demo_events(services.store().as_ref(), services.now())
            .await
            .context("failed to seed demo events")?;
    }

    Ok(services)
}
