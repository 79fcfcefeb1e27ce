//! Postgres-backed event store implementation.
//!
//! One row per event. The `version` column is the compare-and-swap token: a save
//! is a single `UPDATE ... WHERE id = $1 AND version = $expected`, so the check
//! and the write are one statement.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) | `23505` | `Duplicate` / `Concurrency` | Insert of an existing id |
//! | Database (check constraint violation) | `23514` | `InvalidData` | Row would break `0 <= registered <= capacity` |
//! | Database (other) | Any other | `InvalidData` | Other database errors |
//! | PoolClosed / Io / PoolTimedOut | N/A | `Unavailable` | Backend unreachable |
//! | Other | N/A | `Unavailable` | Network errors, TLS, protocol |

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use eventhall_catalog::{Event, EventDetails};
use eventhall_core::{AggregateRoot, EventId, ExpectedVersion};

use super::query::EventFilter;
use super::r#trait::{EventStore, EventStoreError};

const SELECT_COLUMNS: &str = r#"
    SELECT id, title, description, date, location, image_url, capacity, registered, version
    FROM events
"#;

/// Postgres-backed event store.
///
/// The table carries `CHECK` constraints for the capacity invariant, so the
/// database rejects an out-of-bounds row even if a caller bypasses the domain.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    /// Create a new PostgresEventStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `events` table and its date index if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq BIGSERIAL NOT NULL,
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                date TIMESTAMPTZ NOT NULL,
                location TEXT NOT NULL,
                image_url TEXT,
                capacity INTEGER NOT NULL CHECK (capacity >= 1),
                registered INTEGER NOT NULL,
                version BIGINT NOT NULL CHECK (version >= 1),
                CONSTRAINT events_registered_within_capacity
                    CHECK (registered >= 0 AND registered <= capacity)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS events_date_idx ON events (date)")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_index", e))?;

        Ok(())
    }

    async fn fetch_version(&self, id: EventId) -> Result<Option<u64>, EventStoreError> {
        let row = sqlx::query("SELECT version FROM events WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_version", e))?;

        row.map(|row| {
            let version: i64 = row
                .try_get("version")
                .map_err(|e| EventStoreError::InvalidData(format!("failed to read version: {e}")))?;
            to_u64("version", version)
        })
        .transpose()
    }
}

#[async_trait::async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self, event), fields(event_id = %event.id_typed()), err)]
    async fn insert(&self, event: &Event) -> Result<(), EventStoreError> {
        let details = event.details();

        sqlx::query(
            r#"
            INSERT INTO events (
                id, title, description, date, location, image_url, capacity, registered, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id_typed().as_uuid())
        .bind(&details.title)
        .bind(&details.description)
        .bind(details.date)
        .bind(&details.location)
        .bind(details.image_url.as_deref())
        .bind(to_i32("capacity", details.capacity)?)
        .bind(to_i32("registered", event.registered())?)
        .bind(to_i64("version", event.version())?)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                EventStoreError::Duplicate(event.id_typed())
            } else {
                map_sqlx_error("insert_event", e)
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(event_id = %id), err)]
    async fn load(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_event", e))?;

        row.map(|row| decode_row(&row)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(
        &self,
        filter: EventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventStoreError> {
        let clause = match filter {
            EventFilter::All => "ORDER BY seq ASC",
            EventFilter::Upcoming => "WHERE date > $1 ORDER BY date ASC, seq ASC",
            EventFilter::Past => "WHERE date <= $1 ORDER BY date DESC, seq ASC",
        };
        let sql = format!("{SELECT_COLUMNS} {clause}");

        let mut query = sqlx::query(&sql);
        if filter != EventFilter::All {
            query = query.bind(now);
        }

        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_events", e))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(
        skip(self, event),
        fields(
            event_id = %event.id_typed(),
            expected_version = ?expected_version,
            new_version = event.version()
        ),
        err
    )]
    async fn save(
        &self,
        event: &Event,
        expected_version: ExpectedVersion,
    ) -> Result<(), EventStoreError> {
        let details = event.details();
        let expected = match expected_version {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(to_i64("expected_version", v)?),
        };

        let result = sqlx::query(
            r#"
            UPDATE events
            SET title = $2,
                description = $3,
                date = $4,
                location = $5,
                image_url = $6,
                capacity = $7,
                registered = $8,
                version = $9
            WHERE id = $1 AND ($10::BIGINT IS NULL OR version = $10)
            "#,
        )
        .bind(event.id_typed().as_uuid())
        .bind(&details.title)
        .bind(&details.description)
        .bind(details.date)
        .bind(&details.location)
        .bind(details.image_url.as_deref())
        .bind(to_i32("capacity", details.capacity)?)
        .bind(to_i32("registered", event.registered())?)
        .bind(to_i64("version", event.version())?)
        .bind(expected)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_event", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Nothing matched: either the row is gone or another writer moved the version.
        match self.fetch_version(event.id_typed()).await? {
            None => Err(EventStoreError::NotFound(event.id_typed())),
            Some(current) => Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            ))),
        }
    }

    #[instrument(skip(self), fields(event_id = %id), err)]
    async fn delete(&self, id: EventId) -> Result<bool, EventStoreError> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_event", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(event_id = %id), err)]
    async fn exists(&self, id: EventId) -> Result<bool, EventStoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM events WHERE id = $1) AS present")
            .bind(id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("exists_event", e))?;

        row.try_get("present")
            .map_err(|e| EventStoreError::InvalidData(format!("failed to read exists: {e}")))
    }
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            // 23514 (check violation) lands in InvalidData with everything else.
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                _ => EventStoreError::InvalidData(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            EventStoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => EventStoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            EventStoreError::InvalidData(format!("decode error in {operation}: {err}"))
        }
        _ => EventStoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn to_i32(field: &str, value: u32) -> Result<i32, EventStoreError> {
    i32::try_from(value)
        .map_err(|_| EventStoreError::InvalidData(format!("{field} {value} does not fit INTEGER")))
}

fn to_i64(field: &str, value: u64) -> Result<i64, EventStoreError> {
    i64::try_from(value)
        .map_err(|_| EventStoreError::InvalidData(format!("{field} {value} does not fit BIGINT")))
}

fn to_u64(field: &str, value: i64) -> Result<u64, EventStoreError> {
    u64::try_from(value)
        .map_err(|_| EventStoreError::InvalidData(format!("{field} is negative ({value})")))
}

fn to_u32(field: &str, value: i32) -> Result<u32, EventStoreError> {
    u32::try_from(value)
        .map_err(|_| EventStoreError::InvalidData(format!("{field} is negative ({value})")))
}

// SQLx row types

#[derive(Debug)]
struct EventRow {
    id: Uuid,
    title: String,
    description: String,
    date: DateTime<Utc>,
    location: String,
    image_url: Option<String>,
    capacity: i32,
    registered: i32,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for EventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventRow {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            date: row.try_get("date")?,
            location: row.try_get("location")?,
            image_url: row.try_get("image_url")?,
            capacity: row.try_get("capacity")?,
            registered: row.try_get("registered")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<EventRow> for Event {
    type Error = EventStoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let details = EventDetails {
            title: row.title,
            description: row.description,
            date: row.date,
            location: row.location,
            image_url: row.image_url,
            capacity: to_u32("capacity", row.capacity)?,
        };

        Event::restore(
            EventId::from_uuid(row.id),
            details,
            to_u32("registered", row.registered)?,
            to_u64("version", row.version)?,
        )
        .map_err(|e| EventStoreError::InvalidData(e.to_string()))
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<Event, EventStoreError> {
    let row = EventRow::from_row(row)
        .map_err(|e| EventStoreError::InvalidData(format!("failed to deserialize event row: {e}")))?;
    Event::try_from(row)
}
