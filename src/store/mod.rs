//! Durable queue storage for the delivery engine.

mod event_store;
mod models;
mod schema;

pub use event_store::{EventStore, SqliteEventStore};
pub use models::{
    EventRow, Invocation, InvocationRow, ScheduledEventRow, ScheduledTriggerStats,
};
pub use schema::RELAY_VERSIONED_SCHEMAS;
