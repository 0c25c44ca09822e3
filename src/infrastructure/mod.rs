// Infrastructure modules
pub mod counter_store;         // Atomic counter deltas and drift repair
pub mod database;              // SQLite pool, schema and transactions
pub mod id_generator;          // ID generation system
pub mod middleware;            // Request authentication
pub mod monitoring;            // Metrics and tracing setup
pub mod security;              // Session tokens
pub mod viewer;                // Viewer context

pub use counter_store::CounterStore;
pub use database::{SqliteDatabase, StoreTransaction};
pub use id_generator::IdGenerator;
pub use monitoring::{init_tracing, MetricsCollector, MetricsSnapshot};
pub use security::{Authenticator, SessionRegistry};
pub use viewer::{ViewerContext, ViewerRole};
