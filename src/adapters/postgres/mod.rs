//! PostgreSQL adapters.
//!
//! - `PostgresProjectAccessChecker` - Project ownership/membership lookup
//! - `PgChangeFeed` - LISTEN/NOTIFY commit notifications

mod change_listener;
mod project_access_checker;

pub use change_listener::PgChangeFeed;
pub use project_access_checker::PostgresProjectAccessChecker;
