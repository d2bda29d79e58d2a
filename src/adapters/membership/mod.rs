//! Membership adapters - implementations of the project access port.
//!
//! - `StubAccessChecker` - In-memory checker for development and testing
//! - `PostgresProjectAccessChecker` (in `adapters::postgres`) - production

mod stub_access_checker;

pub use stub_access_checker::StubAccessChecker;
