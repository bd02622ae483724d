//! Test infrastructure for exercising the engines without live databases.
//!
//! [`MemorySource`] and [`MemoryDestination`] implement the session traits
//! over shared in-memory state, with hooks for injecting connection, read,
//! write and restore failures. The fixtures build the tables and connection
//! managers most tests start from.

pub mod fixtures;
pub mod memory;

pub use fixtures::{at_minute, customer, customers_schema, test_connections, test_settings};
pub use memory::{MemoryDestination, MemorySource};
