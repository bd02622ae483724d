//! Core types for legacy-sync.
//!
//! This crate provides the database-independent vocabulary shared by every
//! engine in the workspace:
//!
//! - [`UniversalType`] - The destination-neutral type universe source columns map into
//! - [`UniversalValue`] and [`Row`] - The sole row interchange shape between engines and databases
//! - [`TableSchema`] / [`TableMapping`] - Source metadata and its translated destination form
//! - [`Section`] / [`ArchiveEntry`] - Building blocks of a sectioned backup archive
//! - [`SyncError`] - The error taxonomy with retryability classification
//! - Session traits - The seam between the engines and concrete database drivers
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint           (persists resume points)
//!    │
//!    └─── legacy-sync          (engines, MySQL source, PostgreSQL destination)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sync_core::{Row, UniversalValue};
//!
//! let row: Row = [
//!     ("id".to_string(), UniversalValue::Int64(1)),
//!     ("name".to_string(), UniversalValue::Text("Alice".into())),
//! ]
//! .into_iter()
//! .collect();
//!
//! assert_eq!(row.get("id"), Some(&UniversalValue::Int64(1)));
//! ```

pub mod archive;
pub mod error;
pub mod schema;
pub mod session;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use archive::{ArchiveEntry, ObjectKind, Section};
pub use error::SyncError;
pub use schema::{
    ColumnDefault, ColumnDefinition, IndexDefinition, MappedColumn, SourceType, TableMapping,
    TableSchema,
};
pub use session::{
    ChangeFilter, DestinationPool, DestinationSession, LatestChange, SectionOutcome,
    SourceConnector, SourceSession,
};
pub use types::{ToDdl, UniversalType};
pub use values::{compare_keys, Row, UniversalValue};
