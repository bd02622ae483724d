//! Checkpoint management for legacy-sync
//!
//! Provides storage-agnostic checkpoint handling for the resumable units of
//! work in legacy-sync.
//!
//! # Architecture
//!
//! This crate provides a generic checkpoint system that:
//! - Defines the `Checkpoint` trait for typed checkpoint records
//! - Provides `CheckpointFile` wrapper for storage-agnostic serialization
//! - Manages checkpoint saving/loading via `CheckpointManager`
//! - Supports multiple storage backends via `CheckpointStore` trait
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - One JSON file per checkpoint id, replaced atomically
//! - `NullStore` - Discards everything (checkpointing disabled)
//!
//! Each resumable unit (a migration run, a table's sync watermark, a restored
//! archive section) implements its own checkpoint type with the `Checkpoint`
//! trait and is addressed by a kind plus a key.

mod config;
mod file;
mod filesystem;
mod manager;
pub mod store;

#[cfg(test)]
mod tests;

// Re-export config types
pub use config::CheckpointStorage;

// Re-export file types
pub use file::CheckpointFile;

// Re-export manager types
pub use manager::{CheckpointManager, NullStore};

// Re-export store trait and types
pub use store::{CheckpointID, CheckpointStore, StoredCheckpoint};

// Re-export storage implementations
pub use filesystem::FilesystemStore;

/// Trait that checkpoint record types must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct OffsetCheckpoint {
///     pub offset: u64,
/// }
///
/// impl Checkpoint for OffsetCheckpoint {
///     const KIND: &'static str = "offset";
///
///     fn to_cli_string(&self) -> String {
///         self.offset.to_string()
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         Ok(Self { offset: s.parse()? })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Checkpoint kind identifier (e.g., "migration", "watermark", "restore").
    ///
    /// This constant is used to:
    /// - Namespace checkpoint ids in the store
    /// - Validate the checkpoint type when loading
    const KIND: &'static str;

    /// Convert to a short human-readable form.
    ///
    /// Used in log lines and, where `from_cli_string` is implemented, as a
    /// command-line override.
    fn to_cli_string(&self) -> String;

    /// Parse from CLI string format.
    ///
    /// Kinds without a command-line form keep the default, which rejects.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized,
    {
        anyhow::bail!(
            "'{s}' cannot be used: {} checkpoints have no command-line form",
            Self::KIND
        )
    }
}
