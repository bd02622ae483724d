//! Shared test fixtures.

use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;

use sync_core::{ColumnDefinition, Row, SourceType, TableSchema, UniversalValue};

use crate::connection::{ConnectionManager, ConnectionSettings};
use crate::retry::RetryPolicy;

use super::memory::{MemoryDestination, MemorySource};

/// `customers(id INT PK, name VARCHAR(100), email VARCHAR(255), updated_at DATETIME)`
pub fn customers_schema() -> TableSchema {
    TableSchema::with_key_order(
        "customers",
        vec![
            ColumnDefinition::new("id", SourceType::new("int")),
            ColumnDefinition::new("name", SourceType::new("varchar").with_length(100)).not_null(),
            ColumnDefinition::new("email", SourceType::new("varchar").with_length(255)),
            ColumnDefinition::new("updated_at", SourceType::new("datetime")),
        ],
        vec!["id".to_string()],
    )
    .unwrap_or_else(|e| panic!("customers fixture is invalid: {e}"))
}

/// `2024-01-01 00:00:00` plus `minutes`.
pub fn at_minute(minutes: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t + chrono::Duration::minutes(minutes))
        .unwrap_or_default()
}

/// A customers row updated `minute` minutes into the fixture day.
pub fn customer(id: i64, name: &str, minute: i64) -> Row {
    Row::new()
        .with("id", UniversalValue::Int64(id))
        .with("name", UniversalValue::Text(name.to_string()))
        .with(
            "email",
            UniversalValue::Text(format!("{}@example.com", name.to_lowercase())),
        )
        .with("updated_at", UniversalValue::Timestamp(at_minute(minute)))
}

/// Short timeouts and `retries` immediate retries.
pub fn test_settings(retries: u32) -> ConnectionSettings {
    ConnectionSettings {
        source_timeout: Duration::from_secs(1),
        destination_timeout: Duration::from_secs(1),
        retry: RetryPolicy::immediate(retries),
    }
}

pub fn test_connections(
    source: &MemorySource,
    destination: &MemoryDestination,
    settings: ConnectionSettings,
) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        Arc::new(source.clone()),
        Arc::new(destination.clone()),
        settings,
    ))
}
