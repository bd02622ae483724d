//! Row-count comparison between the source and the destination.

use sync_core::SyncError;

use crate::connection::ConnectionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableVerification {
    pub table: String,
    pub source_rows: u64,
    pub destination_rows: u64,
}

impl TableVerification {
    pub fn matches(&self) -> bool {
        self.source_rows == self.destination_rows
    }
}

/// Count rows of every table on both sides.
pub async fn verify_tables(
    connections: &ConnectionManager,
    tables: &[String],
) -> Result<Vec<TableVerification>, SyncError> {
    let mut source_counts = Vec::with_capacity(tables.len());
    let mut source = connections.acquire_source().await?;
    for table in tables {
        match source.count_rows(table).await {
            Ok(count) => source_counts.push(count),
            Err(e) => {
                source.release().await;
                return Err(e);
            }
        }
    }
    source.release().await;

    let mut destination = connections.acquire_destination().await?;
    let mut results = Vec::with_capacity(tables.len());
    for (table, source_rows) in tables.iter().zip(source_counts) {
        let destination_rows = destination.count_rows(table).await?;
        let verification = TableVerification {
            table: table.clone(),
            source_rows,
            destination_rows,
        };
        if verification.matches() {
            tracing::info!(
                table = %table,
                rows = source_rows,
                "Row counts match"
            );
        } else {
            tracing::warn!(
                table = %table,
                source_rows,
                destination_rows,
                "Row count mismatch"
            );
        }
        results.push(verification);
    }
    Ok(results)
}
