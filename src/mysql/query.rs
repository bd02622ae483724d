//! SQL text for the MySQL source.

use sync_core::{ChangeFilter, TableMapping, UniversalValue};

/// Backtick-quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn column_list(mapping: &TableMapping) -> String {
    mapping
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn key_list(mapping: &TableMapping) -> Vec<String> {
    mapping.primary_key.iter().map(|k| quote_ident(k)).collect()
}

/// `key > (?, …)`, as a row-value comparison for composite keys.
fn key_after(mapping: &TableMapping) -> String {
    let keys = key_list(mapping);
    if keys.len() == 1 {
        format!("{} > ?", keys[0])
    } else {
        let marks = vec!["?"; keys.len()].join(", ");
        format!("({}) > ({marks})", keys.join(", "))
    }
}

pub fn count_rows(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(table))
}

/// Next keyset page in primary-key order. Takes one parameter per key
/// column when `after_key` is set.
pub fn select_batch(mapping: &TableMapping, after_key: bool, limit: usize) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(mapping),
        quote_ident(&mapping.table)
    );
    if after_key {
        sql.push_str(" WHERE ");
        sql.push_str(&key_after(mapping));
    }
    sql.push_str(&format!(
        " ORDER BY {} LIMIT {limit}",
        key_list(mapping).join(", ")
    ));
    sql
}

/// Rows admitted by `filter`, ordered by tracking value then primary key,
/// with the positional parameters the statement takes.
pub fn select_changes(
    mapping: &TableMapping,
    filter: &ChangeFilter,
    limit: usize,
) -> (String, Vec<UniversalValue>) {
    let column = quote_ident(&filter.column);
    let mut params = Vec::new();

    let condition = match (&filter.mark, &filter.after_key) {
        (None, _) => format!("{column} IS NOT NULL"),
        (Some(mark), None) => {
            params.push(mark.clone());
            format!("{column} >= ?")
        }
        (Some(mark), Some(key)) => {
            params.push(mark.clone());
            params.push(mark.clone());
            params.extend(key.iter().cloned());
            format!(
                "({column} > ? OR ({column} = ? AND {}))",
                key_after(mapping)
            )
        }
    };

    let mut order = vec![column];
    order.extend(key_list(mapping));
    let sql = format!(
        "SELECT {} FROM {} WHERE {condition} ORDER BY {} LIMIT {limit}",
        column_list(mapping),
        quote_ident(&mapping.table),
        order.join(", ")
    );
    (sql, params)
}
