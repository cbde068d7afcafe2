// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Self-healing schema for the item table
//!
//! There are no numbered migrations. The table is created from
//! [`REQUIRED_COLUMNS`] on first use; on later opens any column missing from
//! an older store is appended. Columns are never dropped.

use rusqlite::Connection;
use std::collections::HashSet;
use tracing::info;

use crate::Result;

pub const TABLE: &str = "items";

/// Every column the store reads or writes, besides the `id` key.
/// Declarations must carry a non-null default so `ALTER TABLE ADD COLUMN`
/// can back-fill existing rows.
pub const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("source_path", "TEXT NOT NULL DEFAULT ''"),
    ("path", "TEXT NOT NULL DEFAULT ''"),
    ("filename", "TEXT NOT NULL DEFAULT ''"),
    ("extension", "TEXT NOT NULL DEFAULT ''"),
    ("project", "TEXT NOT NULL DEFAULT ''"),
    ("category", "TEXT NOT NULL DEFAULT ''"),
    ("tags", "TEXT NOT NULL DEFAULT ''"),
    ("confidence", "REAL NOT NULL DEFAULT 0.0"),
    ("status", "TEXT NOT NULL DEFAULT 'inbox'"),
    ("created_ts", "INTEGER NOT NULL DEFAULT 0"),
    ("updated_ts", "INTEGER NOT NULL DEFAULT 0"),
];

const INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_items_path ON items(path COLLATE NOCASE);
    CREATE INDEX IF NOT EXISTS idx_items_status ON items(status, created_ts);
    CREATE INDEX IF NOT EXISTS idx_items_created ON items(created_ts, id);
"#;

fn create_table_sql() -> String {
    let columns: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .map(|(name, decl)| format!("{} {}", name, decl))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
        TABLE,
        columns.join(", ")
    )
}

/// Names of the columns the table currently has
pub fn existing_columns(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", TABLE))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(names)
}

/// Create the table if absent, then add any missing columns and indexes.
/// Runs in a single transaction. Returns the names of the columns added.
pub fn ensure(conn: &mut Connection) -> Result<Vec<String>> {
    let tx = conn.transaction()?;
    tx.execute(&create_table_sql(), [])?;

    let present = existing_columns(&tx)?;
    let mut added = Vec::new();
    for (name, decl) in REQUIRED_COLUMNS {
        if !present.contains(*name) {
            tx.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", TABLE, name, decl),
                [],
            )?;
            added.push(name.to_string());
        }
    }

    tx.execute_batch(INDEXES)?;
    tx.commit()?;

    if !added.is_empty() {
        info!("Upgraded item store, added columns: {:?}", added);
    }
    Ok(added)
}
