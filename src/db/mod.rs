// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Durable item store
//!
//! [`ItemStore`] is the storage interface the pipeline talks to; [`Database`]
//! is the compiled-in SQLite implementation. Every mutating call runs in one
//! transaction. Queries come back as [`ItemStream`]s that page through the
//! table lazily, newest first.

pub mod schema;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::item::{normalize_path, normalize_tags, now_ts, split_tags, Item, ItemStatus};
use crate::{Result, StowageError};

/// Upper bound on bound parameters per batched lookup
pub const LOOKUP_CHUNK: usize = 500;

/// Rows fetched per page by an [`ItemStream`]
pub const DEFAULT_PAGE_SIZE: usize = 200;

const SELECT_COLUMNS: &str = "id, COALESCE(source_path, ''), COALESCE(path, ''), \
     COALESCE(filename, ''), COALESCE(extension, ''), COALESCE(project, ''), \
     COALESCE(category, ''), COALESCE(tags, ''), COALESCE(confidence, 0.0), \
     COALESCE(status, 'inbox'), COALESCE(created_ts, 0), COALESCE(updated_ts, 0)";

/// Which rows a query selects
#[derive(Debug, Clone, PartialEq)]
pub enum ItemFilter {
    All,
    Status(ItemStatus),
    Statuses(Vec<ItemStatus>),
    /// Exact tag or a comma-delimited element of the tag list
    Tag(String),
    /// `created_ts >= since`
    Since(i64),
}

/// Keyset position: the last row of the previous page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub created_ts: i64,
    pub id: i64,
}

/// Storage interface for items
pub trait ItemStore: Send + Sync {
    /// Insert or update by id, then by case-insensitive path.
    /// Returns the item as persisted.
    fn upsert(&self, item: &Item) -> Result<Item>;

    fn get(&self, id: i64) -> Result<Option<Item>>;

    /// One page of `filter` results, newest first, strictly after `after`
    fn fetch_page(
        &self,
        filter: &ItemFilter,
        after: Option<PageCursor>,
        limit: usize,
    ) -> Result<Vec<Item>>;

    /// Distinct non-empty projects, newest first, optionally filtered by a
    /// case-insensitive substring
    fn query_distinct_projects(&self, filter: Option<&str>) -> Result<Vec<String>>;

    fn try_get_by_path(&self, path: &Path) -> Result<Option<Item>>;

    /// Most recent item that entered the pipeline from `path`
    fn try_get_by_source_path(&self, path: &Path) -> Result<Option<Item>>;

    fn try_get_by_paths(&self, paths: &[PathBuf]) -> Result<Vec<Item>>;

    /// Administrative status change. Returns false if the id is unknown.
    fn set_status(&self, id: i64, status: ItemStatus) -> Result<bool>;

    fn delete(&self, id: i64) -> Result<bool>;

    /// Delete every row whose backing file is gone. Returns the count removed.
    fn purge_missing(&self) -> Result<usize>;

    fn status_counts(&self) -> Result<Vec<(ItemStatus, i64)>>;

    fn query(&self, filter: ItemFilter) -> ItemStream<'_, Self> {
        ItemStream::new(self, filter)
    }

    fn query_by_status(&self, status: ItemStatus) -> ItemStream<'_, Self> {
        self.query(ItemFilter::Status(status))
    }

    fn query_by_statuses(&self, statuses: &[ItemStatus]) -> ItemStream<'_, Self> {
        self.query(ItemFilter::Statuses(statuses.to_vec()))
    }

    fn query_by_tag(&self, tag: &str) -> ItemStream<'_, Self> {
        self.query(ItemFilter::Tag(tag.trim().to_string()))
    }

    fn query_since(&self, ts: i64) -> ItemStream<'_, Self> {
        self.query(ItemFilter::Since(ts))
    }
}

/// Lazy, finite sequence of items. Pages are fetched on demand and no
/// transaction is held between them; call [`ItemStream::restart`] to run the
/// same query again from the top.
pub struct ItemStream<'a, S: ItemStore + ?Sized> {
    store: &'a S,
    filter: ItemFilter,
    cursor: Option<PageCursor>,
    buffer: VecDeque<Item>,
    page_size: usize,
    exhausted: bool,
}

impl<'a, S: ItemStore + ?Sized> ItemStream<'a, S> {
    pub fn new(store: &'a S, filter: ItemFilter) -> Self {
        Self {
            store,
            filter,
            cursor: None,
            buffer: VecDeque::new(),
            page_size: DEFAULT_PAGE_SIZE,
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// A fresh stream over the same query
    pub fn restart(&self) -> Self {
        Self::new(self.store, self.filter.clone()).with_page_size(self.page_size)
    }

    /// Drain into a vector, stopping at the first store error
    pub fn try_collect(self) -> Result<Vec<Item>> {
        self.collect()
    }
}

impl<'a, S: ItemStore + ?Sized> Iterator for ItemStream<'a, S> {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.buffer.pop_front() {
            return Some(Ok(item));
        }
        if self.exhausted {
            return None;
        }
        match self.store.fetch_page(&self.filter, self.cursor, self.page_size) {
            Ok(page) => {
                if page.len() < self.page_size {
                    self.exhausted = true;
                }
                if let Some(last) = page.last() {
                    self.cursor = Some(PageCursor {
                        created_ts: last.created_ts,
                        id: last.id,
                    });
                }
                self.buffer.extend(page);
                self.buffer.pop_front().map(Ok)
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

/// SQLite item store (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Store key for a path
pub fn path_key(path: &Path) -> String {
    normalize_path(path).to_string_lossy().to_string()
}

/// Escape `%`, `_` and the escape char itself for `LIKE ... ESCAPE '\'`
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    let status_raw: String = row.get(9)?;
    let status = status_raw.parse::<ItemStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let tags: String = row.get(7)?;
    Ok(Item {
        id: row.get(0)?,
        source_path: PathBuf::from(row.get::<_, String>(1)?),
        path: PathBuf::from(row.get::<_, String>(2)?),
        filename: row.get(3)?,
        extension: row.get(4)?,
        project: row.get(5)?,
        category: row.get(6)?,
        tags: split_tags(&tags),
        confidence: row.get(8)?,
        status,
        created_ts: row.get(10)?,
        updated_ts: row.get(11)?,
    })
}

/// WHERE fragment and its parameters; `None` means the filter matches nothing
fn filter_clause(filter: &ItemFilter) -> Option<(String, Vec<Value>)> {
    match filter {
        ItemFilter::All => Some(("1 = 1".to_string(), Vec::new())),
        ItemFilter::Status(status) => Some((
            "status = ?".to_string(),
            vec![Value::Text(status.as_str().to_string())],
        )),
        ItemFilter::Statuses(statuses) => {
            let unique: Vec<ItemStatus> = statuses
                .iter()
                .copied()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            if unique.is_empty() {
                return None;
            }
            let marks = vec!["?"; unique.len()].join(", ");
            Some((
                format!("status IN ({})", marks),
                unique
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string()))
                    .collect(),
            ))
        }
        ItemFilter::Tag(tag) => {
            let tag = tag.trim();
            if tag.is_empty() {
                return None;
            }
            let esc = escape_like(tag);
            Some((
                "(tags = ? COLLATE NOCASE \
                  OR tags LIKE ? ESCAPE '\\' \
                  OR tags LIKE ? ESCAPE '\\' \
                  OR tags LIKE ? ESCAPE '\\')"
                    .to_string(),
                vec![
                    Value::Text(tag.to_string()),
                    Value::Text(format!("{},%", esc)),
                    Value::Text(format!("%,{}", esc)),
                    Value::Text(format!("%,{},%", esc)),
                ],
            ))
        }
        ItemFilter::Since(ts) => Some(("created_ts >= ?".to_string(), vec![Value::Integer(*ts)])),
    }
}

impl Database {
    /// Open or create the store
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, healing its schema
    pub fn from_connection(mut conn: Connection) -> Result<Self> {
        schema::ensure(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StowageError::Config("Database lock poisoned".to_string()))
    }

    fn select_one(conn: &Connection, sql_where: &str, value: Value) -> Result<Option<Item>> {
        let sql = format!(
            "SELECT {} FROM items WHERE {} ORDER BY id LIMIT 1",
            SELECT_COLUMNS, sql_where
        );
        let item = conn.query_row(&sql, [value], row_to_item).optional()?;
        Ok(item)
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .map_err(Into::into)
    }
}

impl ItemStore for Database {
    fn upsert(&self, item: &Item) -> Result<Item> {
        let mut item = item.clone();
        item.normalize();
        let key = path_key(&item.path);
        let tags = normalize_tags(&item.tags.join(","));
        let now = now_ts();

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let by_id = if item.id > 0 {
            tx.query_row(
                "SELECT id, COALESCE(created_ts, 0) FROM items WHERE id = ?1",
                params![item.id],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
            )
            .optional()?
        } else {
            None
        };

        let by_path = if key.is_empty() {
            None
        } else {
            tx.query_row(
                "SELECT id, COALESCE(created_ts, 0) FROM items
                 WHERE path = ?1 COLLATE NOCASE ORDER BY id LIMIT 1",
                params![key],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
            )
            .optional()?
        };

        let existing = match (by_id, by_path) {
            (Some(own), Some(other)) if own.0 != other.0 => {
                // the row being updated now claims a path another row holds
                warn!("Dropping stale row {} that shared path {}", other.0, key);
                tx.execute("DELETE FROM items WHERE id = ?1", params![other.0])?;
                Some(own)
            }
            (Some(own), _) => Some(own),
            (None, by_path) => by_path,
        };

        item.updated_ts = now;
        match existing {
            Some((id, created_ts)) => {
                item.id = id;
                if created_ts != 0 {
                    item.created_ts = created_ts;
                } else if item.created_ts == 0 {
                    item.created_ts = now;
                }
                tx.execute(
                    r#"UPDATE items SET source_path = ?1, path = ?2, filename = ?3,
                           extension = ?4, project = ?5, category = ?6, tags = ?7,
                           confidence = ?8, status = ?9, created_ts = ?10, updated_ts = ?11
                       WHERE id = ?12"#,
                    params![
                        path_key(&item.source_path),
                        key,
                        item.filename,
                        item.extension,
                        item.project,
                        item.category,
                        tags,
                        item.confidence,
                        item.status.as_str(),
                        item.created_ts,
                        item.updated_ts,
                        id
                    ],
                )?;
                debug!("Updated item {} ({})", id, key);
            }
            None => {
                if item.created_ts == 0 {
                    item.created_ts = now;
                }
                tx.execute(
                    r#"INSERT INTO items (source_path, path, filename, extension, project,
                           category, tags, confidence, status, created_ts, updated_ts)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                    params![
                        path_key(&item.source_path),
                        key,
                        item.filename,
                        item.extension,
                        item.project,
                        item.category,
                        tags,
                        item.confidence,
                        item.status.as_str(),
                        item.created_ts,
                        item.updated_ts
                    ],
                )?;
                item.id = tx.last_insert_rowid();
                debug!("Inserted item {} ({})", item.id, key);
            }
        }

        tx.commit()?;
        item.tags = split_tags(&tags);
        Ok(item)
    }

    fn get(&self, id: i64) -> Result<Option<Item>> {
        let conn = self.lock_conn()?;
        Self::select_one(&conn, "id = ?", Value::Integer(id))
    }

    fn fetch_page(
        &self,
        filter: &ItemFilter,
        after: Option<PageCursor>,
        limit: usize,
    ) -> Result<Vec<Item>> {
        let Some((clause, mut values)) = filter_clause(filter) else {
            return Ok(Vec::new());
        };

        let mut sql = format!("SELECT {} FROM items WHERE {}", SELECT_COLUMNS, clause);
        if let Some(cursor) = after {
            sql.push_str(" AND (created_ts < ? OR (created_ts = ? AND id < ?))");
            values.push(Value::Integer(cursor.created_ts));
            values.push(Value::Integer(cursor.created_ts));
            values.push(Value::Integer(cursor.id));
        }
        sql.push_str(" ORDER BY created_ts DESC, id DESC LIMIT ?");
        values.push(Value::Integer(limit.max(1) as i64));

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn query_distinct_projects(&self, filter: Option<&str>) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let pattern = match filter.map(str::trim) {
            Some(f) if !f.is_empty() => format!("%{}%", escape_like(f)),
            _ => "%".to_string(),
        };
        let mut stmt = conn.prepare(
            r#"SELECT project FROM items
               WHERE project <> '' AND project LIKE ?1 ESCAPE '\'
               GROUP BY project
               ORDER BY MAX(created_ts) DESC, project"#,
        )?;
        let projects = stmt
            .query_map(params![pattern], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(projects)
    }

    fn try_get_by_path(&self, path: &Path) -> Result<Option<Item>> {
        let key = path_key(path);
        if key.is_empty() {
            return Ok(None);
        }
        let conn = self.lock_conn()?;
        Self::select_one(&conn, "path = ? COLLATE NOCASE", Value::Text(key))
    }

    fn try_get_by_source_path(&self, path: &Path) -> Result<Option<Item>> {
        let key = path_key(path);
        if key.is_empty() {
            return Ok(None);
        }
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM items WHERE source_path = ?1 COLLATE NOCASE ORDER BY id DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let item = conn.query_row(&sql, params![key], row_to_item).optional()?;
        Ok(item)
    }

    fn try_get_by_paths(&self, paths: &[PathBuf]) -> Result<Vec<Item>> {
        let keys: Vec<String> = paths
            .iter()
            .map(|p| path_key(p))
            .filter(|k| !k.is_empty())
            .collect();

        let conn = self.lock_conn()?;
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let marks = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM items WHERE path COLLATE NOCASE IN ({}) ORDER BY id",
                SELECT_COLUMNS, marks
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for item in rows {
                if seen.insert(item.id) {
                    found.push(item);
                }
            }
        }
        Ok(found)
    }

    fn set_status(&self, id: i64, status: ItemStatus) -> Result<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE items SET status = ?1, updated_ts = ?2 WHERE id = ?3",
            params![status.as_str(), now_ts(), id],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(changed > 0)
    }

    fn purge_missing(&self) -> Result<usize> {
        let mut conn = self.lock_conn()?;

        let candidates: Vec<(i64, String)> = {
            let mut stmt = conn.prepare("SELECT id, path FROM items WHERE COALESCE(path, '') <> ''")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let missing: Vec<i64> = candidates
            .into_iter()
            .filter(|(_, path)| !Path::new(path).exists())
            .map(|(id, _)| id)
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM items WHERE id = ?1")?;
            for id in &missing {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        debug!("Purged {} items with missing files", missing.len());
        Ok(missing.len())
    }

    fn status_counts(&self) -> Result<Vec<(ItemStatus, i64)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(status, 'inbox'), COUNT(*) FROM items GROUP BY status ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = Vec::with_capacity(rows.len());
        for (raw, count) in rows {
            match raw.parse::<ItemStatus>() {
                Ok(status) => counts.push((status, count)),
                Err(_) => warn!("Ignoring {} rows with unknown status {:?}", count, raw),
            }
        }
        Ok(counts)
    }
}
