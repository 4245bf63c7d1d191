//! Result cache keyed by command text.
//!
//! Each connection owns one cache. Entries remember when they were stored;
//! a lookup with a `max_age` misses on anything older. When full, the least
//! recently used entry is evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::conversion::FromRow;
use crate::error::Result;
use crate::handler::TextHandler;
use crate::protocol::column::{ColumnDefs, ColumnInfo};
use crate::protocol::response::OkPacket;
use crate::protocol::row::TextRow;
use crate::value::Value;

/// A fully materialized text-protocol result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedResult {
    /// Column aliases
    pub columns: Vec<String>,
    /// Column types
    pub column_info: Vec<ColumnInfo>,
    /// Rows in server order
    pub rows: Vec<Vec<Value>>,
    /// Summary of the last result
    pub ok: OkPacket,
}

impl TextHandler for CachedResult {
    fn result_start(&mut self, cols: ColumnDefs<'_>) -> Result<()> {
        // a multi-statement query keeps the last result set
        self.columns = cols.names()?;
        self.column_info = cols.info().to_vec();
        self.rows.clear();
        Ok(())
    }

    fn row(&mut self, cols: ColumnDefs<'_>, row: TextRow<'_>) -> Result<()> {
        self.rows.push(Vec::<Value>::from_text_row(cols.info(), row)?);
        Ok(())
    }

    fn result_end(&mut self, ok: OkPacket) -> Result<()> {
        self.ok = ok;
        Ok(())
    }
}

#[derive(Debug)]
struct Entry {
    result: Arc<CachedResult>,
    stored_at: Instant,
    last_access: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    clock: u64,
}

/// Bounded LRU cache of query results.
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` results (0 disables caching).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Look up `sql`, missing if the entry is older than `max_age`.
    pub fn get(&self, sql: &str, max_age: Duration) -> Option<Arc<CachedResult>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.clock += 1;
        let clock = inner.clock;
        let entry = inner.entries.get_mut(sql)?;
        if entry.stored_at.elapsed() > max_age {
            inner.entries.remove(sql);
            return None;
        }
        entry.last_access = clock;
        Some(Arc::clone(&entry.result))
    }

    /// Store a result, evicting the least recently used entry if full.
    pub fn insert(&self, sql: &str, result: CachedResult) -> Arc<CachedResult> {
        let result = Arc::new(result);
        if self.capacity == 0 {
            return result;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.clock += 1;
        let clock = inner.clock;
        if !inner.entries.contains_key(sql) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                inner.entries.remove(&key);
            }
        }
        inner.entries.insert(
            sql.to_string(),
            Entry {
                result: Arc::clone(&result),
                stored_at: Instant::now(),
                last_access: clock,
            },
        );
        result
    }

    /// Drop the entry for `sql`.
    pub fn invalidate(&self, sql: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.remove(sql);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
