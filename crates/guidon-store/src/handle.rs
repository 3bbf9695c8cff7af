//! Async access to the synchronous [`Database`].
//!
//! SQLite calls block, so every query runs on tokio's blocking pool behind
//! a mutex. One connection serialises writers, which is what the
//! transactional read-modify-write helpers rely on.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::database::Database;
use crate::error::{Result, StoreError};

#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<Mutex<Database>>,
}

impl DbHandle {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut db = inner.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut db)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
