//! Persistent "denied permanently" flag using heed (LMDB).
//!
//! Permission APIs only say a prompt will never be shown again at the
//! moment a request is answered, so the negotiator has to remember that
//! answer across restarts.

use std::{
   path::{Path, PathBuf},
   sync::{
      Arc,
      atomic::{AtomicBool, Ordering},
   },
};

use heed::{
   Database, Env, EnvOpenOptions,
   types::{SerdeBincode, Str},
};
use log::debug;
use thiserror::Error;

/// Errors that can occur in permission store operations.
#[derive(Error, Debug)]
pub enum Error {
   #[error("Failed to create permission store directory: {0}")]
   CreateDirectory(#[from] std::io::Error),

   #[error("Failed to open heed environment: {0}")]
   OpenEnvironment(heed::Error),

   #[error("Database transaction error: {0}")]
   Transaction(heed::Error),

   #[error("Database operation error: {0}")]
   DatabaseOperation(heed::Error),

   #[error("Could not find local data directory")]
   DataDirectoryNotFound,
}

const KEY_DENIED_PERMANENTLY: &str = "denied_permanently";

/// Storage for the "denied permanently" flag.
pub trait DenialStore: Send + Sync {
   fn denied_permanently(&self) -> Result<bool, Error>;
   fn set_denied_permanently(&self, denied: bool) -> Result<(), Error>;
}

#[derive(Debug)]
struct Db {
   env: Env,
   /// Flag name -> value
   flags: Database<Str, SerdeBincode<bool>>,
}

/// LMDB-backed flag store. Cheaply cloneable.
#[derive(Clone, Debug)]
pub struct PermissionStore {
   db: Arc<Db>,
}

impl PermissionStore {
   /// Opens or creates the store at the default location.
   pub fn open() -> Result<Self, Error> {
      Self::open_at(&Self::db_path()?)
   }

   /// Opens or creates the store in `path` (a directory).
   pub fn open_at(path: &Path) -> Result<Self, Error> {
      std::fs::create_dir_all(path)?;

      let env = unsafe {
         EnvOpenOptions::new()
            .map_size(1024 * 1024)
            .max_dbs(1)
            .open(path)
            .map_err(Error::OpenEnvironment)?
      };

      let mut wtxn = env.write_txn().map_err(Error::Transaction)?;
      let flags = env
         .create_database(&mut wtxn, Some("flags"))
         .map_err(Error::DatabaseOperation)?;
      wtxn.commit().map_err(Error::Transaction)?;

      debug!("Opened permission store at {}", path.display());
      Ok(Self {
         db: Arc::new(Db { env, flags }),
      })
   }

   fn db_path() -> Result<PathBuf, Error> {
      if let Ok(path) = std::env::var("MINEWD_PERMISSION_DB_PATH") {
         return Ok(PathBuf::from(path));
      }

      // ~/.local/share/minewd/permissions.db
      let base = dirs::data_local_dir().ok_or(Error::DataDirectoryNotFound)?;
      Ok(base.join("minewd").join("permissions.db"))
   }
}

impl DenialStore for PermissionStore {
   fn denied_permanently(&self) -> Result<bool, Error> {
      let rtxn = self.db.env.read_txn().map_err(Error::Transaction)?;
      let value = self
         .db
         .flags
         .get(&rtxn, KEY_DENIED_PERMANENTLY)
         .map_err(Error::DatabaseOperation)?;
      Ok(value.unwrap_or(false))
   }

   fn set_denied_permanently(&self, denied: bool) -> Result<(), Error> {
      let mut wtxn = self.db.env.write_txn().map_err(Error::Transaction)?;
      self
         .db
         .flags
         .put(&mut wtxn, KEY_DENIED_PERMANENTLY, &denied)
         .map_err(Error::DatabaseOperation)?;
      wtxn.commit().map_err(Error::Transaction)?;
      Ok(())
   }
}

/// Process-local flag store, for platforms without persistence and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
   denied: AtomicBool,
}

impl MemoryStore {
   pub const fn new() -> Self {
      Self {
         denied: AtomicBool::new(false),
      }
   }
}

impl DenialStore for MemoryStore {
   fn denied_permanently(&self) -> Result<bool, Error> {
      Ok(self.denied.load(Ordering::Acquire))
   }

   fn set_denied_permanently(&self, denied: bool) -> Result<(), Error> {
      self.denied.store(denied, Ordering::Release);
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use tempfile::TempDir;

   use super::*;

   #[test]
   fn test_flag_defaults_to_false() -> Result<(), Error> {
      let dir = TempDir::new().unwrap();
      let store = PermissionStore::open_at(dir.path())?;
      assert!(!store.denied_permanently()?);
      Ok(())
   }

   #[test]
   fn test_flag_set_and_cleared() -> Result<(), Error> {
      let dir = TempDir::new().unwrap();
      let store = PermissionStore::open_at(&dir.path().join("permissions.db"))?;

      store.set_denied_permanently(true)?;
      assert!(store.denied_permanently()?);

      // Clones share the same environment
      let clone = store.clone();
      assert!(clone.denied_permanently()?);

      clone.set_denied_permanently(false)?;
      assert!(!store.denied_permanently()?);
      Ok(())
   }

   #[test]
   fn test_memory_store() -> Result<(), Error> {
      let store = MemoryStore::new();
      assert!(!store.denied_permanently()?);
      store.set_denied_permanently(true)?;
      assert!(store.denied_permanently()?);
      Ok(())
   }
}
