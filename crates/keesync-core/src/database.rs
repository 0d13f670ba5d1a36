//! KeePass database operations wrapper and the store abstraction.

use crate::credential::Credential;
use crate::error::{Result, SyncError};
use crate::tree;
use keepass::db::{Entry, Group};
use keepass::error::DatabaseOpenError;
use keepass::Database;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Wrapper around an unlocked KeePass database, remembering where it lives
/// and how to lock it again.
pub struct KeepassDatabase {
    db: Database,
    path: PathBuf,
    credential: Credential,
}

impl KeepassDatabase {
    /// Wrap an already decoded database.
    pub fn new(db: Database, path: impl Into<PathBuf>, credential: Credential) -> Self {
        Self {
            db,
            path: path.into(),
            credential,
        }
    }

    /// Open and unlock a KeePass database.
    pub fn unlock(path: impl AsRef<Path>, credential: &Credential) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SyncError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let key = credential.to_key(path)?;
        let mut file = std::fs::File::open(path).map_err(|e| SyncError::store_io(path, e))?;

        let db = Database::open(&mut file, key).map_err(|e| match e {
            DatabaseOpenError::Key(e) => SyncError::Credential {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
            other => SyncError::store_io(path, other),
        })?;

        tracing::debug!("Unlocked database {}", path.display());
        Ok(Self::new(db, path, credential.clone()))
    }

    /// Save the database back to its location.
    ///
    /// The new contents are written next to the original and renamed over it,
    /// so a failed save never leaves a truncated file behind.
    pub fn save(&self) -> Result<()> {
        let key = self.credential.to_key(&self.path)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| SyncError::store_io(&self.path, e))?;
        self.db
            .save(file.as_file_mut(), key)
            .map_err(|e| SyncError::store_io(&self.path, e))?;
        file.persist(&self.path)
            .map_err(|e| SyncError::store_io(&self.path, e.error))?;

        tracing::debug!("Saved database {}", self.path.display());
        Ok(())
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Credential the database was unlocked with.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// The underlying database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get mutable access to the underlying database for modifications.
    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Get the root group of the database.
    pub fn root(&self) -> &Group {
        &self.db.root
    }

    /// Find an entry anywhere in the tree by identity.
    pub fn find_entry(&self, uuid: Uuid) -> Option<&Entry> {
        tree::find_entry(&self.db.root, uuid)
    }
}

/// Opens and persists databases on behalf of the sync engine.
pub trait DatabaseStore {
    /// Unlock the database at `path`.
    fn open(&self, path: &Path, credential: &Credential) -> Result<KeepassDatabase>;

    /// Persist `database` to its own location.
    fn save(&self, database: &KeepassDatabase) -> Result<()>;
}

/// Store backed by KDBX files on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileStore;

impl DatabaseStore for FileStore {
    fn open(&self, path: &Path, credential: &Credential) -> Result<KeepassDatabase> {
        KeepassDatabase::unlock(path, credential)
    }

    fn save(&self, database: &KeepassDatabase) -> Result<()> {
        database.save()
    }
}

/// Resolve `path` against the directory containing `base` unless it is absolute.
pub fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    match base.parent() {
        Some(dir) => dir.join(candidate),
        None => candidate.to_path_buf(),
    }
}

/// Whether two paths name the same file.
pub fn same_location(a: &Path, b: &Path) -> bool {
    match (dunce::canonicalize(a), dunce::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
