//! Composite credentials (password and/or key file).

use crate::error::{Result, SyncError};
use keepass::DatabaseKey;
use std::fmt;
use std::path::{Path, PathBuf};

/// The secret material needed to unlock a database.
///
/// Password and key file combine the same way KeePass composite keys do:
/// either may be absent, but not both.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
}

impl Credential {
    /// Credential made of a password only.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            key_file: None,
        }
    }

    /// Build a credential from the raw job fields, treating empty strings as absent.
    pub fn from_parts(password: &str, key_file: Option<PathBuf>) -> Self {
        Self {
            password: (!password.is_empty()).then(|| password.to_string()),
            key_file,
        }
    }

    /// True when neither a password nor a key file is present.
    pub fn is_empty(&self) -> bool {
        self.password.as_deref().map_or(true, str::is_empty) && self.key_file.is_none()
    }

    /// Build the `keepass` key for unlocking or saving `path`.
    pub fn to_key(&self, path: &Path) -> Result<DatabaseKey> {
        if self.is_empty() {
            return Err(SyncError::Credential {
                path: path.to_path_buf(),
                reason: "no password or key file given".to_string(),
            });
        }

        let mut key = DatabaseKey::new();
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            key = key.with_password(password);
        }

        if let Some(key_file) = &self.key_file {
            let mut file = std::fs::File::open(key_file).map_err(|e| SyncError::Credential {
                path: path.to_path_buf(),
                reason: format!("cannot read key file {}: {e}", key_file.display()),
            })?;
            key = key.with_keyfile(&mut file).map_err(|e| SyncError::Credential {
                path: path.to_path_buf(),
                reason: format!("invalid key file {}: {e}", key_file.display()),
            })?;
        }

        Ok(key)
    }
}

// Never print the password.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_file", &self.key_file)
            .finish()
    }
}
