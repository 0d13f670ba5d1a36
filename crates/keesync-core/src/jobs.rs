//! Sync job definitions stored as records in the database itself.
//!
//! Every entry in the reserved jobs group (by default `MSSyncJobs`, a direct
//! child of the root) describes one propagation rule:
//!
//! | Field                   | Meaning                                          |
//! |-------------------------|--------------------------------------------------|
//! | `Title`                 | Label used in warnings                           |
//! | `TargetFilePath`        | Target database, relative to this database       |
//! | `Password`              | Target password                                  |
//! | `KeyFilePath`           | Target key file, relative to this database       |
//! | `Disabled`              | Skip the job                                     |
//! | `Tag`                   | Comma-separated tags to select                   |
//! | `Group`                 | Comma-separated group names or `A/B` paths       |
//! | `ExportUserAndPassOnly` | Copy only title, user name, password and URL     |
//! | `IsSlave`               | Run only when this database is itself a target  |

use crate::credential::Credential;
use crate::database::{resolve_relative, KeepassDatabase};
use crate::error::{Result, SyncError};
use crate::reference;
use crate::tree;
use keepass::db::{Entry, Group};
use std::path::{Path, PathBuf};

/// Name of the group holding job records unless configured otherwise.
pub const DEFAULT_JOBS_GROUP: &str = "MSSyncJobs";

/// One propagation rule parsed from a job record.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncJob {
    /// Diagnostic label (the record's title).
    pub title: String,
    /// Target database, resolved against the source database's directory.
    pub target_path: Option<PathBuf>,
    /// Credential for the target, resolved the same way.
    pub credential: Credential,
    pub disabled: bool,
    pub tags: Vec<String>,
    pub groups: Vec<String>,
    pub is_slave: bool,
    pub export_user_and_pass_only: bool,
}

impl SyncJob {
    /// Parse a job record. Field references in job fields are resolved
    /// against `root`, relative paths against `db_path`.
    pub fn from_entry(root: &Group, entry: &Entry, db_path: &Path) -> Self {
        let field = |name: &str| reference::resolve_field(root, entry, name);
        let path = |name: &str| {
            let raw = field(name);
            let raw = raw.trim();
            (!raw.is_empty()).then(|| resolve_relative(db_path, raw))
        };

        Self {
            title: field("Title"),
            target_path: path("TargetFilePath"),
            credential: Credential::from_parts(&field("Password"), path("KeyFilePath")),
            disabled: parse_flag(&field("Disabled")) || is_expired(entry),
            tags: split_list(&field("Tag")),
            groups: split_list(&field("Group")),
            is_slave: parse_flag(&field("IsSlave")),
            export_user_and_pass_only: parse_flag(&field("ExportUserAndPassOnly")),
        }
    }

    /// Check that the job can run and return its target path.
    ///
    /// With `master_credential` set the job will be unlocked with the
    /// credential of the database that started the pass, so its own key file
    /// and password are not checked.
    pub fn validate(&self, master_credential: bool) -> Result<&Path> {
        if !master_credential {
            if let Some(key_file) = &self.credential.key_file {
                if !key_file.is_file() {
                    return Err(SyncError::config(
                        &self.title,
                        format!("key file is given but could not be found: {}", key_file.display()),
                    ));
                }
            }
        }

        if self.tags.is_empty() && self.groups.is_empty() {
            return Err(SyncError::config(&self.title, "missing Tag or Group"));
        }

        let target = self
            .target_path
            .as_deref()
            .ok_or_else(|| SyncError::config(&self.title, "missing TargetFilePath"))?;
        if !target.is_file() {
            return Err(SyncError::config(
                &self.title,
                format!("target database not found: {}", target.display()),
            ));
        }

        if !master_credential && self.credential.is_empty() {
            return Err(SyncError::config(
                &self.title,
                "missing Password or valid KeyFilePath",
            ));
        }

        Ok(target)
    }
}

/// Read every job record from the jobs group of `db`.
///
/// A database without a jobs group simply has no jobs.
pub fn load_jobs(db: &KeepassDatabase, jobs_group: &str) -> Vec<SyncJob> {
    let root = db.root();
    let Some(group) = tree::subgroups(root).find(|g| g.name == jobs_group) else {
        tracing::debug!("No '{jobs_group}' group in {}", db.path().display());
        return Vec::new();
    };

    tree::entries(group)
        .map(|entry| SyncJob::from_entry(root, entry, db.path()))
        .collect()
}

/// Split a comma-separated filter, ignoring line breaks and blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.replace(['\r', '\n'], "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "on"
    )
}

fn is_expired(entry: &Entry) -> bool {
    let now = chrono::Utc::now().naive_utc();
    entry.times.expires && entry.times.get_expiry().is_some_and(|expiry| *expiry < now)
}
