//! Selection of the entries a job propagates.

use crate::error::{Result, SyncError};
use crate::jobs::SyncJob;
use crate::tree;
use keepass::db::{Entry, Group};
use std::collections::HashSet;
use uuid::Uuid;

/// Entries matched by a job, de-duplicated by identity.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Selection {
    /// Matched identities, in discovery order.
    pub entries: Vec<Uuid>,
    /// Group filters that did not fully resolve.
    pub warnings: Vec<String>,
    seen: HashSet<Uuid>,
}

impl Selection {
    pub fn contains(&self, uuid: Uuid) -> bool {
        self.seen.contains(&uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn extend<'a>(&mut self, entries: impl IntoIterator<Item = &'a Entry>) {
        for entry in entries {
            if self.seen.insert(entry.uuid) {
                self.entries.push(entry.uuid);
            }
        }
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}

/// Compute the entries under `root` that `job` selects.
///
/// - tags only: every entry carrying any of the tags
/// - groups only: every entry inside any of the groups (recursively)
/// - both: entries inside the groups that also carry one of the tags
pub fn select(root: &Group, job: &SyncJob) -> Result<Selection> {
    let mut selection = Selection::default();

    match (job.tags.is_empty(), job.groups.is_empty()) {
        (false, true) => {
            for tag in &job.tags {
                let tagged = tree::all_entries(root)
                    .into_iter()
                    .filter(|e| tree::has_tag(e, tag));
                selection.extend(tagged);
            }
        }
        (true, false) => {
            for name in &job.groups {
                for group in resolve_groups(root, name, &mut selection) {
                    selection.extend(tree::all_entries(group));
                }
            }
        }
        (false, false) => {
            for name in &job.groups {
                for group in resolve_groups(root, name, &mut selection) {
                    for tag in &job.tags {
                        let tagged = tree::all_entries(group)
                            .into_iter()
                            .filter(|e| tree::has_tag(e, tag));
                        selection.extend(tagged);
                    }
                }
            }
        }
        (true, true) => {
            return Err(SyncError::config(
                &job.title,
                "at least one of Tag or Group must be set",
            ))
        }
    }

    tracing::debug!("Job '{}' matched {} entries", job.title, selection.len());
    Ok(selection)
}

/// Resolve a group filter to the groups it names.
///
/// A plain name matches every group with that name. A `/`-separated path
/// starts from every group named like its first segment and descends one
/// segment at a time; if a segment is missing the deepest groups reached so
/// far are used and a warning is recorded.
fn resolve_groups<'a>(root: &'a Group, name: &str, selection: &mut Selection) -> Vec<&'a Group> {
    let found: Vec<&Group> = if name.contains('/') {
        let mut current: Vec<&Group> = Vec::new();
        let mut path = String::new();
        for (depth, segment) in name.split('/').map(str::trim).filter(|s| !s.is_empty()).enumerate() {
            path.push('/');
            path.push_str(segment);
            let next: Vec<&Group> = if depth == 0 {
                tree::all_groups(root)
                    .into_iter()
                    .filter(|g| g.name == segment)
                    .collect()
            } else {
                current
                    .iter()
                    .copied()
                    .flat_map(|g| tree::subgroups(g))
                    .filter(|g| g.name == segment)
                    .collect()
            };

            if next.is_empty() {
                selection.warn(format!("Path {path} to group not found"));
                break;
            }
            current = next;
        }
        current
    } else {
        tree::all_groups(root)
            .into_iter()
            .filter(|g| g.name == name)
            .collect()
    };

    if found.is_empty() {
        selection.warn(format!("No group with the name {name} found"));
    }
    found
}
