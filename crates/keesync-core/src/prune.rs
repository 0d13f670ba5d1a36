//! Deletion propagation: records that left a job's selection leave its target.

use crate::merge::{clean_target, Cleanup};
use crate::selector::Selection;
use crate::tree;
use keepass::Database;
use std::collections::HashSet;
use uuid::Uuid;

/// What a prune pass removed from the target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub deleted: usize,
    pub cleanup: Cleanup,
}

/// Delete from `target` every entry that exists in `source` but is not part
/// of `selection`.
///
/// Target entries unknown to the source are left alone.
pub fn prune(
    source: &Database,
    target: &mut Database,
    selection: &Selection,
    jobs_group: &str,
) -> PruneStats {
    let unselected: HashSet<Uuid> = tree::all_entries(&source.root)
        .into_iter()
        .map(|e| e.uuid)
        .filter(|uuid| !selection.contains(*uuid))
        .collect();

    let deleted = tree::remove_entries(&mut target.root, &|e| unselected.contains(&e.uuid));
    if deleted == 0 {
        return PruneStats::default();
    }

    tracing::info!("Deleted {deleted} entries that no longer match");
    PruneStats {
        deleted,
        cleanup: clean_target(target, jobs_group),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use crate::jobs::SyncJob;
    use crate::merge::{self, MergeOptions};
    use crate::selector;
    use crate::test_support::{at, database, entry, insert_at};
    use keepass::db::Node;

    fn tag_job(tag: &str) -> SyncJob {
        SyncJob {
            title: "prune".to_string(),
            target_path: None,
            credential: Credential::default(),
            disabled: false,
            tags: vec![tag.to_string()],
            groups: Vec::new(),
            is_slave: false,
            export_user_and_pass_only: false,
        }
    }

    #[test]
    fn untagged_entries_are_removed_from_the_target() {
        let mut source = database();
        let keep = entry("keep", &["sync"], at(0));
        let drop = entry("drop", &["sync"], at(0));
        let (keep_id, drop_id) = (keep.uuid, drop.uuid);
        insert_at(&mut source.root, &["Web"], Node::Entry(keep));
        insert_at(&mut source.root, &["Old"], Node::Entry(drop));

        let mut target = database();
        let local = entry("target only", &[], at(0));
        let local_id = local.uuid;
        target.root.children.push(Node::Entry(local));

        let job = tag_job("sync");
        let options = MergeOptions {
            user_and_pass_only: false,
            trash_icon: 43,
            jobs_group: "MSSyncJobs".to_string(),
        };
        let selection = selector::select(&source.root, &job).unwrap();
        merge::apply(&mut source, &mut target, &selection, &options);
        assert!(tree::find_entry(&target.root, drop_id).is_some());

        tree::find_entry_mut(&mut source.root, drop_id).unwrap().tags.clear();
        let selection = selector::select(&source.root, &job).unwrap();
        let stats = prune(&source, &mut target, &selection, "MSSyncJobs");

        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.cleanup.empty_groups, 1);
        assert!(tree::find_entry(&target.root, drop_id).is_none());
        assert!(tree::find_entry(&target.root, keep_id).is_some());
        assert!(tree::find_entry(&target.root, local_id).is_some());
    }

    #[test]
    fn nothing_to_delete_means_no_cleanup() {
        let source = database();
        let mut target = database();
        target.root.children.push(Node::Group(crate::test_support::group("Empty")));

        let stats = prune(&source, &mut target, &Selection::default(), "MSSyncJobs");

        assert_eq!(stats, PruneStats::default());
        assert_eq!(tree::all_groups(&target.root).len(), 1);
    }
}
