//! Identity-keyed merge of selected entries from one database into another.
//!
//! The same routine serves both sync directions: whichever side holds the
//! more recently modified copy of a record wins, and a newer target copy is
//! written back into the source with the same cloning code.

use crate::reference;
use crate::selector::Selection;
use crate::tree;
use keepass::db::{Entry, Group, Node, Value};
use keepass::Database;
use std::ops::AddAssign;
use uuid::Uuid;

/// Fields that are always copied with references resolved.
const RESOLVED_FIELDS: [&str; 4] = ["Title", "UserName", "Password", "URL"];

/// Per-merge behaviour.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Copy only title, user name, password and URL.
    pub user_and_pass_only: bool,
    /// Standard icon that marks a recycle bin group.
    pub trash_icon: usize,
    /// Group never pruned from the target even when empty.
    pub jobs_group: String,
}

/// Result of a target cleanup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cleanup {
    pub duplicates: usize,
    pub empty_groups: usize,
}

impl AddAssign for Cleanup {
    fn add_assign(&mut self, other: Self) {
        self.duplicates += other.duplicates;
        self.empty_groups += other.empty_groups;
    }
}

/// What a merge did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub created: usize,
    pub updated: usize,
    pub written_back: usize,
    pub relocated: usize,
    pub skipped_in_trash: usize,
    pub groups_created: usize,
    pub cleanup: Cleanup,
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.written_back += other.written_back;
        self.relocated += other.relocated;
        self.skipped_in_trash += other.skipped_in_trash;
        self.groups_created += other.groups_created;
        self.cleanup += other.cleanup;
    }
}

/// Merge every selected entry of `source` into `target`.
///
/// Neither database is saved here.
pub fn apply(
    source: &mut Database,
    target: &mut Database,
    selection: &Selection,
    options: &MergeOptions,
) -> MergeStats {
    let mut stats = MergeStats::default();
    copy_custom_icon(source, target, source.root.custom_icon_uuid, "root group");

    for &uuid in &selection.entries {
        merge_entry(source, target, uuid, options, &mut stats);
        stats.cleanup += clean_target(target, &options.jobs_group);
    }

    tracing::debug!("Merge finished: {stats:?}");
    stats
}

fn merge_entry(
    source: &mut Database,
    target: &mut Database,
    uuid: Uuid,
    options: &MergeOptions,
    stats: &mut MergeStats,
) {
    let Some(ancestors) = tree::entry_ancestors(&source.root, uuid) else {
        tracing::warn!("Selected entry {uuid} is no longer in the source");
        return;
    };
    // Identities below the root; shared between both trees once mirrored.
    let chain: Vec<Uuid> = ancestors.iter().skip(1).map(|g| g.uuid).collect();
    let in_trash = ancestors
        .iter()
        .skip(1)
        .any(|g| tree::is_trash(g, source.meta.recyclebin_uuid, options.trash_icon));

    if !mirror_groups(source, target, &chain, stats) {
        tracing::warn!("Could not mirror the groups of entry {uuid}");
        return;
    }

    let mut target_chain = Vec::with_capacity(chain.len() + 1);
    target_chain.push(target.root.uuid);
    target_chain.extend_from_slice(&chain);

    let locations = tree::entry_locations(&target.root, uuid);

    // A newer copy that has not moved since the last sync wins.
    if locations.contains(&target_chain) {
        let newer = tree::group_at(&target.root, &chain)
            .and_then(|g| tree::entries(g).find(|t| t.uuid == uuid))
            .filter(|t| {
                let source_modified = tree::find_entry(&source.root, uuid).and_then(tree::last_modified);
                tree::last_modified(t) > source_modified
            })
            .cloned();

        if let Some(newer) = newer {
            if let Some(local) = tree::find_entry_mut(&mut source.root, uuid) {
                clone_entry(&target.root, &newer, local, options.user_and_pass_only);
            }
            copy_custom_icon(target, source, newer.custom_icon_uuid, &entry_label(&newer));
            tracing::debug!("Wrote back newer target copy of {}", entry_label(&newer));
            stats.written_back += 1;
            return;
        }
    }

    // Copies elsewhere in the target mean the record moved groups.
    for location in locations.iter().filter(|l| **l != target_chain) {
        if let Some(group) = tree::group_at_mut(&mut target.root, &location[1..]) {
            if tree::take_entry(group, uuid).is_some() {
                stats.relocated += 1;
            }
        }
    }

    if in_trash {
        stats.skipped_in_trash += 1;
        return;
    }

    let Some(entry) = tree::find_entry(&source.root, uuid) else {
        return;
    };
    let Some(group) = tree::group_at_mut(&mut target.root, &chain) else {
        return;
    };

    let existing = group.children.iter_mut().find_map(|node| match node {
        Node::Entry(t) if t.uuid == uuid => Some(t),
        _ => None,
    });
    match existing {
        Some(existing) => {
            clone_entry(&source.root, entry, existing, options.user_and_pass_only);
            stats.updated += 1;
        }
        None => {
            let mut created = Entry::new();
            created.uuid = uuid;
            clone_entry(&source.root, entry, &mut created, options.user_and_pass_only);
            group.children.push(Node::Entry(created));
            stats.created += 1;
        }
    }

    let (icon, label) = (entry.custom_icon_uuid, entry_label(entry));
    copy_custom_icon(source, target, icon, &label);
}

/// Make sure the groups in `chain` exist below the target root, creating
/// missing ones from their source counterparts. Returns false if a source
/// group cannot be found.
fn mirror_groups(
    source: &Database,
    target: &mut Database,
    chain: &[Uuid],
    stats: &mut MergeStats,
) -> bool {
    let mut icons = Vec::new();
    let mut current = &mut target.root;

    for id in chain {
        if child_group_mut(current, *id).is_none() {
            let Some(original) = tree::find_group(&source.root, *id) else {
                return false;
            };
            let mut mirrored = original.clone();
            mirrored.children.clear();
            if let Some(icon) = mirrored.custom_icon_uuid {
                icons.push((icon, mirrored.name.clone()));
            }
            current.children.push(Node::Group(mirrored));
            stats.groups_created += 1;
        }
        match child_group_mut(current, *id) {
            Some(next) => current = next,
            None => return false,
        }
    }

    for (icon, name) in icons {
        copy_custom_icon(source, target, Some(icon), &format!("group {name}"));
    }
    true
}

fn child_group_mut(group: &mut Group, id: Uuid) -> Option<&mut Group> {
    group.children.iter_mut().find_map(|node| match node {
        Node::Group(g) if g.uuid == id => Some(g),
        _ => None,
    })
}

/// Copy `from` into `into`.
///
/// Everything is copied unless `user_and_pass_only` is set, in which case
/// only the resolved fields are. Those fields always carry the resolved
/// value, since the referenced entry may not exist on the other side.
pub fn clone_entry(from_root: &Group, from: &Entry, into: &mut Entry, user_and_pass_only: bool) {
    if !user_and_pass_only {
        *into = from.clone();
    }

    for field in RESOLVED_FIELDS {
        let value = reference::resolve_field(from_root, from, field);
        let value = match from.fields.get(field) {
            Some(Value::Protected(_)) => Value::Protected(value.as_bytes().into()),
            _ => Value::Unprotected(value),
        };
        into.fields.insert(field.to_string(), value);
    }

    if let Some(modified) = tree::last_modified(from) {
        into.times.set_last_modification(modified);
    }
}

/// Copy the custom icon `icon` from `from` into `to` if it is missing there.
pub fn copy_custom_icon(from: &Database, to: &mut Database, icon: Option<Uuid>, owner: &str) {
    let Some(icon) = icon else {
        return;
    };
    if to.meta.custom_icons.icons.iter().any(|i| i.uuid == icon) {
        return;
    }

    match from.meta.custom_icons.icons.iter().find(|i| i.uuid == icon) {
        Some(found) => to.meta.custom_icons.icons.push(found.clone()),
        None => tracing::warn!("Can't locate custom icon ({icon}) for {owner}"),
    }
}

/// Drop duplicated identities and empty groups from a target tree.
///
/// The recycle bin and the jobs group are kept even when empty.
pub fn clean_target(target: &mut Database, jobs_group: &str) -> Cleanup {
    let recycle_bin = target.meta.recyclebin_uuid;
    let duplicates = tree::remove_duplicate_identities(&mut target.root);
    let empty_groups = tree::prune_empty_groups(&mut target.root, &|g| {
        recycle_bin == Some(g.uuid) || g.name == jobs_group
    });
    Cleanup {
        duplicates,
        empty_groups,
    }
}

fn entry_label(entry: &Entry) -> String {
    format!("entry {}", entry.get_title().unwrap_or_default())
}
