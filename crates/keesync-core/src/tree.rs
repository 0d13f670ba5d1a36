//! Navigation and editing helpers over `keepass` group trees.
//!
//! Groups and entries carry no parent pointers, so "where is this record"
//! is answered with identity chains: the identities of every group from
//! the root down to (and including) the record's parent.

use chrono::NaiveDateTime;
use keepass::db::{Entry, Group, Node};
use std::collections::{hash_map, HashMap, HashSet};
use uuid::Uuid;

/// Direct child groups of `group`.
pub fn subgroups(group: &Group) -> impl Iterator<Item = &Group> {
    group.children.iter().filter_map(|node| match node {
        Node::Group(g) => Some(g),
        Node::Entry(_) => None,
    })
}

/// Direct child entries of `group`.
pub fn entries(group: &Group) -> impl Iterator<Item = &Entry> {
    group.children.iter().filter_map(|node| match node {
        Node::Entry(e) => Some(e),
        Node::Group(_) => None,
    })
}

/// Every entry below `group`, in tree order.
pub fn all_entries(group: &Group) -> Vec<&Entry> {
    fn walk<'a>(group: &'a Group, out: &mut Vec<&'a Entry>) {
        for node in &group.children {
            match node {
                Node::Entry(e) => out.push(e),
                Node::Group(g) => walk(g, out),
            }
        }
    }

    let mut out = Vec::new();
    walk(group, &mut out);
    out
}

/// Every group below `group` (not including `group` itself), pre-order.
pub fn all_groups(group: &Group) -> Vec<&Group> {
    fn walk<'a>(group: &'a Group, out: &mut Vec<&'a Group>) {
        for g in subgroups(group) {
            out.push(g);
            walk(g, out);
        }
    }

    let mut out = Vec::new();
    walk(group, &mut out);
    out
}

/// Find an entry anywhere below `group`.
pub fn find_entry(group: &Group, uuid: Uuid) -> Option<&Entry> {
    for node in &group.children {
        match node {
            Node::Entry(e) if e.uuid == uuid => return Some(e),
            Node::Entry(_) => {}
            Node::Group(g) => {
                if let Some(e) = find_entry(g, uuid) {
                    return Some(e);
                }
            }
        }
    }
    None
}

/// Mutable variant of [`find_entry`].
pub fn find_entry_mut(group: &mut Group, uuid: Uuid) -> Option<&mut Entry> {
    for node in group.children.iter_mut() {
        match node {
            Node::Entry(e) if e.uuid == uuid => return Some(e),
            Node::Entry(_) => {}
            Node::Group(g) => {
                if let Some(e) = find_entry_mut(g, uuid) {
                    return Some(e);
                }
            }
        }
    }
    None
}

/// Find a group by identity, `group` itself included.
pub fn find_group(group: &Group, uuid: Uuid) -> Option<&Group> {
    if group.uuid == uuid {
        return Some(group);
    }
    subgroups(group).find_map(|g| find_group(g, uuid))
}

/// Walk down from `root` along `chain` (identities below the root).
pub fn group_at<'a>(root: &'a Group, chain: &[Uuid]) -> Option<&'a Group> {
    let mut current = root;
    for id in chain {
        current = subgroups(current).find(|g| g.uuid == *id)?;
    }
    Some(current)
}

/// Mutable variant of [`group_at`].
pub fn group_at_mut<'a>(root: &'a mut Group, chain: &[Uuid]) -> Option<&'a mut Group> {
    let mut current = root;
    for id in chain {
        current = current.children.iter_mut().find_map(|node| match node {
            Node::Group(g) if g.uuid == *id => Some(g),
            _ => None,
        })?;
    }
    Some(current)
}

/// The groups from `root` down to the parent of the entry `uuid`.
pub fn entry_ancestors(root: &Group, uuid: Uuid) -> Option<Vec<&Group>> {
    fn walk<'a>(group: &'a Group, uuid: Uuid, path: &mut Vec<&'a Group>) -> bool {
        path.push(group);
        for node in &group.children {
            match node {
                Node::Entry(e) if e.uuid == uuid => return true,
                Node::Entry(_) => {}
                Node::Group(g) => {
                    if walk(g, uuid, path) {
                        return true;
                    }
                }
            }
        }
        path.pop();
        false
    }

    let mut path = Vec::new();
    walk(root, uuid, &mut path).then_some(path)
}

/// The identity chain of every place the entry `uuid` occurs below `root`.
pub fn entry_locations(root: &Group, uuid: Uuid) -> Vec<Vec<Uuid>> {
    fn walk(group: &Group, uuid: Uuid, chain: &mut Vec<Uuid>, out: &mut Vec<Vec<Uuid>>) {
        chain.push(group.uuid);
        for node in &group.children {
            match node {
                Node::Entry(e) if e.uuid == uuid => out.push(chain.clone()),
                Node::Entry(_) => {}
                Node::Group(g) => walk(g, uuid, chain, out),
            }
        }
        chain.pop();
    }

    let mut out = Vec::new();
    walk(root, uuid, &mut Vec::new(), &mut out);
    out
}

/// Remove the entry `uuid` from the direct children of `group`.
pub fn take_entry(group: &mut Group, uuid: Uuid) -> Option<Entry> {
    let index = group
        .children
        .iter()
        .position(|node| matches!(node, Node::Entry(e) if e.uuid == uuid))?;
    match group.children.remove(index) {
        Node::Entry(e) => Some(e),
        Node::Group(_) => None,
    }
}

/// Remove every entry below `group` for which `predicate` holds.
pub fn remove_entries(group: &mut Group, predicate: &dyn Fn(&Entry) -> bool) -> usize {
    let before = group.children.len();
    group
        .children
        .retain(|node| !matches!(node, Node::Entry(e) if predicate(e)));
    let mut removed = before - group.children.len();

    for node in group.children.iter_mut() {
        if let Node::Group(g) = node {
            removed += remove_entries(g, predicate);
        }
    }
    removed
}

/// Keep a single copy of every entry identity, preferring the most recently
/// modified one (the first in tree order on a tie).
pub fn remove_duplicate_identities(root: &mut Group) -> usize {
    let mut keep: HashMap<Uuid, (usize, Option<NaiveDateTime>)> = HashMap::new();
    let mut total = 0;
    for (ordinal, entry) in all_entries(root).into_iter().enumerate() {
        total += 1;
        let modified = last_modified(entry);
        match keep.entry(entry.uuid) {
            hash_map::Entry::Vacant(slot) => {
                slot.insert((ordinal, modified));
            }
            hash_map::Entry::Occupied(mut slot) => {
                if modified > slot.get().1 {
                    slot.insert((ordinal, modified));
                }
            }
        }
    }

    if keep.len() == total {
        return 0;
    }

    fn retain(group: &mut Group, next: &mut usize, keep: &HashSet<usize>) -> usize {
        let mut removed = 0;
        group.children.retain_mut(|node| match node {
            Node::Entry(_) => {
                let kept = keep.contains(next);
                *next += 1;
                if !kept {
                    removed += 1;
                }
                kept
            }
            Node::Group(g) => {
                removed += retain(g, next, keep);
                true
            }
        });
        removed
    }

    let keep: HashSet<usize> = keep.values().map(|(ordinal, _)| *ordinal).collect();
    retain(root, &mut 0, &keep)
}

/// Remove groups that hold neither entries nor subgroups, bottom-up.
/// `group` itself is never removed, nor is any group `protected` accepts.
pub fn prune_empty_groups(group: &mut Group, protected: &dyn Fn(&Group) -> bool) -> usize {
    let mut removed = 0;
    for node in group.children.iter_mut() {
        if let Node::Group(g) = node {
            removed += prune_empty_groups(g, protected);
        }
    }

    let before = group.children.len();
    group.children.retain(|node| match node {
        Node::Group(g) => !g.children.is_empty() || protected(g),
        Node::Entry(_) => true,
    });
    removed + before - group.children.len()
}

/// Last modification time of an entry, if recorded.
pub fn last_modified(entry: &Entry) -> Option<NaiveDateTime> {
    entry.times.get_last_modification().copied()
}

/// Case-insensitive tag membership.
pub fn has_tag(entry: &Entry, tag: &str) -> bool {
    let wanted = tag.trim().to_lowercase();
    entry
        .tags
        .iter()
        .any(|t| t.trim().to_lowercase() == wanted)
}

/// Whether `group` is a recycle bin, either by its icon or by being the
/// database's configured recycle bin.
pub fn is_trash(group: &Group, recycle_bin: Option<Uuid>, trash_icon: usize) -> bool {
    group.icon_id == Some(trash_icon) || recycle_bin == Some(group.uuid)
}
