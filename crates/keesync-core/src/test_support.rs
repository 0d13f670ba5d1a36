//! Builders shared by the unit tests.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use keepass::config::DatabaseConfig;
use keepass::db::{Entry, Group, Node, Value};
use keepass::Database;

/// A fixed point in time, `hour` hours into 2024-01-01.
pub(crate) fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + TimeDelta::hours(i64::from(hour))
}

pub(crate) fn database() -> Database {
    Database::new(DatabaseConfig::default())
}

pub(crate) fn group(name: &str) -> Group {
    Group::new(name)
}

pub(crate) fn entry(title: &str, tags: &[&str], modified: NaiveDateTime) -> Entry {
    let mut entry = Entry::new();
    set_field(&mut entry, "Title", title);
    entry.tags = tags.iter().map(|t| t.to_string()).collect();
    entry.times.set_last_modification(modified);
    entry
}

pub(crate) fn set_field(entry: &mut Entry, name: &str, value: &str) {
    let value = if name == "Password" {
        Value::Protected(value.as_bytes().into())
    } else {
        Value::Unprotected(value.to_string())
    };
    entry.fields.insert(name.to_string(), value);
}

/// Append `node` under the group reached by following `names` from `root`,
/// creating groups as needed.
pub(crate) fn insert_at(root: &mut Group, names: &[&str], node: Node) {
    let mut current = root;
    for name in names {
        let index = match current
            .children
            .iter()
            .position(|n| matches!(n, Node::Group(g) if g.name == *name))
        {
            Some(index) => index,
            None => {
                current.children.push(Node::Group(group(name)));
                current.children.len() - 1
            }
        };
        current = match &mut current.children[index] {
            Node::Group(g) => g,
            Node::Entry(_) => unreachable!(),
        };
    }
    current.children.push(node);
}
