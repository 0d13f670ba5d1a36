//! Field reference resolution.
//!
//! KeePass lets a field point at another entry's field with
//! `{REF:<wanted>@<search-in>:<text>}`, e.g. `{REF:P@I:0123ABCD...}` takes
//! the password of the entry with that identity. Once a record is copied to
//! another database the referenced entry may not exist there, so values are
//! resolved before they cross database boundaries.

use crate::error::SyncError;
use crate::tree;
use keepass::db::{Entry, Group};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use uuid::Uuid;

/// Nested references deeper than this are left as they are.
const MAX_DEPTH: usize = 12;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{REF:([TUPANI])@([TUPANIO]):([^}]*)\}").unwrap());

/// Resolve every reference inside the field `field` of `entry`.
pub fn resolve_field(root: &Group, entry: &Entry, field: &str) -> String {
    resolve(root, entry.get(field).unwrap_or_default())
}

/// Resolve every reference in `text` against the tree under `root`.
///
/// Unresolvable references keep their literal text.
pub fn resolve(root: &Group, text: &str) -> String {
    resolve_depth(root, text, 0)
}

fn resolve_depth(root: &Group, text: &str, depth: usize) -> String {
    if depth >= MAX_DEPTH || !REFERENCE.is_match(text) {
        return text.to_string();
    }

    REFERENCE
        .replace_all(text, |caps: &Captures| {
            match lookup(root, &caps[1], &caps[2], &caps[3]) {
                Some(value) => resolve_depth(root, &value, depth + 1),
                None => {
                    let err = SyncError::ReferenceResolution {
                        reference: caps[0].to_string(),
                    };
                    tracing::warn!("{err}");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn lookup(root: &Group, wanted: &str, search_in: &str, text: &str) -> Option<String> {
    let target = if search_in.eq_ignore_ascii_case("I") {
        let id = Uuid::parse_str(text.trim()).ok()?;
        tree::find_entry(root, id)?
    } else {
        let needle = text.to_lowercase();
        tree::all_entries(root)
            .into_iter()
            .find(|e| field_values(e, search_in).any(|v| v.to_lowercase().contains(&needle)))?
    };

    if wanted.eq_ignore_ascii_case("I") {
        return Some(target.uuid.simple().to_string().to_uppercase());
    }
    let field = standard_field(wanted)?;
    Some(target.get(field).unwrap_or_default().to_string())
}

fn standard_field(code: &str) -> Option<&'static str> {
    match code.to_ascii_uppercase().as_str() {
        "T" => Some("Title"),
        "U" => Some("UserName"),
        "P" => Some("Password"),
        "A" => Some("URL"),
        "N" => Some("Notes"),
        _ => None,
    }
}

/// Values of the fields a search code looks at; `O` means custom fields.
fn field_values<'a>(entry: &'a Entry, code: &str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    match standard_field(code) {
        Some(field) => Box::new(entry.get(field).into_iter()),
        None => Box::new(
            entry
                .fields
                .keys()
                .filter(|k| !matches!(k.as_str(), "Title" | "UserName" | "Password" | "URL" | "Notes"))
                .filter_map(move |k| entry.get(k)),
        ),
    }
}
