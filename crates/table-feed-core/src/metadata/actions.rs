//! File-level actions recorded by table versions.
//!
//! Each committed version carries an ordered list of [`FileAction`] values
//! describing which data files became visible or invisible. The enum is closed
//! on purpose: every consumer of the log matches it exhaustively.
use std::{cmp::Ordering, collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Partition values of a data file, keyed by partition column name.
///
/// `None` encodes a null partition value.
pub type PartitionValues = BTreeMap<String, Option<String>>;

/// A data file that becomes visible (or carries change rows) at a version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFile {
    /// Path or URL of the file, relative to the table unless absolute.
    pub path: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Partition values of every row in the file.
    #[serde(default)]
    pub partition_values: PartitionValues,
    /// Version that committed this action.
    pub commit_version: u64,
    /// Commit timestamp of that version.
    pub commit_timestamp: DateTime<Utc>,
}

/// A data file that stops being visible at a version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedFile {
    /// Path of the file that was removed.
    pub path: String,
    /// Version that committed this action.
    pub commit_version: u64,
    /// Commit timestamp of that version.
    pub commit_timestamp: DateTime<Utc>,
}

/// An action recorded in a table version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FileAction {
    /// A new row group becomes visible.
    Add(DataFile),
    /// A previously visible row group is no longer visible.
    Remove(RemovedFile),
    /// A row group holding inserted/updated/deleted row deltas of the commit.
    AddChange(DataFile),
}

/// Discriminant of a [`FileAction`], in canonical ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    /// [`FileAction::Add`].
    Add,
    /// [`FileAction::AddChange`].
    AddChange,
    /// [`FileAction::Remove`].
    Remove,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Add => write!(f, "add"),
            ActionKind::AddChange => write!(f, "cdc"),
            ActionKind::Remove => write!(f, "remove"),
        }
    }
}

impl FileAction {
    /// Path of the file this action refers to.
    pub fn path(&self) -> &str {
        match self {
            FileAction::Add(f) | FileAction::AddChange(f) => &f.path,
            FileAction::Remove(r) => &r.path,
        }
    }

    /// Version that committed this action.
    pub fn commit_version(&self) -> u64 {
        match self {
            FileAction::Add(f) | FileAction::AddChange(f) => f.commit_version,
            FileAction::Remove(r) => r.commit_version,
        }
    }

    /// Commit timestamp of the version that committed this action.
    pub fn commit_timestamp(&self) -> DateTime<Utc> {
        match self {
            FileAction::Add(f) | FileAction::AddChange(f) => f.commit_timestamp,
            FileAction::Remove(r) => r.commit_timestamp,
        }
    }

    /// Size of the referenced file; removals carry no size.
    pub fn size_bytes(&self) -> u64 {
        match self {
            FileAction::Add(f) | FileAction::AddChange(f) => f.size_bytes,
            FileAction::Remove(_) => 0,
        }
    }

    /// The action's discriminant.
    pub fn kind(&self) -> ActionKind {
        match self {
            FileAction::Add(_) => ActionKind::Add,
            FileAction::AddChange(_) => ActionKind::AddChange,
            FileAction::Remove(_) => ActionKind::Remove,
        }
    }
}

/// Canonical order of actions within one version: path, then kind, then the
/// remaining fields (size, partition values, commit version and timestamp).
///
/// Only identical actions compare equal.
pub fn cmp_canonical(a: &FileAction, b: &FileAction) -> Ordering {
    a.path()
        .cmp(b.path())
        .then_with(|| a.kind().cmp(&b.kind()))
        .then_with(|| match (a, b) {
            (FileAction::Add(x), FileAction::Add(y))
            | (FileAction::AddChange(x), FileAction::AddChange(y)) => x.cmp(y),
            (FileAction::Remove(x), FileAction::Remove(y)) => x.cmp(y),
            _ => Ordering::Equal,
        })
}

/// Sort the actions of a single version into canonical order. The result
/// does not depend on the order the server listed them in.
pub fn sort_canonical(actions: &mut [FileAction]) {
    actions.sort_by(cmp_canonical);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn add(path: &str) -> FileAction {
        FileAction::Add(DataFile {
            path: path.to_string(),
            size_bytes: 10,
            partition_values: PartitionValues::new(),
            commit_version: 3,
            commit_timestamp: ts(),
        })
    }

    fn remove(path: &str) -> FileAction {
        FileAction::Remove(RemovedFile {
            path: path.to_string(),
            commit_version: 3,
            commit_timestamp: ts(),
        })
    }

    fn cdc(path: &str) -> FileAction {
        match add(path) {
            FileAction::Add(f) => FileAction::AddChange(f),
            other => other,
        }
    }

    #[test]
    fn canonical_order_is_path_then_kind() {
        let mut actions = vec![remove("b"), cdc("a"), add("b"), remove("a"), add("a")];
        sort_canonical(&mut actions);

        let got: Vec<(String, ActionKind)> = actions
            .iter()
            .map(|a| (a.path().to_string(), a.kind()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("a".to_string(), ActionKind::Add),
                ("a".to_string(), ActionKind::AddChange),
                ("a".to_string(), ActionKind::Remove),
                ("b".to_string(), ActionKind::Add),
                ("b".to_string(), ActionKind::Remove),
            ]
        );
    }

    #[test]
    fn canonical_order_ignores_input_permutation() {
        let mut left = vec![add("c"), remove("a"), add("b")];
        let mut right = vec![add("b"), add("c"), remove("a")];
        sort_canonical(&mut left);
        sort_canonical(&mut right);
        assert_eq!(left, right);
    }

    #[test]
    fn same_path_and_kind_still_sort_deterministically() {
        let sized = |size: u64, day: Option<&str>| {
            let mut partition_values = PartitionValues::new();
            partition_values.insert("day".to_string(), day.map(str::to_string));
            FileAction::Add(DataFile {
                path: "dup".to_string(),
                size_bytes: size,
                partition_values,
                commit_version: 3,
                commit_timestamp: ts(),
            })
        };
        let mut left = vec![sized(20, Some("2")), sized(10, Some("1")), sized(20, None)];
        let mut right = vec![sized(20, None), sized(20, Some("2")), sized(10, Some("1"))];
        sort_canonical(&mut left);
        sort_canonical(&mut right);

        assert_eq!(left, right);
        assert_eq!(left[0].size_bytes(), 10);
        assert_eq!(cmp_canonical(&left[1], &left[2]), Ordering::Less);
        assert_eq!(cmp_canonical(&left[0], &left[0].clone()), Ordering::Equal);
    }

    #[test]
    fn action_json_is_internally_tagged() {
        let json = serde_json::to_string(&remove("x")).expect("serialize");
        assert!(json.contains("\"type\":\"remove\""));
        assert!(json.contains("\"commitVersion\":3"));

        let decoded: FileAction = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, remove("x"));
    }

    #[test]
    fn removals_report_zero_size() {
        assert_eq!(remove("x").size_bytes(), 0);
        assert_eq!(add("x").size_bytes(), 10);
    }
}
