//! Classification of per-version change semantics and the tolerance policy.
//!
//! A stream emits inserted files only. Versions that delete or rewrite data
//! cannot be represented faithfully, so they either fail the stream or, when
//! the caller opts in, are degraded: removals are dropped and rewritten files
//! are re-emitted as plain inserts.
use std::fmt;

use log::warn;
use snafu::prelude::*;

use crate::{
    metadata::FileAction,
    stream::error::{StreamResult, UnsupportedChangeSnafu},
};

/// What a version does to existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Only new files (or nothing at all).
    Append,
    /// Only removals.
    Delete,
    /// Change-data files, or removals mixed with additions.
    Update,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Append => write!(f, "append"),
            ChangeKind::Delete => write!(f, "delete"),
            ChangeKind::Update => write!(f, "update"),
        }
    }
}

/// Classify the complete action list of one version.
pub fn classify(actions: &[FileAction]) -> ChangeKind {
    let mut adds = false;
    let mut removes = false;
    for action in actions {
        match action {
            FileAction::AddChange(_) => return ChangeKind::Update,
            FileAction::Add(_) => adds = true,
            FileAction::Remove(_) => removes = true,
        }
    }
    match (adds, removes) {
        (true, true) => ChangeKind::Update,
        (false, true) => ChangeKind::Delete,
        _ => ChangeKind::Append,
    }
}

/// Which data-changing versions a stream tolerates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangePolicy {
    /// Skip versions that only delete data.
    pub ignore_deletes: bool,
    /// Skip deletes and re-emit rewritten files as inserts.
    pub ignore_changes: bool,
}

impl ChangePolicy {
    /// Returns true when versions of `kind` may be consumed.
    pub fn allows(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Append => true,
            ChangeKind::Delete => self.ignore_deletes || self.ignore_changes,
            ChangeKind::Update => self.ignore_changes,
        }
    }
}

/// Enforces a [`ChangePolicy`] on each version before any of its actions is
/// emitted.
#[derive(Debug, Clone, Copy)]
pub struct ChangeSemanticsGuard {
    policy: ChangePolicy,
}

impl ChangeSemanticsGuard {
    /// Create a guard enforcing `policy`.
    pub fn new(policy: ChangePolicy) -> Self {
        Self { policy }
    }

    /// The policy in effect.
    pub fn policy(&self) -> ChangePolicy {
        self.policy
    }

    /// Classify `actions` (all actions of `version`) and fail unless the
    /// policy tolerates them.
    pub fn admit(&self, version: u64, actions: &[FileAction]) -> StreamResult<ChangeKind> {
        let kind = classify(actions);
        ensure!(
            self.policy.allows(kind),
            UnsupportedChangeSnafu { version, kind }
        );
        if kind != ChangeKind::Append {
            warn!("Consuming {kind} at table version {version}: removed files are skipped");
        }
        Ok(kind)
    }

    /// Rewrite admitted actions into what the stream emits: removals are
    /// dropped and change-data files become ordinary inserts.
    pub fn emit<'a>(actions: impl IntoIterator<Item = &'a FileAction>) -> Vec<FileAction> {
        actions
            .into_iter()
            .filter_map(|action| match action {
                FileAction::Add(file) | FileAction::AddChange(file) => {
                    Some(FileAction::Add(file.clone()))
                }
                FileAction::Remove(_) => None,
            })
            .collect()
    }
}
