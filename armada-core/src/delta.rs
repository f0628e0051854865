//! Field-level comparison of two branch descriptions.

use serde::Serialize;

use crate::types::{BranchDescription, GitCommitDescription};

/// Which fields differ between a changeset's current spec and the new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Delta {
    pub title: bool,
    pub body: bool,
    pub base_ref: bool,
    pub diff: bool,
    pub commit_message: bool,
    pub author: bool,
    pub published: bool,
}

impl Delta {
    /// Every field changed; used when there is no previous spec to compare.
    pub fn all() -> Self {
        Self {
            title: true,
            body: true,
            base_ref: true,
            diff: true,
            commit_message: true,
            author: true,
            published: true,
        }
    }

    pub fn between(old: &BranchDescription, new: &BranchDescription) -> Self {
        let (old_commit, new_commit) = (old.commit(), new.commit());
        let diff_of = |c: Option<&GitCommitDescription>| {
            c.map(|c| armada_diff::diff_hash(&c.diff))
        };
        Self {
            title: old.title != new.title,
            body: old.body != new.body,
            base_ref: old.base_ref != new.base_ref,
            diff: diff_of(old_commit) != diff_of(new_commit),
            commit_message: old_commit.map(|c| &c.message) != new_commit.map(|c| &c.message),
            author: old_commit.map(|c| (&c.author_name, &c.author_email))
                != new_commit.map(|c| (&c.author_name, &c.author_email)),
            published: old.published != new.published,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The branch must be pushed again.
    pub fn needs_push(&self) -> bool {
        self.diff || self.commit_message || self.author
    }

    /// The changeset's metadata on the host must be edited.
    pub fn needs_update(&self) -> bool {
        self.title || self.body || self.base_ref
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            (self.title, "title"),
            (self.body, "body"),
            (self.base_ref, "base_ref"),
            (self.diff, "diff"),
            (self.commit_message, "commit_message"),
            (self.author, "author"),
            (self.published, "published"),
        ]
        .into_iter()
        .filter_map(|(changed, name)| changed.then_some(name))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(title: &str, diff: &str) -> BranchDescription {
        BranchDescription {
            base_ref: "refs/heads/main".into(),
            base_rev: "abc".into(),
            head_ref: "refs/heads/fix".into(),
            title: title.into(),
            body: "body".into(),
            commits: vec![GitCommitDescription {
                message: "fix".into(),
                diff: diff.into(),
                author_name: "a".into(),
                author_email: "a@example.com".into(),
            }],
            published: crate::PublishIntent::Unpublished,
        }
    }

    #[test]
    fn title_change_needs_update_only() {
        let delta = Delta::between(&branch("a", "d"), &branch("b", "d"));
        assert!(delta.needs_update());
        assert!(!delta.needs_push());
        assert_eq!(delta.changed_fields(), vec!["title"]);
    }

    #[test]
    fn diff_change_needs_push() {
        let delta = Delta::between(&branch("a", "d1\n"), &branch("a", "d2\n"));
        assert!(delta.needs_push());
        assert!(!delta.needs_update());
        assert!(!Delta::all().is_empty());
    }
}
