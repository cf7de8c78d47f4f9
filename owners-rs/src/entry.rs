use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tracing::warn;

use crate::{
    accounts::{strip_owner_domain, AccountId, IdentityResolver},
    label::LabelDefinition,
    matcher::Matcher,
    parser::OwnersConfig,
};

/// The effective ownership state of one directory: its own OWNERS file
/// merged with whatever it inherits from its ancestors.
///
/// Entries are built once per directory and then shared read-only, usually
/// behind an [`Arc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOwnersEntry {
    /// Path of the OWNERS file that last contributed to this entry.
    pub owners_path: Option<String>,
    pub owners: BTreeSet<AccountId>,
    pub reviewers: BTreeSet<AccountId>,
    /// Display form of every owner identity, including `group/...`
    /// references. Group members are in `owners` as well.
    pub group_owners: BTreeSet<String>,
    pub matchers: BTreeMap<String, Matcher>,
    pub inherited: bool,
    pub label: Option<LabelDefinition>,
}

impl Default for PathOwnersEntry {
    fn default() -> Self {
        PathOwnersEntry {
            owners_path: None,
            owners: BTreeSet::new(),
            reviewers: BTreeSet::new(),
            group_owners: BTreeSet::new(),
            matchers: BTreeMap::new(),
            inherited: true,
            label: None,
        }
    }
}

impl PathOwnersEntry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the entry for a directory holding `config` at `owners_path`.
    ///
    /// With `inherited: true` the parent's state is merged in, otherwise the
    /// chain is cut and only `config` counts.
    pub fn resolve(
        owners_path: &str,
        config: &OwnersConfig,
        parent: &PathOwnersEntry,
        accounts: &dyn IdentityResolver,
    ) -> PathOwnersEntry {
        let mut entry = PathOwnersEntry {
            owners_path: Some(owners_path.to_owned()),
            owners: config
                .owners
                .iter()
                .flat_map(|owner| accounts.find(owner))
                .collect(),
            reviewers: config
                .reviewers
                .iter()
                .flat_map(|reviewer| accounts.find(reviewer))
                .collect(),
            group_owners: config
                .owners
                .iter()
                .map(|owner| strip_owner_domain(owner).to_owned())
                .collect(),
            matchers: config.matchers.clone(),
            inherited: config.inherited,
            label: config.label.clone(),
        };

        if !config.inherited {
            return entry;
        }

        entry.owners.extend(parent.owners.iter().copied());
        entry.reviewers.extend(parent.reviewers.iter().copied());
        entry
            .group_owners
            .extend(parent.group_owners.iter().cloned());
        if entry.label.is_none() {
            entry.label = parent.label.clone();
        }

        for (key, inherited) in &parent.matchers {
            match entry.matchers.get(key) {
                None => {
                    entry.matchers.insert(key.clone(), inherited.clone());
                }
                Some(own) => match own.merge(inherited) {
                    Ok(merged) => {
                        entry.matchers.insert(key.clone(), merged);
                    }
                    Err(err) => {
                        warn!("{} in {}, keeping the closer matcher", err, owners_path);
                    }
                },
            }
        }

        entry
    }

    /// The entry of a directory that may or may not have an OWNERS file of
    /// its own. Without one the parent entry is shared unchanged.
    pub fn child(
        parent: &Arc<PathOwnersEntry>,
        owners_path: &str,
        config: Option<&OwnersConfig>,
        accounts: &dyn IdentityResolver,
    ) -> Arc<PathOwnersEntry> {
        match config {
            Some(config) => Arc::new(Self::resolve(owners_path, config, parent, accounts)),
            None => Arc::clone(parent),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        matcher::{Pattern, PatternKind},
        testutil::test_accounts,
    };

    use super::*;

    fn config(source: &str) -> OwnersConfig {
        let accounts = test_accounts();
        crate::parser::ConfigurationParser::new(&accounts)
            .parse(source.as_bytes())
            .unwrap()
    }

    fn ids(ids: &[u32]) -> BTreeSet<AccountId> {
        ids.iter().copied().map(AccountId).collect()
    }

    #[test]
    fn test_inheritance() {
        let accounts = test_accounts();
        let root = PathOwnersEntry::resolve(
            "OWNERS",
            &config("owners: [a]\nlabel: Verified\n"),
            &PathOwnersEntry::empty(),
            &accounts,
        );

        let examples = vec![
            (
                "inherited: true\nowners: [b]\n",
                ids(&[1, 2]),
                Some("Verified"),
            ),
            ("inherited: false\nowners: [b]\n", ids(&[2]), None),
            ("owners: [b]\nlabel: Other,1\n", ids(&[1, 2]), Some("Other")),
        ];
        for (source, owners, label) in examples {
            let entry = PathOwnersEntry::resolve("dir/OWNERS", &config(source), &root, &accounts);
            assert_eq!(entry.owners, owners, "owners mismatch for `{}`", source);
            assert_eq!(
                entry.label.as_ref().map(|l| l.name.as_str()),
                label,
                "label mismatch for `{}`",
                source
            );
            assert_eq!(entry.owners_path.as_deref(), Some("dir/OWNERS"));
        }
    }

    #[test]
    fn test_group_owners_resolve_to_members() {
        let accounts = test_accounts();
        let entry = PathOwnersEntry::resolve(
            "OWNERS",
            &config("owners: [c@example.com, group/core]\nreviewers: [group/core]\n"),
            &PathOwnersEntry::empty(),
            &accounts,
        );

        assert_eq!(entry.owners, ids(&[1, 2, 3]));
        assert_eq!(
            entry.group_owners,
            BTreeSet::from(["c".to_owned(), "group/core".to_owned()])
        );
        assert_eq!(entry.reviewers, accounts.find("group/core"));
    }

    #[test]
    fn test_matchers_merge_by_key() {
        let accounts = test_accounts();
        let parent = PathOwnersEntry::resolve(
            "OWNERS",
            &config(
                "matchers:\n  - suffix: .sql\n    owners: [b]\n  - exact: x\n    owners: [c]\n",
            ),
            &PathOwnersEntry::empty(),
            &accounts,
        );
        let child = PathOwnersEntry::resolve(
            "dir/OWNERS",
            &config(
                "matchers:\n  - suffix: .sql\n    owners: [d]\n  - regex: x\n    owners: [e]\n",
            ),
            &parent,
            &accounts,
        );

        assert_eq!(child.matchers[".sql"].owners, ids(&[2, 4]));
        // the regex `x` clashes with the inherited exact `x`, the closer one stays
        assert_eq!(
            child.matchers["x"].pattern,
            Pattern::new(PatternKind::Regex, "x").unwrap()
        );
        assert_eq!(child.matchers["x"].owners, ids(&[5]));
    }

    #[test]
    fn test_child_without_config_is_shared() {
        let accounts = test_accounts();
        let parent = Arc::new(PathOwnersEntry::empty());
        let child = PathOwnersEntry::child(&parent, "dir/OWNERS", None, &accounts);
        assert!(Arc::ptr_eq(&parent, &child));
    }
}
