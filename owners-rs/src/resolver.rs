use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    accounts::{is_group, AccountId, IdentityResolver},
    blob::{BlobReader, REFS_CONFIG},
    cache::{CacheKey, CachedConfig, PathOwnersEntriesCache},
    entry::PathOwnersEntry,
    error::OwnersError,
    label::LabelDefinition,
    matcher::{Matcher, MatcherLevel},
    parser::{ConfigurationParser, OwnersConfig},
    path_tree::{NodeId, PathTree},
};

pub const OWNERS_FILE: &str = "OWNERS";

const MATCHER_LEVELS: [MatcherLevel; 3] = [
    MatcherLevel::Regular,
    MatcherLevel::Fallback,
    MatcherLevel::CatchAll,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// List group owners by their members. Group members always count as
    /// owners in `file_owners`; without expansion `file_group_owners` keeps
    /// the `group/...` references for display.
    pub expand_groups: bool,
    /// Fail the whole resolution on an unreadable or unparseable OWNERS file
    /// instead of ignoring that file.
    pub strict: bool,
    /// Label overriding whatever the OWNERS files configure.
    pub global_label: Option<LabelDefinition>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            expand_groups: true,
            strict: false,
            global_label: None,
        }
    }
}

/// The change to resolve owners for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub project: String,
    /// Ancestors of the project, closest first.
    pub parent_projects: Vec<String>,
    /// Target branch, `None` when owners are disabled for it.
    pub branch: Option<String>,
    pub modified_paths: BTreeSet<String>,
}

impl ResolveRequest {
    pub fn new<I, S>(project: &str, branch: &str, modified_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ResolveRequest {
            project: project.to_owned(),
            parent_projects: Vec::new(),
            branch: Some(branch.to_owned()),
            modified_paths: modified_paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parent_projects = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the target branch. `None` disables owners for the request.
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }
}

/// Result of an ownership resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnersMap {
    /// Owners by the OWNERS file declaring them.
    pub path_owners: BTreeMap<String, BTreeSet<AccountId>>,
    pub path_reviewers: BTreeMap<String, BTreeSet<AccountId>>,
    /// Matchers that matched at least one modified file.
    pub matchers: BTreeMap<String, Matcher>,
    pub file_owners: BTreeMap<String, BTreeSet<AccountId>>,
    pub file_reviewers: BTreeMap<String, BTreeSet<AccountId>>,
    pub file_group_owners: BTreeMap<String, BTreeSet<String>>,
    pub file_labels: BTreeMap<String, LabelDefinition>,
    pub label: Option<LabelDefinition>,
}

impl OwnersMap {
    pub fn is_empty(&self) -> bool {
        self.path_owners.is_empty() && self.matchers.is_empty() && self.file_owners.is_empty()
    }

    /// The label owners must vote on: the resolved one, or `Code-Review`.
    pub fn effective_label(&self) -> LabelDefinition {
        self.label
            .clone()
            .unwrap_or_else(LabelDefinition::code_review)
    }

    fn add_path_owners(&mut self, owners_path: &str, owners: &BTreeSet<AccountId>) {
        extend_entry(&mut self.path_owners, owners_path, owners);
    }

    fn add_path_reviewers(&mut self, owners_path: &str, reviewers: &BTreeSet<AccountId>) {
        extend_entry(&mut self.path_reviewers, owners_path, reviewers);
    }

    fn add_file_owners(&mut self, path: &str, owners: &BTreeSet<AccountId>) {
        extend_entry(&mut self.file_owners, path, owners);
    }

    fn add_file_reviewers(&mut self, path: &str, reviewers: &BTreeSet<AccountId>) {
        extend_entry(&mut self.file_reviewers, path, reviewers);
    }

    fn add_file_group_owners(&mut self, path: &str, group_owners: &BTreeSet<String>) {
        extend_entry(&mut self.file_group_owners, path, group_owners);
    }

    fn add_matcher(&mut self, matcher: &Matcher) {
        let Some(pooled) = self.matchers.get(matcher.key()) else {
            self.matchers
                .insert(matcher.key().to_owned(), matcher.clone());
            return;
        };
        match pooled.merge(matcher) {
            Ok(merged) => {
                self.matchers.insert(matcher.key().to_owned(), merged);
            }
            Err(err) => warn!("{}, keeping the first one", err),
        }
    }
}

// Empty sets are never recorded, so a key is only present when it has values.
fn extend_entry<T: Ord + Clone>(
    map: &mut BTreeMap<String, BTreeSet<T>>,
    key: &str,
    values: &BTreeSet<T>,
) {
    if values.is_empty() {
        return;
    }
    map.entry(key.to_owned())
        .or_default()
        .extend(values.iter().cloned());
}

// Members are already in `file_owners`, so expanding only drops the
// references.
fn expand_groups(owners_map: &mut OwnersMap) {
    owners_map.file_group_owners.retain(|_, group_owners| {
        group_owners.retain(|owner| !is_group(owner));
        !group_owners.is_empty()
    });
}

/// Computes who owns each modified file of a change by walking the OWNERS
/// files above it.
pub struct OwnersResolver<'a> {
    blobs: &'a dyn BlobReader,
    accounts: &'a dyn IdentityResolver,
    cache: &'a dyn PathOwnersEntriesCache,
    options: ResolveOptions,
}

impl<'a> OwnersResolver<'a> {
    pub fn new(
        blobs: &'a dyn BlobReader,
        accounts: &'a dyn IdentityResolver,
        cache: &'a dyn PathOwnersEntriesCache,
        options: ResolveOptions,
    ) -> Self {
        Self {
            blobs,
            accounts,
            cache,
            options,
        }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn resolve(&self, request: &ResolveRequest) -> Result<OwnersMap, OwnersError> {
        let Some(branch) = request.branch.as_deref() else {
            debug!(
                "Owners disabled for the target branch of {}",
                request.project
            );
            return Ok(OwnersMap::default());
        };

        let mut owners_map = OwnersMap::default();
        let root_entry = self.root_entry(request, branch)?;
        let tree = request
            .modified_paths
            .iter()
            .map(String::as_str)
            .collect::<PathTree>();

        // Depth-first walk carrying the entry of the directory being visited,
        // so every directory's OWNERS file is looked up once.
        let mut stack: Vec<(NodeId, String, Arc<PathOwnersEntry>)> =
            vec![(PathTree::root_id(), String::new(), root_entry)];
        while let Some((node_id, dir, entry)) = stack.pop() {
            for (segment, &child_id) in &tree.node(node_id).children {
                let child = tree.node(child_id);
                for path in &child.paths {
                    self.add_file(&mut owners_map, path, &entry);
                }
                if child.is_dir() {
                    let child_dir = format!("{}{}/", dir, segment);
                    let owners_path = format!("{}{}", child_dir, OWNERS_FILE);
                    let config = self.load_config(&request.project, branch, &owners_path)?;
                    let child_entry = PathOwnersEntry::child(
                        &entry,
                        &owners_path,
                        config.as_deref(),
                        self.accounts,
                    );
                    stack.push((child_id, child_dir, child_entry));
                }
            }
        }

        if self.options.expand_groups {
            expand_groups(&mut owners_map);
        }

        owners_map.label = self.options.global_label.clone().or_else(|| {
            request
                .modified_paths
                .iter()
                .next_back()
                .and_then(|path| owners_map.file_labels.get(path).cloned())
        });

        debug!(
            "Resolved owners of {} files in {} ({} matchers)",
            owners_map.file_owners.len(), request.project, owners_map.matchers.len()
        );
        Ok(owners_map)
    }

    /// Entry of the branch root: parent projects' config OWNERS, farthest
    /// first, then the project's config OWNERS, then the branch root OWNERS.
    fn root_entry(
        &self,
        request: &ResolveRequest,
        branch: &str,
    ) -> Result<Arc<PathOwnersEntry>, OwnersError> {
        let chain = request
            .parent_projects
            .iter()
            .rev()
            .map(|parent| (parent.as_str(), REFS_CONFIG))
            .chain([
                (request.project.as_str(), REFS_CONFIG),
                (request.project.as_str(), branch),
            ]);

        let mut entry = Arc::new(PathOwnersEntry::empty());
        for (project, revision) in chain {
            let config = self.load_config(project, revision, OWNERS_FILE)?;
            entry = PathOwnersEntry::child(&entry, OWNERS_FILE, config.as_deref(), self.accounts);
        }
        Ok(entry)
    }

    fn add_file(&self, owners_map: &mut OwnersMap, path: &str, entry: &PathOwnersEntry) {
        owners_map.add_file_owners(path, &entry.owners);
        owners_map.add_file_reviewers(path, &entry.reviewers);
        owners_map.add_file_group_owners(path, &entry.group_owners);
        if let Some(owners_path) = &entry.owners_path {
            owners_map.add_path_owners(owners_path, &entry.owners);
            owners_map.add_path_reviewers(owners_path, &entry.reviewers);
        }

        let label = self.options.global_label.as_ref().or(entry.label.as_ref());
        if let Some(label) = label {
            owners_map
                .file_labels
                .insert(path.to_owned(), label.clone());
        }

        // Only the first tier with a match contributes.
        for level in MATCHER_LEVELS {
            let matched = entry
                .matchers
                .values()
                .filter(|matcher| matcher.level() == level && matcher.matches(path))
                .collect::<Vec<_>>();
            if matched.is_empty() {
                continue;
            }
            for matcher in matched {
                owners_map.add_file_owners(path, &matcher.owners);
                owners_map.add_file_reviewers(path, &matcher.reviewers);
                owners_map.add_file_group_owners(path, &matcher.group_owners);
                owners_map.add_matcher(matcher);
            }
            break;
        }
    }

    fn load_config(
        &self,
        project: &str,
        revision: &str,
        owners_path: &str,
    ) -> Result<CachedConfig, OwnersError> {
        let key = CacheKey::new(project, revision, owners_path);
        let mut load = || self.read_config(project, revision, owners_path);
        let loaded = self.cache.get(&key, &mut load);
        match loaded {
            Ok(config) => Ok(config),
            Err(err) if self.options.strict => Err(err),
            Err(err) => {
                let OwnersError::InvalidOwnersFile { reason, .. } = &err;
                warn!("Ignoring {}: {}", err, reason);
                Ok(None)
            }
        }
    }

    fn read_config(
        &self,
        project: &str,
        revision: &str,
        owners_path: &str,
    ) -> Result<Option<OwnersConfig>, OwnersError> {
        let bytes = self
            .blobs
            .read(project, revision, owners_path)
            .map_err(|err| OwnersError::invalid_owners_file(project, revision, owners_path, err))?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        ConfigurationParser::new(self.accounts)
            .parse(&bytes)
            .map(Some)
            .map_err(|err| OwnersError::invalid_owners_file(project, revision, owners_path, err))
    }
}
