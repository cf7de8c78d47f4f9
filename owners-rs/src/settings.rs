use std::{fs, io, path::Path, sync::Arc, time::Duration};

use regex::RegexSet;
use serde::Deserialize;
use tracing::debug;

use crate::{
    blob::full_ref_name,
    cache::{InMemoryEntriesCache, NoCache, PathOwnersEntriesCache},
    label::{LabelDefinition, LabelParseError},
    resolver::ResolveOptions,
};

pub const ALL_USERS: &str = "All-Users";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("unable to read settings from {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid settings")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid disabled branch pattern")]
    DisabledBranch(#[from] regex::Error),
    #[error("invalid global label")]
    Label(#[from] LabelParseError),
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    disable_branch: Vec<String>,
    expand_groups: bool,
    label: Option<String>,
    strict: bool,
    all_users: String,
    cache: CacheSettings,
}

impl Default for SettingsFile {
    fn default() -> Self {
        SettingsFile {
            disable_branch: Vec::new(),
            expand_groups: true,
            label: None,
            strict: false,
            all_users: ALL_USERS.to_owned(),
            cache: CacheSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Seconds a cached OWNERS file stays valid, 0 keeps it until invalidated.
    pub expire_after_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            enabled: true,
            expire_after_secs: 60,
        }
    }
}

/// Engine-wide settings.
///
/// ```yaml
/// disable_branch: ["refs/heads/experimental/.*"]
/// expand_groups: true
/// label: "Code-Review,2"
/// strict: false
/// all_users: All-Users
/// cache:
///   enabled: true
///   expire_after_secs: 60
/// ```
#[derive(Debug, Clone)]
pub struct OwnersSettings {
    disabled_branches: RegexSet,
    pub expand_groups: bool,
    pub global_label: Option<LabelDefinition>,
    pub strict: bool,
    pub all_users: String,
    pub cache: CacheSettings,
}

impl Default for OwnersSettings {
    fn default() -> Self {
        OwnersSettings {
            disabled_branches: RegexSet::empty(),
            expand_groups: true,
            global_label: None,
            strict: false,
            all_users: ALL_USERS.to_owned(),
            cache: CacheSettings::default(),
        }
    }
}

impl OwnersSettings {
    pub fn from_yaml(source: &str) -> Result<Self, SettingsError> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: SettingsFile = serde_yaml::from_str(source)?;

        // Patterns must match the whole ref name.
        let disabled_branches = RegexSet::new(
            file.disable_branch
                .iter()
                .map(|pattern| format!(r"\A(?:{})\z", pattern)),
        )?;
        let global_label = file
            .label
            .as_deref()
            .map(str::parse::<LabelDefinition>)
            .transpose()?;

        Ok(OwnersSettings {
            disabled_branches,
            expand_groups: file.expand_groups,
            global_label,
            strict: file.strict,
            all_users: file.all_users,
            cache: file.cache,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&source)
    }

    pub fn is_branch_disabled(&self, branch: &str) -> bool {
        self.disabled_branches.is_match(&full_ref_name(branch))
    }

    /// The branch to resolve owners on, `None` when owners are disabled
    /// for it.
    pub fn enabled_branch(&self, branch: &str) -> Option<String> {
        if self.is_branch_disabled(branch) {
            debug!("Owners disabled for branch {}", branch);
            None
        } else {
            Some(branch.to_owned())
        }
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            expand_groups: self.expand_groups,
            strict: self.strict,
            global_label: self.global_label.clone(),
        }
    }

    pub fn build_cache(&self) -> Arc<dyn PathOwnersEntriesCache> {
        if !self.cache.enabled {
            return Arc::new(NoCache);
        }
        match self.cache.expire_after_secs {
            0 => Arc::new(InMemoryEntriesCache::new()),
            secs => Arc::new(InMemoryEntriesCache::with_expiry(Duration::from_secs(secs))),
        }
    }
}
