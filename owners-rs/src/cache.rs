use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    blob::{full_ref_name, REFS_CONFIG},
    error::OwnersError,
    parser::OwnersConfig,
};

/// Parsed OWNERS file at one path, `None` when the file doesn't exist.
pub type CachedConfig = Option<Arc<OwnersConfig>>;

/// Loads the OWNERS file behind a cache key on a miss.
pub type Loader<'a> = dyn FnMut() -> Result<Option<OwnersConfig>, OwnersError> + 'a;

/// Refs owned by the host itself. Updates to them never touch an OWNERS file.
const GERRIT_REF_PREFIXES: [&str; 10] = [
    "refs/changes/",
    "refs/sequences/",
    "refs/users/",
    "refs/groups/",
    "refs/deleted-groups/",
    "refs/cache-automerge/",
    "refs/draft-comments/",
    "refs/starred-changes/",
    "refs/meta/external-ids",
    "refs/meta/group-names",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub project: String,
    /// Full ref name.
    pub branch: String,
    pub path: String,
}

impl CacheKey {
    pub fn new(project: &str, branch: &str, path: &str) -> Self {
        CacheKey {
            project: project.to_owned(),
            branch: full_ref_name(branch),
            path: path.to_owned(),
        }
    }

    fn index_key(&self) -> String {
        index_key(&self.project, &self.branch)
    }
}

fn index_key(project: &str, branch: &str) -> String {
    format!("{}@{}", project, full_ref_name(branch))
}

/// Memoizes parsed OWNERS files across resolutions. Implementations must be
/// transparent: resolving with any cache gives the same result as resolving
/// without one.
pub trait PathOwnersEntriesCache: Send + Sync {
    /// Return the cached config for `key`, running `loader` on a miss. Loader
    /// errors are passed through and never cached.
    fn get(&self, key: &CacheKey, loader: &mut Loader<'_>) -> Result<CachedConfig, OwnersError>;

    /// Drop every entry of the given project and branch.
    fn invalidate(&self, project: &str, branch: &str);
}

/// A disabled cache: every lookup runs the loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl PathOwnersEntriesCache for NoCache {
    fn get(&self, _key: &CacheKey, loader: &mut Loader<'_>) -> Result<CachedConfig, OwnersError> {
        Ok(loader()?.map(Arc::new))
    }

    fn invalidate(&self, _project: &str, _branch: &str) {}
}

struct CachedEntry {
    config: CachedConfig,
    written: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CachedEntry>,
    index: HashMap<String, HashSet<CacheKey>>,
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, index_key: &str) -> u64 {
        self.generations.get(index_key).copied().unwrap_or(0)
    }
}

/// An in-process [`PathOwnersEntriesCache`] with optional expiry after write.
///
/// Loaders run without holding the lock. Each project and branch carries a
/// generation counter bumped on invalidation, so a load that started before
/// an invalidation is handed back to its caller but never stored.
pub struct InMemoryEntriesCache {
    state: RwLock<CacheState>,
    expire_after: Option<Duration>,
}

impl InMemoryEntriesCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            expire_after: None,
        }
    }

    pub fn with_expiry(expire_after: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            expire_after: Some(expire_after),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("valid lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, entry: &CachedEntry) -> bool {
        self.expire_after
            .map(|expire_after| entry.written.elapsed() < expire_after)
            .unwrap_or(true)
    }
}

impl Default for InMemoryEntriesCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PathOwnersEntriesCache for InMemoryEntriesCache {
    fn get(&self, key: &CacheKey, loader: &mut Loader<'_>) -> Result<CachedConfig, OwnersError> {
        let index_key = key.index_key();
        let generation = {
            let state = self.state.read().expect("valid lock");
            if let Some(entry) = state.entries.get(key) {
                if self.is_fresh(entry) {
                    return Ok(entry.config.clone());
                }
            }
            state.generation(&index_key)
        };

        let config = loader()?.map(Arc::new);

        let mut state = self.state.write().expect("valid lock");
        if state.generation(&index_key) == generation {
            state.entries.insert(
                key.clone(),
                CachedEntry {
                    config: config.clone(),
                    written: Instant::now(),
                },
            );
            let keys = state.index.entry(index_key).or_default();
            keys.insert(key.clone());
        } else {
            debug!(
                "{} was invalidated while loading {}, not caching it",
                index_key, key.path
            );
        }
        Ok(config)
    }

    fn invalidate(&self, project: &str, branch: &str) {
        let index_key = index_key(project, branch);
        let mut state = self.state.write().expect("valid lock");
        *state.generations.entry(index_key.clone()).or_insert(0) += 1;
        let keys = state.index.remove(&index_key).unwrap_or_default();
        for key in &keys {
            state.entries.remove(key);
        }
        debug!(
            "Invalidated {} cached OWNERS files for {}",
            keys.len(), index_key
        );
    }
}

/// Notification that a ref of a project moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdatedEvent {
    pub project: String,
    pub ref_name: String,
}

impl RefUpdatedEvent {
    pub fn new(project: &str, ref_name: &str) -> Self {
        RefUpdatedEvent {
            project: project.to_owned(),
            ref_name: ref_name.to_owned(),
        }
    }
}

pub fn is_gerrit_ref(ref_name: &str) -> bool {
    GERRIT_REF_PREFIXES
        .iter()
        .any(|prefix| ref_name.starts_with(prefix))
}

/// Whether a ref update can change an OWNERS file: the users project and
/// host-internal refs are ignored, the project config ref always counts.
pub fn supported_event(all_users: &str, event: &RefUpdatedEvent) -> bool {
    event.project != all_users && (event.ref_name == REFS_CONFIG || !is_gerrit_ref(&event.ref_name))
}

/// Invalidates cached OWNERS files when the refs holding them are updated.
pub struct OwnersRefUpdateListener {
    cache: Arc<dyn PathOwnersEntriesCache>,
    all_users: String,
}

impl OwnersRefUpdateListener {
    pub fn new(cache: Arc<dyn PathOwnersEntriesCache>, all_users: &str) -> Self {
        Self {
            cache,
            all_users: all_users.to_owned(),
        }
    }

    /// Returns whether the event caused an invalidation.
    pub fn on_ref_updated(&self, event: &RefUpdatedEvent) -> bool {
        if !supported_event(&self.all_users, event) {
            return false;
        }
        self.cache.invalidate(&event.project, &event.ref_name);
        true
    }
}
