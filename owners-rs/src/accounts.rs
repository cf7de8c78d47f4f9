use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Prefix marking an owner identity as a reference to a group rather than to
/// a single account, e.g. `group/maintainers`.
pub const GROUP_PREFIX: &str = "group/";

/// Numeric identifier of an account in the host system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AccountId {
    fn from(id: u32) -> Self {
        AccountId(id)
    }
}

/// Resolves the identities written in OWNERS files (emails, usernames, full
/// names or `group/<name>` references) to accounts. Implementations log
/// identities that can't be resolved and return an empty set for them.
pub trait IdentityResolver {
    fn find(&self, identity: &str) -> BTreeSet<AccountId>;
}

impl<T: IdentityResolver + ?Sized> IdentityResolver for &T {
    fn find(&self, identity: &str) -> BTreeSet<AccountId> {
        (**self).find(identity)
    }
}

pub fn is_group(identity: &str) -> bool {
    identity.starts_with(GROUP_PREFIX)
}

/// The display form of an owner: everything before the first `@`.
pub fn strip_owner_domain(owner: &str) -> &str {
    match owner.find('@') {
        Some(idx) => &owner[..idx],
        None => owner,
    }
}

/// An account known to an [`InMemoryAccounts`] directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub id: AccountId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Account {
    pub fn new(id: u32, username: &str) -> Self {
        Account {
            id: AccountId(id),
            username: Some(username.to_owned()),
            full_name: None,
            emails: Vec::new(),
            active: true,
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.emails.push(email.to_owned());
        self
    }

    pub fn with_full_name(mut self, full_name: &str) -> Self {
        self.full_name = Some(full_name.to_owned());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    fn is_full_match(&self, name_or_email: &str) -> bool {
        self.username.as_deref() == Some(name_or_email)
            || self
                .emails
                .iter()
                .any(|email| email.eq_ignore_ascii_case(name_or_email))
            || self
                .full_name
                .as_deref()
                .map(|name| name.trim().eq_ignore_ascii_case(name_or_email))
                .unwrap_or(false)
    }

    /// Username if present, else the first email, else the numeric id.
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .or_else(|| self.emails.first().cloned())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// A static account and group directory. Used by the CLI, where it is loaded
/// from YAML, and by tests.
///
/// ```yaml
/// accounts:
///   - id: 1
///     username: alice
///     emails: [alice@example.com]
/// groups:
///   reviewers: [alice, group/other-group]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InMemoryAccounts {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    groups: HashMap<String, Vec<String>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    pub fn add_account(&mut self, account: Account) -> &mut Self {
        self.accounts.push(account);
        self
    }

    /// Add a group. Members may be any identity, including other groups.
    pub fn add_group(&mut self, name: &str, members: &[&str]) -> &mut Self {
        self.groups.insert(
            name.to_owned(),
            members.iter().map(|m| (*m).to_owned()).collect(),
        );
        self
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.iter().find(|account| account.id == id)
    }

    fn find_user_or_email(&self, name_or_email: &str) -> BTreeSet<AccountId> {
        let matching = self
            .accounts
            .iter()
            .filter(|account| account.is_full_match(name_or_email))
            .collect::<Vec<_>>();
        if matching.is_empty() {
            warn!("User '{}' does not resolve to any account.", name_or_email);
            return BTreeSet::new();
        }

        let active = matching
            .iter()
            .filter(|account| account.active)
            .map(|account| account.id)
            .collect::<BTreeSet<_>>();
        if active.is_empty() {
            warn!(
                "User '{}' resolves to {} accounts, but none of them are active",
                name_or_email, matching.len()
            );
        }
        active
    }

    fn find_accounts_in_group(
        &self,
        group: &str,
        visited: &mut BTreeSet<String>,
    ) -> BTreeSet<AccountId> {
        if !visited.insert(group.to_owned()) {
            return BTreeSet::new();
        }
        let Some(members) = self.groups.get(group) else {
            warn!("Group {} was not found", group);
            return BTreeSet::new();
        };

        let mut ids = BTreeSet::new();
        for member in members {
            match member.strip_prefix(GROUP_PREFIX) {
                Some(subgroup) => ids.extend(self.find_accounts_in_group(subgroup, visited)),
                None => ids.extend(self.find_user_or_email(member)),
            }
        }
        ids
    }
}

impl IdentityResolver for InMemoryAccounts {
    fn find(&self, identity: &str) -> BTreeSet<AccountId> {
        match identity.strip_prefix(GROUP_PREFIX) {
            Some(group) => self.find_accounts_in_group(group, &mut BTreeSet::new()),
            None => self.find_user_or_email(identity),
        }
    }
}
