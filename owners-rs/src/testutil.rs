use std::collections::BTreeSet;

use crate::{
    accounts::{Account, AccountId, InMemoryAccounts},
    blob::InMemoryBlobs,
};

/// Accounts `a` to `f` with ids 1 to 6 and `<name>@example.com` emails, the
/// group `core` (a, b) and the group `db` (c and `core`).
pub(crate) fn test_accounts() -> InMemoryAccounts {
    let mut accounts = InMemoryAccounts::new();
    for (id, name) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
        accounts.add_account(
            Account::new(id as u32 + 1, name).with_email(&format!("{}@example.com", name)),
        );
    }
    accounts
        .add_group("core", &["a", "b"])
        .add_group("db", &["c", "group/core"]);
    accounts
}

pub(crate) fn ids(ids: &[u32]) -> BTreeSet<AccountId> {
    ids.iter().copied().map(AccountId).collect()
}

/// OWNERS files of one project branch.
pub(crate) fn branch_blobs(project: &str, branch: &str, files: &[(&str, &str)]) -> InMemoryBlobs {
    let mut blobs = InMemoryBlobs::new();
    for (path, contents) in files {
        blobs.insert(project, branch, path, *contents);
    }
    blobs
}
