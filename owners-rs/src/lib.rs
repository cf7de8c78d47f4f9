//! Resolution of OWNERS files: who owns each file of a change, and whether
//! those owners approved it.

pub mod accounts;
pub mod approval;
pub mod blob;
pub mod cache;
pub mod change;
pub mod entry;
pub mod error;
pub mod label;
pub mod matcher;
pub mod parser;
mod path_tree;
pub mod resolver;
pub mod settings;

#[cfg(test)]
mod testutil;

pub use accounts::{AccountId, IdentityResolver, InMemoryAccounts};
pub use approval::{evaluate, ChangeApprovals, LabelTypes, SubmitStatus};
pub use blob::{BlobReader, InMemoryBlobs};
pub use cache::{InMemoryEntriesCache, NoCache, PathOwnersEntriesCache};
pub use error::OwnersError;
pub use label::LabelDefinition;
pub use parser::{ConfigurationParser, OwnersConfig};
pub use resolver::{OwnersMap, OwnersResolver, ResolveOptions, ResolveRequest};
pub use settings::OwnersSettings;
