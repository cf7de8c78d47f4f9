use std::{collections::HashMap, io};

/// The ref holding a project's configuration, including its project-wide
/// OWNERS file.
pub const REFS_CONFIG: &str = "refs/meta/config";

pub const R_REFS: &str = "refs/";
pub const R_HEADS: &str = "refs/heads/";

/// Error raised by a [`BlobReader`] when the repository itself can't be read.
/// A missing revision or path is not an error.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("unable to open repository {project}")]
    Repository {
        project: String,
        #[source]
        source: io::Error,
    },
    #[error("i/o error reading {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Reads file contents out of a project's version-controlled tree.
///
/// `revision` is either a branch short name (`master`) or a full ref name
/// (`refs/meta/config`). Implementations return `Ok(None)` for an unknown
/// revision, a missing path, or a path that is not a regular file.
pub trait BlobReader {
    fn read(
        &self,
        project: &str,
        revision: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, BlobError>;
}

impl<T: BlobReader + ?Sized> BlobReader for &T {
    fn read(
        &self,
        project: &str,
        revision: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, BlobError> {
        (**self).read(project, revision, path)
    }
}

/// Expands a branch short name to its full ref name, leaving full names
/// untouched.
pub fn full_ref_name(revision: &str) -> String {
    if revision.starts_with(R_REFS) {
        revision.to_owned()
    } else {
        format!("{}{}", R_HEADS, revision)
    }
}

/// A [`BlobReader`] backed by a map, keyed by project, full ref name and path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobs {
    blobs: HashMap<BlobKey, Vec<u8>>,
}

type BlobKey = (String, String, String);

fn blob_key(project: &str, revision: &str, path: &str) -> BlobKey {
    (project.to_owned(), full_ref_name(revision), path.to_owned())
}

impl InMemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        project: &str,
        revision: &str,
        path: &str,
        contents: impl Into<Vec<u8>>,
    ) {
        self.blobs
            .insert(blob_key(project, revision, path), contents.into());
    }

    pub fn remove(&mut self, project: &str, revision: &str, path: &str) -> Option<Vec<u8>> {
        self.blobs.remove(&blob_key(project, revision, path))
    }
}

impl BlobReader for InMemoryBlobs {
    fn read(
        &self,
        project: &str,
        revision: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, BlobError> {
        Ok(self.blobs.get(&blob_key(project, revision, path)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_ref_name() {
        assert_eq!(full_ref_name("master"), "refs/heads/master");
        assert_eq!(full_ref_name("refs/heads/master"), "refs/heads/master");
        assert_eq!(full_ref_name(REFS_CONFIG), REFS_CONFIG);
    }

    #[test]
    fn test_in_memory_blobs() {
        let mut blobs = InMemoryBlobs::new();
        blobs.insert("p", "master", "OWNERS", "owners: [a]");

        assert_eq!(
            blobs.read("p", "refs/heads/master", "OWNERS").unwrap(),
            Some(b"owners: [a]".to_vec())
        );
        assert_eq!(blobs.read("p", "master", "dir/OWNERS").unwrap(), None);
        assert_eq!(blobs.read("p", "other", "OWNERS").unwrap(), None);
    }
}
