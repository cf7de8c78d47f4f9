use crate::{blob::BlobError, parser::ParseError};

/// Error raised while resolving owners for a change.
#[derive(Debug, thiserror::Error)]
pub enum OwnersError {
    #[error("invalid OWNERS file {path} in project {project} on {branch}")]
    InvalidOwnersFile {
        project: String,
        branch: String,
        path: String,
        #[source]
        reason: InvalidReason,
    },
}

impl OwnersError {
    pub fn invalid_owners_file(
        project: &str,
        branch: &str,
        path: &str,
        reason: impl Into<InvalidReason>,
    ) -> Self {
        OwnersError::InvalidOwnersFile {
            project: project.to_owned(),
            branch: branch.to_owned(),
            path: path.to_owned(),
            reason: reason.into(),
        }
    }

    /// The OWNERS path the error refers to.
    pub fn path(&self) -> &str {
        match self {
            OwnersError::InvalidOwnersFile { path, .. } => path,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidReason {
    #[error("unable to read the file")]
    Read(#[from] BlobError),
    #[error("unable to parse the file")]
    Parse(#[from] ParseError),
}
