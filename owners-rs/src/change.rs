use std::collections::BTreeSet;

use serde::Deserialize;

/// Pseudo file holding the commit message of a change.
pub const COMMIT_MSG: &str = "/COMMIT_MSG";
/// Pseudo file listing the parents of a merge commit.
pub const MERGE_LIST: &str = "/MERGE_LIST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    Rewrite,
}

/// One entry of the file list of a change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModifiedFile {
    pub path: String,
    #[serde(default)]
    pub old_path: Option<String>,
    pub change_type: ChangeType,
}

impl ModifiedFile {
    pub fn new(path: &str, change_type: ChangeType) -> Self {
        ModifiedFile {
            path: path.to_owned(),
            old_path: None,
            change_type,
        }
    }

    pub fn renamed(old_path: &str, path: &str) -> Self {
        ModifiedFile {
            path: path.to_owned(),
            old_path: Some(old_path.to_owned()),
            change_type: ChangeType::Renamed,
        }
    }
}

/// Paths needing owner approval for a change: every file except the pseudo
/// files, plus the source of each rename.
pub fn modified_paths(files: &[ModifiedFile]) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    for file in files {
        if file.path == COMMIT_MSG || file.path == MERGE_LIST {
            continue;
        }
        paths.insert(file.path.clone());
        if file.change_type == ChangeType::Renamed {
            if let Some(old_path) = &file.old_path {
                paths.insert(old_path.clone());
            }
        }
    }
    paths
}
