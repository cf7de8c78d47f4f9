use std::{
    collections::HashMap,
    fs, io,
    path::{Component, Path, PathBuf},
};

use owners_rs::blob::{full_ref_name, BlobError, BlobReader, REFS_CONFIG};

/// Serves OWNERS files from local directories: the checkout of the project
/// for its branches, plus optional directories standing in for the config
/// ref of the project and of its parents.
pub struct LocalTreeReader {
    project: String,
    root: PathBuf,
    config_dir: Option<PathBuf>,
    parents: HashMap<String, PathBuf>,
}

impl LocalTreeReader {
    pub fn new(project: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            project: project.to_owned(),
            root: root.into(),
            config_dir: None,
            parents: HashMap::new(),
        }
    }

    pub fn with_config_dir(mut self, config_dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(config_dir.into());
        self
    }

    pub fn with_parent(mut self, project: &str, config_dir: impl Into<PathBuf>) -> Self {
        self.parents.insert(project.to_owned(), config_dir.into());
        self
    }

    fn base_dir(&self, project: &str, revision: &str) -> Option<&Path> {
        let is_config = full_ref_name(revision) == REFS_CONFIG;
        if project == self.project {
            if is_config {
                self.config_dir.as_deref()
            } else {
                Some(&self.root)
            }
        } else if is_config {
            self.parents.get(project).map(PathBuf::as_path)
        } else {
            None
        }
    }
}

impl BlobReader for LocalTreeReader {
    fn read(
        &self,
        project: &str,
        revision: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, BlobError> {
        let Some(base) = self.base_dir(project, revision) else {
            return Ok(None);
        };
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Ok(None);
        }

        let file = base.join(relative);
        let io_error = |source| BlobError::Io {
            path: file.display().to_string(),
            source,
        };
        match fs::symlink_metadata(&file) {
            Ok(metadata) if metadata.is_file() => fs::read(&file).map(Some).map_err(io_error),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(err)),
        }
    }
}
