mod client;

pub use client::HubClient;

use crate::{Error, Result};
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Where a model's files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Local(PathBuf),
    Hub { repo: String, revision: String },
}

impl ModelSource {
    /// An identifier naming an existing directory is read from disk, anything
    /// else is treated as a hub repository id.
    pub fn parse(id: &str, revision: &str) -> Self {
        let path = Path::new(id);
        if path.is_dir() {
            Self::Local(path.to_path_buf())
        } else {
            Self::Hub {
                repo: id.to_string(),
                revision: revision.to_string(),
            }
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(dir) => write!(f, "{}", dir.display()),
            Self::Hub { repo, revision } => write!(f, "{}@{}", repo, revision),
        }
    }
}

/// File access for one model source.
#[derive(Debug, Clone)]
pub struct Repo {
    client: HubClient,
    source: ModelSource,
}

impl Repo {
    pub fn new(client: HubClient, source: ModelSource) -> Self {
        Self { client, source }
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub async fn get(&self, file: &str) -> Result<PathBuf> {
        self.get_optional(file)
            .await?
            .ok_or_else(|| Error::FileNotFound {
                repo: self.source.to_string(),
                file: file.to_string(),
            })
    }

    pub async fn get_optional(&self, file: &str) -> Result<Option<PathBuf>> {
        match &self.source {
            ModelSource::Local(dir) => {
                let path = dir.join(file);
                Ok(path.is_file().then_some(path))
            }
            ModelSource::Hub { repo, revision } => {
                self.client.download(repo, revision, file).await
            }
        }
    }
}
