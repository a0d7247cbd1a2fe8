use crate::{Error, Result, config::HubConfig};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Downloads repository files from a Hugging Face compatible hub into a
/// local cache laid out as `{cache_dir}/{repo}/{revision}/{file}`.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    cache_dir: PathBuf,
}

impl HubClient {
    pub fn new(config: &HubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lora-serve/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            cache_dir: config.cache_dir.clone(),
        })
    }

    pub fn cache_path(&self, repo: &str, revision: &str, file: &str) -> PathBuf {
        self.cache_dir.join(repo).join(revision).join(file)
    }

    /// Fetches one file, returning `None` when the hub answers 404.
    pub async fn download(&self, repo: &str, revision: &str, file: &str) -> Result<Option<PathBuf>> {
        let target = self.cache_path(repo, revision, file);
        if tokio::fs::try_exists(&target).await? {
            debug!("Using cached {}", target.display());
            return Ok(Some(target));
        }

        let url = format!("{}/{}/resolve/{}/{}", self.endpoint, repo, revision, file);
        debug!("Downloading {}", url);

        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let mut response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("{} not present in {}@{}", file, repo, revision);
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(Error::hub(format!("GET {} returned {}", url, status)));
            }
            _ => {}
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = partial_path(&target);
        let written = match write_body(&mut response, &partial).await {
            Ok(written) => written,
            Err(e) => {
                warn!("Download of {} failed, removing {}", url, partial.display());
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, &target).await?;
        info!("Downloaded {} from {} ({} bytes)", file, repo, written);

        Ok(Some(target))
    }
}

/// Streams the response body into `path`, returning the byte count.
async fn write_body(response: &mut reqwest::Response, path: &Path) -> Result<u64> {
    let mut out = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
