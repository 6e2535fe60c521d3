use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    config::{Param, ResolverConfig},
    constants::CONNECT_TIMEOUT,
    job::{is_video_name, JobError, RemoteFile},
};

/// Turns a share link into the downloadable files it holds.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Every video of the share, in listing order. A share without videos
    /// yields its first entry so that validation can reject it.
    async fn resolve(&self, link: &str) -> Result<Vec<RemoteFile>, JobError>;
}

#[derive(Deserialize, Debug)]
struct ResolveResponse {
    #[serde(default)]
    links: Vec<ResolvedEntry>,
}

#[derive(Deserialize, Debug)]
struct ResolvedEntry {
    name: Option<String>,
    size_mb: Option<f64>,
    original_url: Option<String>,
    direct_url: Option<String>,
}

impl ResolvedEntry {
    fn is_video(&self) -> bool {
        self.name.as_deref().is_some_and(is_video_name)
    }

    fn into_remote(self) -> Option<RemoteFile> {
        let url = self
            .original_url
            .filter(|u| !u.is_empty())
            .or(self.direct_url.filter(|u| !u.is_empty()))?;
        let size = match self.size_mb {
            Some(mb) if mb.is_finite() && mb > 0.0 => (mb * 1024.0 * 1024.0) as u64,
            _ => 0,
        };
        Some(RemoteFile {
            url,
            filename: self.name.as_deref().unwrap_or("unknown").into(),
            size,
        })
    }
}

#[derive(Clone)]
pub struct ResolverClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ResolverClient {
    pub fn new<C: Param<ResolverConfig>>(cfg: &C) -> anyhow::Result<Self> {
        let resolver_config = cfg.param();
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(resolver_config.timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: resolver_config.endpoint,
        })
    }

    async fn fetch(&self, link: &str) -> Result<ResolveResponse, reqwest::Error> {
        self.http
            .get(&self.endpoint)
            .query(&[("url", link)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl Resolve for ResolverClient {
    async fn resolve(&self, link: &str) -> Result<Vec<RemoteFile>, JobError> {
        tracing::info!(link, "Requesting links");
        let response = self.fetch(link).await.map_err(|e| {
            tracing::error!(link, "Resolver request failed: {e}");
            JobError::Resolution(e.without_url().to_string())
        })?;
        pick_files(response)
    }
}

fn pick_files(response: ResolveResponse) -> Result<Vec<RemoteFile>, JobError> {
    let mut entries = response.links;
    let has_video = entries.iter().any(ResolvedEntry::is_video);
    if !has_video {
        entries.truncate(1);
    }
    if entries.is_empty() {
        return Err(JobError::Resolution("no files in share".to_string()));
    }
    let files: Vec<RemoteFile> = entries
        .into_iter()
        .filter(|entry| !has_video || entry.is_video())
        .filter_map(|entry| {
            let name = entry.name.clone();
            let file = entry.into_remote();
            if file.is_none() {
                tracing::warn!(file = ?name, "Resolver returned no download url");
            }
            file
        })
        .collect();
    if files.is_empty() {
        return Err(JobError::Resolution(
            "resolver returned no download url".to_string(),
        ));
    }
    Ok(files)
}
