//! Release resolver: given a `RepoRef`, returns the release
//! metadata used by the rest of the pipeline.

use std::env::{self, VarError};
use std::error::Error as _;

use chrono::{DateTime, Utc};
use http::StatusCode;
use log::{debug, trace};
use octocrab::models::repos::Release as ReleaseModel;
use octocrab::{Error, OctocrabBuilder};
use tokio::runtime::Runtime;
use url::Url;

use crate::error::FetchError;
use crate::repo::{RepoRef, TagRef};

pub struct Release {
    pub tag: String,
    pub assets: Vec<Asset>,
}

pub struct Asset {
    pub name: String,
    pub url: Url,
    pub size: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

pub fn get_release(repo: &RepoRef) -> Result<Release, FetchError> {
    create_runtime()?.block_on(get_release_async(repo))
}

async fn get_release_async(repo: &RepoRef) -> Result<Release, FetchError> {
    let mut builder = OctocrabBuilder::new();
    if let Some(token) = get_token()? {
        builder = builder.user_access_token(token);
    }

    let github = builder.build().map_err(|e| FetchError::Internal(e.to_string()))?;
    let handler = github.repos(&repo.owner, &repo.repo).releases();

    debug!("Getting {} release info...", repo.full_name());

    let release = match &repo.tag {
        TagRef::Latest => handler.get_latest().await,
        TagRef::Concrete(tag) => handler.get_by_tag(tag).await,
    };

    let release = release.map_err(|err| map_github_error(repo, err))?;
    trace!("The release of {}:\n{release:#?}", repo.full_name());

    if let TagRef::Concrete(requested) = &repo.tag {
        if &release.tag_name != requested {
            return Err(FetchError::ResolveInconsistent {
                requested: requested.clone(),
                got: release.tag_name.clone(),
            });
        }
    }

    Ok(to_release(release))
}

fn to_release(release: ReleaseModel) -> Release {
    Release {
        tag: release.tag_name,
        assets: release.assets.into_iter().map(|asset| Asset {
            name: asset.name,
            url: asset.browser_download_url,
            size: Some(asset.size as u64),
            updated_at: asset.updated_at,
        }).collect(),
    }
}

fn map_github_error(repo: &RepoRef, err: Error) -> FetchError {
    match &err {
        Error::GitHub { source, .. } if source.status_code == StatusCode::NOT_FOUND => {
            FetchError::ResolveNotFound(repo.full_name())
        },
        Error::GitHub { source, .. } if source.status_code == StatusCode::FORBIDDEN => {
            FetchError::RateLimited { retry_after: None }
        },
        Error::GitHub { source, .. } if source.status_code == StatusCode::UNAUTHORIZED => {
            FetchError::Auth(humanize_error(err))
        },
        _ => FetchError::Transport(humanize_error(err)),
    }
}

fn create_runtime() -> Result<Runtime, FetchError> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
        .map_err(|e| FetchError::Internal(format!("failed to create tokio runtime: {e}")))
}

fn get_token() -> Result<Option<String>, FetchError> {
    const VAR_NAME: &str = "GITHUB_TOKEN";

    Ok(match env::var(VAR_NAME) {
        Ok(token) => {
            debug!("Using GitHub token from {VAR_NAME} environment variable.");
            Some(token)
        },
        Err(VarError::NotPresent) => None,
        Err(err) => return Err(FetchError::Usage(format!(
            "{VAR_NAME} environment variable has an invalid value: {err}"))),
    })
}

// octocrab errors are very human-unfriendly
fn humanize_error(err: Error) -> String {
    let mut message = String::new();
    let mut source = err.source();

    while let Some(inner) = source {
        if message.is_empty() {
            message = inner.to_string();
        } else {
            let inner_message = inner.to_string();
            if message.ends_with(&inner_message) {
                break;
            }
            message = format!("{message}: {inner_message}");
        }
        source = inner.source();
    }

    if message.is_empty() {
        message = err.to_string();
    }

    message
}
