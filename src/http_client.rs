//! HTTP client: bounded, retrying GETs against the release host.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use const_format::formatcp;
use log::{debug, warn};
use reqwest::blocking::{Client, ClientBuilder, Response};
use reqwest::redirect::Policy;
use url::Url;

use crate::error::FetchError;

static USER_AGENT: &str = formatcp!(
    "{name}/{version} ({homepage})",
    name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), homepage = env!("CARGO_PKG_REPOSITORY"),
);

const MAX_REDIRECTS: usize = 10;
const MAX_RETRIES: u32 = 4;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const METADATA_CEILING: u64 = 1024 * 1024;

pub fn client() -> Result<Client, FetchError> {
    ClientBuilder::new()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .redirect(Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            if attempt.url().scheme() != "https" {
                return attempt.error("refusing to follow a non-HTTPS redirect");
            }
            attempt.follow()
        }))
        .build()
        .map_err(|e| FetchError::Internal(format!("failed to build HTTP client: {e}")))
}

/// Fetches `url` into memory, bounded at `METADATA_CEILING` bytes.
pub fn get_bounded(client: &Client, url: &Url, bearer: Option<&str>) -> Result<Vec<u8>, FetchError> {
    let response = get_with_retry(client, url, bearer)?;
    let mut body = Vec::new();
    let mut reader = response.take(METADATA_CEILING + 1);

    reader.read_to_end(&mut body).map_err(|e| FetchError::Transport(e.to_string()))?;
    if body.len() as u64 > METADATA_CEILING {
        return Err(FetchError::TooLarge { limit: METADATA_CEILING });
    }

    Ok(body)
}

/// Streams `url` into `sink`, bounded at `ceiling` bytes, returning the
/// number of bytes written.
pub fn get_streamed(client: &Client, url: &Url, bearer: Option<&str>, sink: &mut dyn Write, ceiling: u64) -> Result<u64, FetchError> {
    let response = get_with_retry(client, url, bearer)?;
    let mut reader = response.take(ceiling + 1);
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buffer).map_err(|e| FetchError::Transport(e.to_string()))?;
        if read == 0 {
            break;
        }

        total += read as u64;
        if total > ceiling {
            return Err(FetchError::TooLarge { limit: ceiling });
        }

        sink.write_all(&buffer[..read]).map_err(|e| FetchError::Transport(e.to_string()))?;
    }

    Ok(total)
}

fn get_with_retry(client: &Client, url: &Url, bearer: Option<&str>) -> Result<Response, FetchError> {
    let mut attempt = 0u32;

    loop {
        debug!("GET {url} (attempt {})...", attempt + 1);

        let mut request = client.get(url.clone());
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let outcome = request.send();

        match outcome {
            Ok(response) if response.status().is_success() => return Ok(response),

            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                return Err(FetchError::ResolveNotFound(url.to_string()));
            },

            Ok(response) if response.status() == reqwest::StatusCode::FORBIDDEN => {
                let retry_after = rate_limit_reset(&response);
                return Err(match retry_after {
                    Some(duration) if duration <= Duration::from_secs(60) => {
                        thread::sleep(duration);
                        continue;
                    },
                    _ => FetchError::RateLimited { retry_after },
                });
            },

            Ok(response) if response.status() == reqwest::StatusCode::UNAUTHORIZED => {
                return Err(FetchError::Auth(response.status().to_string()));
            },

            Ok(response) if response.status().is_server_error() => {
                if attempt >= MAX_RETRIES {
                    return Err(FetchError::Transport(format!("server returned {}", response.status())));
                }
            },

            Ok(response) => return Err(FetchError::Transport(format!("server returned {}", response.status()))),

            Err(err) if err.is_connect() || err.is_timeout() => {
                if attempt >= MAX_RETRIES {
                    return Err(FetchError::Transport(err.to_string()));
                }
            },

            Err(err) => return Err(FetchError::Transport(err.to_string())),
        }

        let delay = BACKOFF_BASE * 2u32.pow(attempt);
        let jittered = full_jitter(delay);
        warn!("Retrying {url} in {:.1}s...", jittered.as_secs_f32());
        thread::sleep(jittered);
        attempt += 1;
    }
}

fn rate_limit_reset(response: &Response) -> Option<Duration> {
    let reset_epoch: i64 = response.headers().get("x-ratelimit-reset")?.to_str().ok()?.parse().ok()?;
    let now = chrono::Utc::now().timestamp();
    let remaining = reset_epoch - now;
    Some(Duration::from_secs(remaining.max(0) as u64))
}

fn full_jitter(delay: Duration) -> Duration {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    // A lightweight, dependency-free jitter source: we don't need
    // cryptographic randomness here, only to avoid synchronized retries.
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(delay.as_nanos());
    let sample = (hasher.finish() % 1000) as f64 / 1000.0;

    Duration::from_secs_f64(delay.as_secs_f64() * sample)
}
