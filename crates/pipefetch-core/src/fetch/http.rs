//! HTTP GET fetcher backed by libcurl.
//!
//! Each fetch runs a curl Easy handle on a blocking thread. The progress
//! callback polls the cancellation token so an aborted pipeline stops the
//! transfer instead of waiting for the server.

use super::{FetchError, FetchResponse, Fetcher};
use crate::config::FetchConfig;
use crate::model::Identifier;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CurlFetcher {
    cfg: FetchConfig,
}

impl CurlFetcher {
    pub fn new(cfg: FetchConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Fetcher for CurlFetcher {
    async fn fetch(
        &self,
        identifier: &Identifier,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let url = identifier.as_str().to_string();
        let cfg = self.cfg.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || get_blocking(&url, &cfg, &cancel))
            .await
            .map_err(|e| FetchError::Other(format!("fetch task: {}", e)))?
    }
}

/// Performs one GET and buffers the body. Runs in the current thread.
fn get_blocking(
    url: &str,
    cfg: &FetchConfig,
    cancel: &CancellationToken,
) -> Result<FetchResponse, FetchError> {
    let limit = cfg.max_body_bytes;
    let mut body: Vec<u8> = Vec::new();
    let mut too_large = false;

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(cfg.follow_redirects)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(cfg.connect_timeout())?;
    easy.timeout(cfg.timeout())?;
    easy.progress(true)?;
    if let Some(ua) = &cfg.user_agent {
        easy.useragent(ua)?;
    }

    let performed = {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            if let Some(limit) = limit {
                if body.len() as u64 + data.len() as u64 > limit {
                    too_large = true;
                    return Ok(0); // abort transfer
                }
            }
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        transfer.perform()
    };

    if let Err(e) = performed {
        if too_large {
            if let Some(limit) = limit {
                return Err(FetchError::BodyTooLarge { limit });
            }
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        return Err(FetchError::Curl(e));
    }

    let status = easy.response_code()?;
    Ok(FetchResponse { status, body })
}
