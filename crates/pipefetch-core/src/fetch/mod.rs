//! Fetch capability: one request per identifier, classified into an outcome.
//!
//! The pool only sees the [`Fetcher`] trait; [`CurlFetcher`] is the default
//! HTTP implementation. [`classify`] maps a raw response or error to a
//! [`FetchOutcome`](crate::model::FetchOutcome).

mod classify;
mod http;

pub use self::classify::{classify, classify_curl_error, is_success_status};
pub use self::http::CurlFetcher;

use crate::model::Identifier;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Raw answer from the transport: status code plus full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u32,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 200 with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }
}

/// Transport-level failure of a fetch (no usable response).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("curl: {0}")]
    Curl(#[from] ::curl::Error),
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: u64 },
    #[error("fetch cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Fetches one identifier. Implementations should return promptly once
/// `cancel` fires (the pool drops the future either way).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        identifier: &Identifier,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError>;
}
