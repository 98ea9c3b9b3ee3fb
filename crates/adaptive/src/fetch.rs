use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use reqwest::{header::RANGE, StatusCode};
use url::Url;

use crate::{
    error::{AdaptiveError, AdaptiveResult},
    util::http::HttpClient,
    ByteRange,
};

/// What a fetched resource is going to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    Playlist,
    Key,
    Init,
    Segment,
}

/// Retrieves raw bytes for a URL.
///
/// Transport, authentication and redirects are the implementor's business; the playlist code only
/// sees bytes or an error.
pub trait Fetcher: Send + Sync {
    fn fetch(
        &self,
        url: &Url,
        range: Option<&ByteRange>,
        kind: ChunkType,
    ) -> impl Future<Output = AdaptiveResult<Bytes>> + Send;
}

impl<F> Fetcher for Arc<F>
where
    F: Fetcher,
{
    fn fetch(
        &self,
        url: &Url,
        range: Option<&ByteRange>,
        kind: ChunkType,
    ) -> impl Future<Output = AdaptiveResult<Bytes>> + Send {
        self.as_ref().fetch(url, range, kind)
    }
}

#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: HttpClient,
}

impl HttpFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        range: Option<&ByteRange>,
        kind: ChunkType,
    ) -> AdaptiveResult<Bytes> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.to_http_range());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            if let Ok(body) = response.text().await {
                tracing::warn!(?kind, %url, "Error body: {body}");
            }
            return Err(AdaptiveError::HttpError(status));
        }

        let bytes = response.bytes().await?;
        tracing::debug!(?kind, %url, size = bytes.len(), "fetched");
        Ok(bytes)
    }
}

/// Serves resources from memory and records how often each URL was requested.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    resources: Arc<Mutex<HashMap<String, Bytes>>>,
    requests: Arc<Mutex<HashMap<String, usize>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<B>(&self, url: &str, body: B)
    where
        B: Into<Bytes>,
    {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), body.into());
    }

    pub fn remove(&self, url: &str) {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or_default()
    }
}

impl Fetcher for MemoryFetcher {
    async fn fetch(
        &self,
        url: &Url,
        range: Option<&ByteRange>,
        _kind: ChunkType,
    ) -> AdaptiveResult<Bytes> {
        *self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default() += 1;

        let body = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url.as_str())
            .cloned()
            .ok_or(AdaptiveError::HttpError(StatusCode::NOT_FOUND))?;

        Ok(match range {
            Some(range) => Bytes::copy_from_slice(range.slice(&body)),
            None => body,
        })
    }
}
