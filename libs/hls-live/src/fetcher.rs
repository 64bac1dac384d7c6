use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use url::Url;

use crate::config::{HlsConfig, RetryParameters};
use crate::errors::FetchError;
use crate::playlist::ByteRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Manifest,
    Segment,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final uri after redirects, the base for anything the body references
    pub uri: Url,
    pub data: Bytes,
}

impl FetchResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Network seam of the parser.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, uri: &Url, request_type: RequestType)
        -> Result<FetchResponse, FetchError>;

    /// Fetch the inclusive `range` of `uri`.
    async fn fetch_range(
        &self,
        uri: &Url,
        range: ByteRange,
        request_type: RequestType,
    ) -> Result<FetchResponse, FetchError>;
}

impl FetchError {
    /// Whether trying the same request again can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::ClientError(_) => true,
            FetchError::InvalidResponseStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::NotFound { .. } | FetchError::UnsupportedScheme { .. } => false,
        }
    }
}

/// [`Fetcher`] over HTTP(S) with retries.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryParameters,
}

impl HttpFetcher {
    pub fn new(config: &HlsConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.retry.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            retry: config.retry.clone(),
        })
    }

    async fn request(
        &self,
        uri: &Url,
        range: Option<ByteRange>,
        request_type: RequestType,
    ) -> Result<FetchResponse, FetchError> {
        if !matches!(uri.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme {
                uri: uri.to_string(),
            });
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send(uri, range).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    log::warn!(
                        "{:?} request for {} failed (attempt {}/{}): {}",
                        request_type,
                        uri,
                        attempt,
                        max_attempts,
                        e
                    );
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, uri: &Url, range: Option<ByteRange>) -> Result<FetchResponse, FetchError> {
        let mut request = self.client.get(uri.clone());
        if let Some(range) = range {
            request = request.header(RANGE, format!("bytes={}-{}", range.start, range.end));
        }
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                uri: uri.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::InvalidResponseStatus {
                uri: uri.to_string(),
                status,
            });
        }

        let final_uri = response.url().clone();
        let data = response.bytes().await?;
        Ok(FetchResponse {
            uri: final_uri,
            data,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        uri: &Url,
        request_type: RequestType,
    ) -> Result<FetchResponse, FetchError> {
        self.request(uri, None, request_type).await
    }

    async fn fetch_range(
        &self,
        uri: &Url,
        range: ByteRange,
        request_type: RequestType,
    ) -> Result<FetchResponse, FetchError> {
        self.request(uri, Some(range), request_type).await
    }
}
