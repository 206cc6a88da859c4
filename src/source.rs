//! Byte-range sources
//!
//! A [`RangeSource`] answers two questions for a download task: how large is the
//! resource and does it honour byte ranges ([`RangeSource::probe`]), and what are
//! the bytes in a given range ([`RangeSource::fetch_range`]). [`HttpRangeSource`]
//! is the production implementation on top of `reqwest`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use url::Url;

use crate::config::HttpConfig;
use crate::error::{Error, FetchError, Result};

/// Stream of body bytes for one range request
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Inclusive byte range `[start, end]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a range covering `start..=end`
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes in the range
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Result of a metadata probe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Total size in bytes
    pub content_length: u64,
    /// Whether the server honours `Range` requests
    pub accepts_ranges: bool,
}

/// Response to a (possibly ranged) fetch
pub struct RangeResponse {
    /// True when the server answered with partial content (206)
    pub partial: bool,
    /// Response body
    pub body: ByteStream,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("partial", &self.partial)
            .finish_non_exhaustive()
    }
}

/// Where chunk bytes come from
///
/// Implementations must be cheap to share; a single source serves every task and
/// every chunk fetcher of the manager concurrently.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Determine the total length of `url` and whether it supports ranges
    async fn probe(&self, url: &Url) -> Result<ResourceInfo>;

    /// Fetch `range` of `url`, or the whole resource when `range` is None
    ///
    /// Non-success statuses are reported as [`FetchError::Status`].
    async fn fetch_range(&self, url: &Url, range: Option<ByteRange>) -> Result<RangeResponse>;
}

/// [`RangeSource`] backed by a `reqwest::Client`
#[derive(Clone, Debug)]
pub struct HttpRangeSource {
    client: reqwest::Client,
}

impl HttpRangeSource {
    /// Build a client from the HTTP configuration
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?))
    }

    /// Use an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Ranged `GET bytes=0-0`, used when HEAD is rejected or inconclusive
    async fn probe_with_range_get(&self, url: &Url) -> Result<ProbeHint> {
        let response = self
            .client
            .get(url.clone())
            .header(RANGE, ByteRange::new(0, 0).header_value())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers();
        let hint = match status {
            StatusCode::PARTIAL_CONTENT => ProbeHint {
                content_length: header_str(headers, CONTENT_RANGE.as_str())
                    .and_then(parse_content_range_total),
                accepts_ranges: Some(true),
            },
            // Zero-length resources cannot satisfy bytes=0-0
            StatusCode::RANGE_NOT_SATISFIABLE => ProbeHint {
                content_length: header_str(headers, CONTENT_RANGE.as_str())
                    .and_then(parse_content_range_total),
                accepts_ranges: None,
            },
            s if s.is_success() => ProbeHint {
                content_length: header_u64(headers, CONTENT_LENGTH.as_str()),
                accepts_ranges: Some(false),
            },
            s => {
                return Err(FetchError::Status {
                    status: s.as_u16(),
                    url: url.to_string(),
                }
                .into());
            }
        };
        // Dropping the response closes the connection without reading a full body
        Ok(hint)
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn probe(&self, url: &Url) -> Result<ResourceInfo> {
        let head = match self.client.head(url.clone()).send().await {
            Ok(response) if response.status().is_success() => {
                info_from_head_headers(response.headers())
            }
            Ok(response) => {
                tracing::debug!(
                    url = %url,
                    status = response.status().as_u16(),
                    "HEAD rejected, probing with ranged GET"
                );
                ProbeHint::default()
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "HEAD failed, probing with ranged GET");
                ProbeHint::default()
            }
        };

        if head.content_length == Some(0) {
            return Ok(ResourceInfo {
                content_length: 0,
                accepts_ranges: false,
            });
        }
        if let (Some(content_length), Some(accepts_ranges)) =
            (head.content_length, head.accepts_ranges)
        {
            return Ok(ResourceInfo {
                content_length,
                accepts_ranges,
            });
        }

        let fallback = self.probe_with_range_get(url).await?;
        let content_length = head
            .content_length
            .or(fallback.content_length)
            .ok_or_else(|| FetchError::MissingLength {
                url: url.to_string(),
            })?;

        Ok(ResourceInfo {
            content_length,
            accepts_ranges: fallback.accepts_ranges.unwrap_or(false),
        })
    }

    async fn fetch_range(&self, url: &Url, range: Option<ByteRange>) -> Result<RangeResponse> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into());
        }

        Ok(RangeResponse {
            partial: status == StatusCode::PARTIAL_CONTENT,
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(Error::from))
                .boxed(),
        })
    }
}

/// Partial knowledge gathered by one probe step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ProbeHint {
    pub content_length: Option<u64>,
    pub accepts_ranges: Option<bool>,
}

/// Interpret the headers of a successful HEAD response
///
/// `Accept-Ranges: bytes` confirms range support, `none` denies it and a missing
/// header leaves the question open.
pub(crate) fn info_from_head_headers(headers: &HeaderMap) -> ProbeHint {
    let accepts_ranges = header_str(headers, ACCEPT_RANGES.as_str()).map(|value| {
        value
            .split(',')
            .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
    });

    ProbeHint {
        content_length: header_u64(headers, CONTENT_LENGTH.as_str()),
        accepts_ranges,
    }
}

/// Total length from a `Content-Range` value such as `bytes 0-0/1234` or `bytes */1234`
///
/// Returns None when the total is unknown (`*`) or the value is malformed.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (_, total) = rest.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name).and_then(|v| v.trim().parse().ok())
}
