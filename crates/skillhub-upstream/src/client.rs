use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::{Client, Response};
use reqwest::header::HeaderMap;
use skillhub_retry::{RetryHeaders, select_retry_delay};
use skillhub_types::{CancelToken, Result, SkillHubError};

use crate::model::{DownloadOutcome, SkillsPage, VersionsPage};

const USER_AGENT: &str = concat!("skillhub/", env!("CARGO_PKG_VERSION"));
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const MAX_BODY_SNIPPET: usize = 1024;

/// A client for one upstream ClawHub-style registry.
pub struct UpstreamClient {
    client: Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SkillHubError::upstream(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn list_skills(
        &self,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<SkillsPage> {
        let mut url = format!("{}/api/v1/skills?limit={limit}", self.base_url);
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={}", urlencode(cursor)));
        }
        let response = self.get_with_retry(&url, None, cancel)?;
        let response = expect_success(response)?;
        response
            .json::<SkillsPage>()
            .map_err(|e| SkillHubError::upstream(format!("decode skills page: {e}")))
    }

    pub fn list_versions(
        &self,
        slug: &str,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<VersionsPage> {
        let mut url = format!(
            "{}/api/v1/skills/{}/versions?limit={limit}",
            self.base_url,
            urlencode(slug)
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={}", urlencode(cursor)));
        }
        let response = self.get_with_retry(&url, None, cancel)?;
        let response = expect_success(response)?;
        response
            .json::<VersionsPage>()
            .map_err(|e| SkillHubError::upstream(format!("decode versions page: {e}")))
    }

    pub fn download(
        &self,
        slug: &str,
        version: &str,
        if_none_match: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<DownloadOutcome> {
        let url = format!(
            "{}/api/v1/download?slug={}&version={}",
            self.base_url,
            urlencode(slug),
            urlencode(version)
        );
        let response = match self.get_with_retry(&url, if_none_match, cancel) {
            Ok(response) => response,
            Err(e) => return Err(e),
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(DownloadOutcome::NotModified);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(DownloadOutcome::NotFound);
        }
        if status.is_success() {
            let etag = header_str(response.headers(), "etag");
            let content_disposition = header_str(response.headers(), "content-disposition");
            let content_type = header_str(response.headers(), "content-type");
            let bytes = response
                .bytes()
                .map_err(|e| SkillHubError::upstream(format!("read download body: {e}")))?
                .to_vec();
            return Ok(DownloadOutcome::Fresh {
                bytes,
                etag,
                content_disposition,
                content_type,
            });
        }

        let status_code = status.as_u16();
        let body_snippet = truncated_body(response);
        Ok(DownloadOutcome::Other {
            status: status_code,
            body_snippet,
        })
    }

    /// Issues one GET, transparently retrying on `429` per the spec's
    /// delay-selection priority, bounded by
    /// [`MAX_RATE_LIMIT_RETRIES`]. Any other status is returned as-is for
    /// the caller to interpret (200/304/404/other all carry meaning at
    /// different call sites).
    fn get_with_retry(
        &self,
        url: &str,
        if_none_match: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Response> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SkillHubError::upstream("request cancelled"));
            }

            let mut request = self.client.get(url);
            if let Some(etag) = if_none_match {
                request = request.header("If-None-Match", etag);
            }

            let response = request
                .send()
                .map_err(|e| SkillHubError::upstream(format!("GET {url}: {e}")))?;

            if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            if attempt >= MAX_RATE_LIMIT_RETRIES {
                let body_snippet = truncated_body(response);
                return Err(SkillHubError::upstream(format!(
                    "rate limited after {attempt} retries: {body_snippet}"
                )));
            }

            let headers = response.headers().clone();
            let retry_after = header_str(&headers, "retry-after");
            let rate_limit_reset = header_str(&headers, "ratelimit-reset");
            let x_rate_limit_reset = header_str(&headers, "x-ratelimit-reset");
            let retry_headers = RetryHeaders {
                retry_after: retry_after.as_deref(),
                rate_limit_reset: rate_limit_reset.as_deref(),
                x_rate_limit_reset: x_rate_limit_reset.as_deref(),
            };
            let delay = select_retry_delay(&retry_headers, Utc::now());
            tracing::warn!(attempt, ?delay, url, "upstream rate limited, backing off");
            cancel.sleep(delay);
            attempt += 1;
        }
    }
}

/// Rejects any non-2xx listing response before it reaches `.json()`,
/// matching `download()`'s `DownloadOutcome::Other` handling instead of
/// letting a 5xx/HTML error body fall through to a generic decode error.
fn expect_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_snippet = truncated_body(response);
    Err(SkillHubError::upstream(format!("upstream status {status}: {body_snippet}")))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn truncated_body(response: Response) -> String {
    match response.text() {
        Ok(text) => text.chars().take(MAX_BODY_SNIPPET).collect(),
        Err(_) => String::new(),
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
