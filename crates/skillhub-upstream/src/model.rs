use std::collections::BTreeMap;

use serde::Deserialize;

/// `GET {base}/api/v1/skills?limit=N&cursor=C` response shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsPage {
    pub items: Vec<SkillSummary>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSummary {
    pub slug: String,
    pub display_name: String,
    pub summary: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
    pub latest_version: Option<LatestVersion>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestVersion {
    pub version: String,
    /// Milliseconds since epoch; absent when upstream doesn't track it.
    pub created_at: Option<i64>,
    pub changelog: Option<String>,
    pub changelog_source: Option<String>,
}

/// `GET {base}/api/v1/skills/{slug}/versions?limit=N&cursor=C` response
/// shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsPage {
    pub items: Vec<VersionSummary>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub version: String,
    pub created_at: Option<i64>,
    pub changelog: Option<String>,
    pub changelog_source: Option<String>,
}

/// The outcome of a `GET .../download` request, after 429-retry handling
/// has already been applied — callers see only the terminal states named
/// in the external-interfaces contract.
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    /// `200` with the body and whatever caching/naming headers were sent.
    Fresh {
        bytes: Vec<u8>,
        etag: Option<String>,
        content_disposition: Option<String>,
        content_type: Option<String>,
    },
    /// `304` — the caller's `If-None-Match` etag is still current.
    NotModified,
    /// `404` — definitive "does not exist".
    NotFound,
    /// Any other non-2xx status, carrying a body snippet truncated to 1 KiB.
    Other { status: u16, body_snippet: String },
}
