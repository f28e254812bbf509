use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three repository kinds a [`Repository`] can be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryType {
    /// Locally authoritative; the only path to publish.
    Hosted,
    /// Cache-through mirror of a single remote registry.
    Proxy,
    /// Ordered composition of other repositories.
    Group,
}

/// A repository: the unit federated resolution walks across.
///
/// *Invariant:* `type == Proxy` implies `upstream_url` is set; `type` in
/// `{Hosted, Group}` implies it is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RepositoryType,
    pub upstream_url: Option<String>,
    pub enabled: bool,
}

impl Repository {
    /// Validates the proxy/upstream-url invariant from the data model.
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            RepositoryType::Proxy if self.upstream_url.is_none() => {
                Err("proxy repository requires upstream_url".to_string())
            }
            RepositoryType::Hosted | RepositoryType::Group if self.upstream_url.is_some() => {
                Err("hosted/group repository must not set upstream_url".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Stable, opaque identifier for a [`Repository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepoId(pub i64);

/// An edge `group -> member` with an ascending iteration priority.
///
/// *Invariant:* no cycles — enforced at resolve time by the resolver's
/// visited set, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: RepoId,
    pub member_id: RepoId,
    pub member_name: String,
    pub priority: i32,
}

/// Unique by `(repo_id, slug)`. The spec calls this a "package" or "skill"
/// interchangeably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub repo_id: RepoId,
    pub slug: String,
    pub display_name: String,
    pub summary: Option<String>,
    /// tag -> version; the tag `"latest"` is maintained by publish and
    /// proxy-fetch and is otherwise an ordinary entry.
    pub tags: BTreeMap<String, String>,
    pub downloads: u64,
    pub installs: u64,
    pub stars: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId(pub i64);

/// One file entry inside a version's archive, as emitted in the `files`
/// descriptor array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub content_type: Option<String>,
}

/// Unique by `(package_id, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub package_id: PackageId,
    pub version: String,
    /// `"sha256:" + hex`.
    pub digest: String,
    pub size_bytes: u64,
    pub changelog: String,
    pub changelog_source: Option<String>,
    pub files: Vec<FileDescriptor>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionId(pub i64);

/// One or more per [`Version`]; today every version has exactly one asset
/// (a ZIP), but the model permits more.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub version_id: VersionId,
    pub path: String,
    /// Opaque blob-store key, e.g. `sha256/ab/ab12...`.
    pub blob_path: String,
    pub size_bytes: u64,
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub i64);

/// Status of a [`ProxyCacheEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyCacheStatus {
    Cached,
    NotFound,
    Error,
}

impl ProxyCacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::NotFound => "not_found",
            Self::Error => "error",
        }
    }
}

/// Keyed by `(repo_id, package_name, version)`.
///
/// *Invariant:* `status == Cached` implies a corresponding Version+Asset
/// exists; `status in {NotFound, Error}` implies `expires_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCacheEntry {
    pub repo_id: RepoId,
    pub package_name: String,
    pub version: String,
    pub status: ProxyCacheStatus,
    pub etag: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_checked: DateTime<Utc>,
}

/// An opaque principal string; `"*"` denotes wildcard/anonymous.
pub type Subject = String;

pub const WILDCARD_SUBJECT: &str = "*";

/// Roles form a total order: `Admin ⊇ Push ⊇ Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Read,
    Push,
    Admin,
}

impl Role {
    /// `self` satisfies a requirement of `required` iff `self >= required`
    /// in role order (`Admin` satisfies everything, `Read` satisfies only
    /// `Read`).
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

/// `(repo_id, subject) -> role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMember {
    pub repo_id: RepoId,
    pub subject: Subject,
    pub role: Role,
}

/// A concrete resolved `(repo, package, version, blob_key, digest, size,
/// file_name)` — the terminal result of [`crate::error::Result`]-returning
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub repo_id: RepoId,
    pub package_slug: String,
    pub version: String,
    pub blob_key: String,
    pub digest: String,
    pub size_bytes: u64,
    pub file_name: String,
}

/// `proxy_sync` dynamic knobs, re-read every tick by the sync worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySyncConfig {
    pub enabled: bool,
    pub interval: std::time::Duration,
    pub startup_delay: std::time::Duration,
    pub page_size: u32,
    pub concurrency: u32,
}

impl ProxySyncConfig {
    /// `page_size <= 0` defaults to 100; `concurrency <= 0` defaults to 1 —
    /// matches the spec's config normalisation rule exactly.
    pub fn normalized(&self) -> Self {
        Self {
            enabled: self.enabled,
            interval: self.interval,
            startup_delay: self.startup_delay,
            page_size: if self.page_size == 0 { 100 } else { self.page_size },
            concurrency: if self.concurrency == 0 { 1 } else { self.concurrency },
        }
    }
}
