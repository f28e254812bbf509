//! The cacher seam between a [`crate::syncers::RepoSyncer`] and the
//! rest of the federation core: [`VersionCacher`] models "cache this
//! version's content" as mandatory and the two metadata writebacks as
//! optional capabilities (default no-ops), matching spec §4.7's "if the
//! cacher also implements X" phrasing with plain trait defaults rather
//! than a downcasting/capability-flag scheme.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use skillhub_resolver::ProxyCacheThrough;
use skillhub_store::{MetadataStore, VersionMetaPatch};
use skillhub_types::{Repository, Result, SkillHubError};

pub trait VersionCacher: Send + Sync {
    /// Must be idempotent: calling this twice for the same `(repo, slug,
    /// version)` is a no-op at the storage level on the second call
    /// (round-trip property in spec §8).
    fn sync_proxy_version(&self, repo: &Repository, slug: &str, version: &str) -> Result<()>;

    /// Optional version-metadata writeback; the default no-op models a
    /// cacher that doesn't track per-version metadata.
    fn sync_proxy_version_meta(
        &self,
        _repo: &Repository,
        _slug: &str,
        _version: &str,
        _created_at: Option<DateTime<Utc>>,
        _changelog: Option<String>,
        _changelog_source: Option<String>,
    ) -> Result<()> {
        Ok(())
    }

    /// Optional skill-metadata writeback; the default no-op models a
    /// cacher that doesn't track display name / summary / tags.
    fn sync_proxy_skill_meta(
        &self,
        _repo: &Repository,
        _slug: &str,
        _display_name: Option<String>,
        _summary: Option<String>,
        _tag_patch: BTreeMap<String, String>,
    ) -> Result<()> {
        Ok(())
    }
}

/// The production [`VersionCacher`]: content through the proxy fetcher,
/// metadata directly against the metadata store.
pub struct ProxyStoreCacher {
    proxy: Arc<dyn ProxyCacheThrough>,
    store: Arc<dyn MetadataStore>,
}

impl ProxyStoreCacher {
    pub fn new(proxy: Arc<dyn ProxyCacheThrough>, store: Arc<dyn MetadataStore>) -> Self {
        Self { proxy, store }
    }
}

impl VersionCacher for ProxyStoreCacher {
    fn sync_proxy_version(&self, repo: &Repository, slug: &str, version: &str) -> Result<()> {
        self.proxy.resolve_proxy_artifact(repo, slug, version).map(|_| ())
    }

    /// Version-meta writeback (idempotent, spec §4.7): trims inputs; if
    /// all three fields are nil/empty, returns without touching storage;
    /// otherwise applies a COALESCE-style patch and swallows `NotFound`
    /// (the version has not yet been cached locally).
    fn sync_proxy_version_meta(
        &self,
        repo: &Repository,
        slug: &str,
        version: &str,
        created_at: Option<DateTime<Utc>>,
        changelog: Option<String>,
        changelog_source: Option<String>,
    ) -> Result<()> {
        let changelog = changelog.map(|c| c.trim().to_string());
        let changelog_source = changelog_source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let changelog_is_empty = changelog.as_deref().map(str::is_empty).unwrap_or(true);

        if created_at.is_none() && changelog_is_empty && changelog_source.is_none() {
            return Ok(());
        }

        let patch = VersionMetaPatch {
            created_at,
            changelog,
            changelog_source,
        };
        match self.store.update_version_meta(repo.id, slug, version, patch) {
            Ok(()) => Ok(()),
            Err(SkillHubError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn sync_proxy_skill_meta(
        &self,
        repo: &Repository,
        slug: &str,
        display_name: Option<String>,
        summary: Option<String>,
        tag_patch: BTreeMap<String, String>,
    ) -> Result<()> {
        self.store.update_package_meta(repo.id, slug, display_name, summary, tag_patch)
    }
}
