//! # skillhub-store
//!
//! The metadata store: transactional persistence of repositories, group
//! membership, packages, versions, assets, and proxy-cache entries. Tokens,
//! users, and auth/system configs beyond `proxy_sync` are out of this
//! crate's scope (owned by the external collaborators named in the top
//! level spec) — this crate only models the tuples the resolver, proxy
//! fetcher, and sync runner actually read and write.
//!
//! [`MetadataStore`] is a dyn-safe trait in the shape of the teacher's
//! `StateStore` trait: whole-operation methods rather than a generic
//! begin/commit ceremony. Every write method here *is* one transaction —
//! for the reference [`InMemoryMetadataStore`], that transaction is simply
//! "hold the single mutex for the duration of the call" which is exactly
//! what the spec's single-primary-database assumption reduces to.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use skillhub_types::{
    Asset, AssetId, FileDescriptor, GroupMembership, Package, PackageId, ProxyCacheEntry,
    ProxyCacheStatus, RepoId, Repository, Result, SkillHubError, Version, VersionId,
};

/// Input to [`MetadataStore::publish_fetch_tx`]: the version half.
#[derive(Debug, Clone)]
pub struct NewVersionInput {
    pub version: String,
    pub digest: String,
    pub size_bytes: u64,
    pub changelog: String,
    pub changelog_source: Option<String>,
    pub files: Vec<FileDescriptor>,
    pub created_at: DateTime<Utc>,
}

/// Input to [`MetadataStore::publish_fetch_tx`]: the asset half.
#[derive(Debug, Clone)]
pub struct NewAssetInput {
    pub path: String,
    pub blob_path: String,
    pub size_bytes: u64,
    pub digest: String,
}

/// A COALESCE-style patch: `None` leaves the existing value untouched,
/// `Some(_)` (including `Some(String::new())`) overwrites it.
#[derive(Debug, Clone, Default)]
pub struct VersionMetaPatch {
    pub created_at: Option<DateTime<Utc>>,
    pub changelog: Option<String>,
    pub changelog_source: Option<String>,
}

impl VersionMetaPatch {
    pub fn is_empty(&self) -> bool {
        self.created_at.is_none() && self.changelog.is_none() && self.changelog_source.is_none()
    }
}

/// The metadata store's contract.
pub trait MetadataStore: Send + Sync {
    fn get_repository(&self, repo_id: RepoId) -> Result<Repository>;
    fn list_proxy_repositories(&self) -> Result<Vec<Repository>>;
    fn list_group_members(&self, group_id: RepoId) -> Result<Vec<GroupMembership>>;

    fn get_artifact(&self, repo_id: RepoId, slug: &str, version: &str) -> Result<(Version, Asset)>;
    fn get_latest_artifact(&self, repo_id: RepoId, slug: &str) -> Result<(Version, Asset)>;
    fn resolve_version_by_tag(&self, repo_id: RepoId, slug: &str, tag: &str) -> Result<String>;
    fn resolve_version_by_hash(
        &self,
        repo_id: RepoId,
        slug: &str,
        digest: &str,
    ) -> Result<Version>;

    fn get_proxy_cache(
        &self,
        repo_id: RepoId,
        package_name: &str,
        version: &str,
    ) -> Result<Option<ProxyCacheEntry>>;
    fn upsert_proxy_cache(&self, entry: ProxyCacheEntry) -> Result<()>;

    /// Best-effort download-counter increment on the originating repo;
    /// callers never treat failure here as fatal.
    fn increment_download_counter(&self, repo_id: RepoId, slug: &str) -> Result<()>;

    /// Ensures the package, inserts the version (`Conflict` on a duplicate
    /// `(package_id, version)`), inserts the asset, and applies a tag-patch
    /// union to the package metadata — all as one critical section. This is
    /// the transaction the proxy fetcher opens on a `200` response.
    fn publish_fetch_tx(
        &self,
        repo_id: RepoId,
        slug: &str,
        created_by: &str,
        version: NewVersionInput,
        asset: NewAssetInput,
        tag_patch: BTreeMap<String, String>,
    ) -> Result<(Version, Asset)>;

    /// Applies a tag-patch union (and optional display-name/summary
    /// update) to an existing package's metadata. Used by the sync
    /// runner's `syncProxySkillMeta`.
    fn update_package_meta(
        &self,
        repo_id: RepoId,
        slug: &str,
        display_name: Option<String>,
        summary: Option<String>,
        tag_patch: BTreeMap<String, String>,
    ) -> Result<()>;

    /// COALESCE-style merge of version metadata. Returns `NotFound` if the
    /// version has not been cached locally yet — callers swallow that per
    /// the version-meta-writeback idempotence rule.
    fn update_version_meta(
        &self,
        repo_id: RepoId,
        slug: &str,
        version: &str,
        patch: VersionMetaPatch,
    ) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    repositories: HashMap<RepoId, Repository>,
    group_members: HashMap<RepoId, Vec<GroupMembership>>,
    packages: HashMap<(RepoId, String), Package>,
    versions: HashMap<PackageId, Vec<Version>>,
    assets: HashMap<VersionId, Asset>,
    proxy_cache: HashMap<(RepoId, String, String), ProxyCacheEntry>,
    next_package_id: i64,
    next_version_id: i64,
    next_asset_id: i64,
}

/// The reference [`MetadataStore`] implementation: every table behind one
/// mutex. Matches the spec's "the system assumes a single primary
/// database" non-goal — one lock *is* that single primary database here.
pub struct InMemoryMetadataStore {
    tables: Mutex<Tables>,
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Test/bootstrap helper: registers a repository directly.
    pub fn put_repository(&self, repo: Repository) {
        let mut tables = self.tables.lock().expect("metadata store mutex poisoned");
        tables.repositories.insert(repo.id, repo);
    }

    /// Test/bootstrap helper: registers a group membership edge.
    pub fn put_group_membership(&self, membership: GroupMembership) {
        let mut tables = self.tables.lock().expect("metadata store mutex poisoned");
        tables
            .group_members
            .entry(membership.group_id)
            .or_default()
            .push(membership);
    }

    fn find_package<'t>(
        tables: &'t Tables,
        repo_id: RepoId,
        slug: &str,
    ) -> Result<&'t Package> {
        tables
            .packages
            .get(&(repo_id, slug.to_string()))
            .filter(|p| p.deleted_at.is_none())
            .ok_or_else(|| SkillHubError::not_found(format!("package {slug} in repo {repo_id:?}")))
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get_repository(&self, repo_id: RepoId) -> Result<Repository> {
        let tables = self.tables.lock().expect("metadata store mutex poisoned");
        tables
            .repositories
            .get(&repo_id)
            .cloned()
            .ok_or_else(|| SkillHubError::not_found(format!("repository {repo_id:?}")))
    }

    fn list_proxy_repositories(&self) -> Result<Vec<Repository>> {
        let tables = self.tables.lock().expect("metadata store mutex poisoned");
        Ok(tables
            .repositories
            .values()
            .filter(|r| matches!(r.kind, skillhub_types::RepositoryType::Proxy) && r.enabled)
            .cloned()
            .collect())
    }

    fn list_group_members(&self, group_id: RepoId) -> Result<Vec<GroupMembership>> {
        let tables = self.tables.lock().expect("metadata store mutex poisoned");
        let mut members = tables.group_members.get(&group_id).cloned().unwrap_or_default();
        // Ascending priority, ties by member name ascending — deterministic
        // per the spec's ordering guarantee.
        members.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.member_name.cmp(&b.member_name)));
        Ok(members)
    }

    fn get_artifact(&self, repo_id: RepoId, slug: &str, version: &str) -> Result<(Version, Asset)> {
        let tables = self.tables.lock().expect("metadata store mutex poisoned");
        let package = Self::find_package(&tables, repo_id, slug)?;
        let versions = tables.versions.get(&package.id);
        let found = versions
            .and_then(|vs| vs.iter().find(|v| v.version == version))
            .ok_or_else(|| SkillHubError::not_found(format!("version {version} of {slug}")))?;
        let asset = tables
            .assets
            .get(&found.id)
            .cloned()
            .ok_or_else(|| SkillHubError::not_found(format!("asset for version {version}")))?;
        Ok((found.clone(), asset))
    }

    fn get_latest_artifact(&self, repo_id: RepoId, slug: &str) -> Result<(Version, Asset)> {
        let tables = self.tables.lock().expect("metadata store mutex poisoned");
        let package = Self::find_package(&tables, repo_id, slug)?;
        let versions = tables
            .versions
            .get(&package.id)
            .filter(|vs| !vs.is_empty())
            .ok_or_else(|| SkillHubError::not_found(format!("no versions for {slug}")))?;

        // Greatest created_at; ties broken by asset created_at ascending.
        let mut candidates: Vec<&Version> = versions.iter().collect();
        candidates.sort_by(|a, b| {
            let asset_a = tables.assets.get(&a.id).map(|x| x.created_at);
            let asset_b = tables.assets.get(&b.id).map(|x| x.created_at);
            a.created_at
                .cmp(&b.created_at)
                .then(asset_a.cmp(&asset_b))
        });
        let latest = candidates.last().expect("non-empty checked above");
        let asset = tables
            .assets
            .get(&latest.id)
            .cloned()
            .ok_or_else(|| SkillHubError::not_found(format!("asset for latest of {slug}")))?;
        Ok(((*latest).clone(), asset))
    }

    fn resolve_version_by_tag(&self, repo_id: RepoId, slug: &str, tag: &str) -> Result<String> {
        let tables = self.tables.lock().expect("metadata store mutex poisoned");
        let package = Self::find_package(&tables, repo_id, slug)?;
        package
            .tags
            .get(tag)
            .cloned()
            .ok_or_else(|| SkillHubError::not_found(format!("tag {tag} on {slug}")))
    }

    fn resolve_version_by_hash(
        &self,
        repo_id: RepoId,
        slug: &str,
        digest: &str,
    ) -> Result<Version> {
        let tables = self.tables.lock().expect("metadata store mutex poisoned");
        let package = Self::find_package(&tables, repo_id, slug)?;
        tables
            .versions
            .get(&package.id)
            .and_then(|vs| vs.iter().find(|v| v.digest == digest))
            .cloned()
            .ok_or_else(|| SkillHubError::not_found(format!("version with digest {digest}")))
    }

    fn get_proxy_cache(
        &self,
        repo_id: RepoId,
        package_name: &str,
        version: &str,
    ) -> Result<Option<ProxyCacheEntry>> {
        let tables = self.tables.lock().expect("metadata store mutex poisoned");
        Ok(tables
            .proxy_cache
            .get(&(repo_id, package_name.to_string(), version.to_string()))
            .cloned())
    }

    fn upsert_proxy_cache(&self, entry: ProxyCacheEntry) -> Result<()> {
        let mut tables = self.tables.lock().expect("metadata store mutex poisoned");
        tables.proxy_cache.insert(
            (entry.repo_id, entry.package_name.clone(), entry.version.clone()),
            entry,
        );
        Ok(())
    }

    fn increment_download_counter(&self, repo_id: RepoId, slug: &str) -> Result<()> {
        let mut tables = self.tables.lock().expect("metadata store mutex poisoned");
        if let Some(package) = tables.packages.get_mut(&(repo_id, slug.to_string())) {
            package.downloads += 1;
        }
        Ok(())
    }

    fn publish_fetch_tx(
        &self,
        repo_id: RepoId,
        slug: &str,
        created_by: &str,
        version_input: NewVersionInput,
        asset_input: NewAssetInput,
        tag_patch: BTreeMap<String, String>,
    ) -> Result<(Version, Asset)> {
        let mut tables = self.tables.lock().expect("metadata store mutex poisoned");
        let now = Utc::now();

        let package_key = (repo_id, slug.to_string());
        if !tables.packages.contains_key(&package_key) {
            tables.next_package_id += 1;
            let id = PackageId(tables.next_package_id);
            tables.packages.insert(
                package_key.clone(),
                Package {
                    id,
                    repo_id,
                    slug: slug.to_string(),
                    display_name: slug.to_string(),
                    summary: None,
                    tags: BTreeMap::new(),
                    downloads: 0,
                    installs: 0,
                    stars: 0,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                    created_by: created_by.to_string(),
                },
            );
        }
        let package_id = tables.packages.get(&package_key).expect("just inserted").id;

        let dup = tables
            .versions
            .get(&package_id)
            .map(|vs| vs.iter().any(|v| v.version == version_input.version))
            .unwrap_or(false);
        if dup {
            return Err(SkillHubError::conflict(format!(
                "version {} already exists for {slug}",
                version_input.version
            )));
        }

        tables.next_version_id += 1;
        let version_id = VersionId(tables.next_version_id);
        let new_version = Version {
            id: version_id,
            package_id,
            version: version_input.version,
            digest: version_input.digest,
            size_bytes: version_input.size_bytes,
            changelog: version_input.changelog,
            changelog_source: version_input.changelog_source,
            files: version_input.files,
            created_at: version_input.created_at,
        };
        tables
            .versions
            .entry(package_id)
            .or_default()
            .push(new_version.clone());

        tables.next_asset_id += 1;
        let asset_id = AssetId(tables.next_asset_id);
        let new_asset = Asset {
            id: asset_id,
            version_id,
            path: asset_input.path,
            blob_path: asset_input.blob_path,
            size_bytes: asset_input.size_bytes,
            digest: asset_input.digest,
            created_at: now,
        };
        tables.assets.insert(version_id, new_asset.clone());

        if let Some(package) = tables.packages.get_mut(&package_key) {
            for (tag, value) in tag_patch {
                package.tags.insert(tag, value);
            }
            package.updated_at = now;
        }

        Ok((new_version, new_asset))
    }

    fn update_package_meta(
        &self,
        repo_id: RepoId,
        slug: &str,
        display_name: Option<String>,
        summary: Option<String>,
        tag_patch: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().expect("metadata store mutex poisoned");
        let key = (repo_id, slug.to_string());
        let package = tables
            .packages
            .get_mut(&key)
            .ok_or_else(|| SkillHubError::not_found(format!("package {slug}")))?;
        if let Some(name) = display_name {
            package.display_name = name;
        }
        if let Some(summary) = summary {
            package.summary = Some(summary);
        }
        for (tag, value) in tag_patch {
            package.tags.insert(tag, value);
        }
        package.updated_at = Utc::now();
        Ok(())
    }

    fn update_version_meta(
        &self,
        repo_id: RepoId,
        slug: &str,
        version: &str,
        patch: VersionMetaPatch,
    ) -> Result<()> {
        let mut tables = self.tables.lock().expect("metadata store mutex poisoned");
        let package_id = {
            let package = Self::find_package(&tables, repo_id, slug)?;
            package.id
        };
        let versions = tables
            .versions
            .get_mut(&package_id)
            .ok_or_else(|| SkillHubError::not_found(format!("version {version} of {slug}")))?;
        let found = versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| SkillHubError::not_found(format!("version {version} of {slug}")))?;

        if let Some(created_at) = patch.created_at {
            found.created_at = created_at;
        }
        if let Some(changelog) = patch.changelog {
            found.changelog = changelog;
        }
        if let Some(changelog_source) = patch.changelog_source {
            found.changelog_source = Some(changelog_source);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillhub_types::RepositoryType;

    fn repo(id: i64, kind: RepositoryType) -> Repository {
        Repository {
            id: RepoId(id),
            name: format!("repo-{id}"),
            kind,
            upstream_url: if matches!(kind, RepositoryType::Proxy) {
                Some("https://upstream.example".to_string())
            } else {
                None
            },
            enabled: true,
        }
    }

    fn version_input(version: &str) -> NewVersionInput {
        NewVersionInput {
            version: version.to_string(),
            digest: "sha256:abc".to_string(),
            size_bytes: 10,
            changelog: String::new(),
            changelog_source: None,
            files: vec![],
            created_at: Utc::now(),
        }
    }

    fn asset_input() -> NewAssetInput {
        NewAssetInput {
            path: "pkg.zip".to_string(),
            blob_path: "sha256/ab/abc".to_string(),
            size_bytes: 10,
            digest: "sha256:abc".to_string(),
        }
    }

    #[test]
    fn publish_then_get_artifact_round_trips() {
        let store = InMemoryMetadataStore::new();
        let r = repo(1, RepositoryType::Hosted);
        store.put_repository(r.clone());

        store
            .publish_fetch_tx(
                r.id,
                "demo",
                "proxy:repo-1",
                version_input("1.0.0"),
                asset_input(),
                BTreeMap::from([("latest".to_string(), "1.0.0".to_string())]),
            )
            .unwrap();

        let (version, asset) = store.get_artifact(r.id, "demo", "1.0.0").unwrap();
        assert_eq!(version.version, "1.0.0");
        assert_eq!(asset.blob_path, "sha256/ab/abc");

        let tagged = store.resolve_version_by_tag(r.id, "demo", "latest").unwrap();
        assert_eq!(tagged, "1.0.0");
    }

    #[test]
    fn duplicate_version_insert_is_conflict() {
        let store = InMemoryMetadataStore::new();
        let r = repo(1, RepositoryType::Hosted);
        store.put_repository(r.clone());

        store
            .publish_fetch_tx(
                r.id,
                "demo",
                "proxy:repo-1",
                version_input("1.0.0"),
                asset_input(),
                BTreeMap::new(),
            )
            .unwrap();

        let err = store
            .publish_fetch_tx(
                r.id,
                "demo",
                "proxy:repo-1",
                version_input("1.0.0"),
                asset_input(),
                BTreeMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SkillHubError::Conflict(_)));
    }

    #[test]
    fn latest_artifact_picks_greatest_created_at() {
        let store = InMemoryMetadataStore::new();
        let r = repo(1, RepositoryType::Hosted);
        store.put_repository(r.clone());

        let mut older = version_input("1.0.0");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        store
            .publish_fetch_tx(r.id, "demo", "x", older, asset_input(), BTreeMap::new())
            .unwrap();

        let newer = version_input("2.0.0");
        store
            .publish_fetch_tx(r.id, "demo", "x", newer, asset_input(), BTreeMap::new())
            .unwrap();

        let (latest, _) = store.get_latest_artifact(r.id, "demo").unwrap();
        assert_eq!(latest.version, "2.0.0");
    }

    #[test]
    fn update_version_meta_is_coalesce_style() {
        let store = InMemoryMetadataStore::new();
        let r = repo(1, RepositoryType::Hosted);
        store.put_repository(r.clone());
        store
            .publish_fetch_tx(r.id, "demo", "x", version_input("1.0.0"), asset_input(), BTreeMap::new())
            .unwrap();

        store
            .update_version_meta(
                r.id,
                "demo",
                "1.0.0",
                VersionMetaPatch {
                    created_at: None,
                    changelog: Some("fixed bugs".to_string()),
                    changelog_source: None,
                },
            )
            .unwrap();

        let (version, _) = store.get_artifact(r.id, "demo", "1.0.0").unwrap();
        assert_eq!(version.changelog, "fixed bugs");
        assert_eq!(version.digest, "sha256:abc"); // untouched field survives
    }

    #[test]
    fn update_version_meta_on_missing_version_is_not_found() {
        let store = InMemoryMetadataStore::new();
        let r = repo(1, RepositoryType::Hosted);
        store.put_repository(r.clone());

        let err = store
            .update_version_meta(r.id, "missing", "9.9.9", VersionMetaPatch::default())
            .unwrap_err();
        assert!(matches!(err, SkillHubError::NotFound(_)));
    }

    #[test]
    fn group_members_ordered_by_priority_then_name() {
        let store = InMemoryMetadataStore::new();
        let group = RepoId(1);
        store.put_group_membership(GroupMembership {
            group_id: group,
            member_id: RepoId(3),
            member_name: "zzz".to_string(),
            priority: 1,
        });
        store.put_group_membership(GroupMembership {
            group_id: group,
            member_id: RepoId(2),
            member_name: "aaa".to_string(),
            priority: 1,
        });
        store.put_group_membership(GroupMembership {
            group_id: group,
            member_id: RepoId(4),
            member_name: "bbb".to_string(),
            priority: 0,
        });

        let members = store.list_group_members(group).unwrap();
        let names: Vec<&str> = members.iter().map(|m| m.member_name.as_str()).collect();
        assert_eq!(names, vec!["bbb", "aaa", "zzz"]);
    }
}
