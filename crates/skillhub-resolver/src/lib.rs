//! # skillhub-resolver
//!
//! Federated resolution across hosted/proxy/group repositories:
//! `download_artifact` and `read_skill_file` recursively walk group
//! membership, cache-through a proxy repository's miss via whatever
//! implements [`ProxyCacheThrough`] (supplied by `skillhub-proxy`), and
//! never visit the same group twice.
//!
//! The cycle-guarded recursive tree-walk is the same shape as a
//! topological walk over a dependency graph with a visited set — it
//! short-circuits on the first non-[`SkillHubError::NotFound`] result
//! instead of requiring every member to succeed.

use std::collections::HashSet;
use std::io::Read as _;
use std::sync::Arc;

use skillhub_blobstore::BlobStore;
use skillhub_store::MetadataStore;
use skillhub_types::{
    Artifact, Asset, RepoId, Repository, RepositoryType, Result, SkillHubError, Version,
    normalize_slug, sanitize_archive_path,
};

/// What the resolver calls on a `proxy`-kind repository leaf. Implemented
/// by `skillhub-proxy`'s `ProxyFetcher`; kept as a trait here (rather than
/// a direct crate dependency on `skillhub-proxy`) so the dependency edge
/// runs proxy -> resolver, not resolver -> proxy.
pub trait ProxyCacheThrough: Send + Sync {
    fn resolve_proxy_artifact(
        &self,
        repo: &Repository,
        slug: &str,
        version: &str,
    ) -> Result<Artifact>;
}

pub struct Resolver {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    proxy: Arc<dyn ProxyCacheThrough>,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        proxy: Arc<dyn ProxyCacheThrough>,
    ) -> Self {
        Self { store, blobs, proxy }
    }

    /// `downloadArtifact(repo, slug, version?, tag?, countDownload)`.
    ///
    /// Version selection: an explicit `version` wins outright; otherwise
    /// a non-empty `tag` is resolved first, falling back to the latest
    /// artifact if the tag is absent; otherwise the latest artifact is
    /// used directly.
    #[tracing::instrument(skip(self), fields(repo_id = ?repo_id, slug))]
    pub fn download_artifact(
        &self,
        repo_id: RepoId,
        slug: &str,
        version: Option<&str>,
        tag: Option<&str>,
        count_download: bool,
    ) -> Result<Artifact> {
        let slug = normalize_slug(slug);
        if slug.is_empty() {
            return Err(SkillHubError::invalid_input("invalid or empty slug"));
        }

        let artifact = if let Some(version) = version.filter(|v| !v.is_empty()) {
            self.resolve_in(repo_id, &slug, version, &mut HashSet::new())?
        } else if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            match self.resolve_tag(repo_id, &slug, tag, &mut HashSet::new()) {
                Ok(resolved_version) => {
                    self.resolve_in(repo_id, &slug, &resolved_version, &mut HashSet::new())?
                }
                Err(e) if e.is_not_found() => {
                    self.resolve_latest_in(repo_id, &slug, &mut HashSet::new())?
                }
                Err(e) => return Err(e),
            }
        } else {
            self.resolve_latest_in(repo_id, &slug, &mut HashSet::new())?
        };

        if count_download {
            // Best-effort: download-counter increment errors are never
            // surfaced to the caller.
            if let Err(e) = self.store.increment_download_counter(artifact.repo_id, &slug) {
                tracing::warn!(error = %e, slug, "download counter increment failed");
            }
        }

        Ok(artifact)
    }

    /// `readSkillFile(repo, slug, version?, tag?, filePath)`: resolves the
    /// artifact exactly as [`Self::download_artifact`] (without counting a
    /// download), then opens its blob and extracts one archive member.
    #[tracing::instrument(skip(self), fields(repo_id = ?repo_id, slug, file_path))]
    pub fn read_skill_file(
        &self,
        repo_id: RepoId,
        slug: &str,
        version: Option<&str>,
        tag: Option<&str>,
        file_path: &str,
    ) -> Result<Vec<u8>> {
        let artifact = self.download_artifact(repo_id, slug, version, tag, false)?;

        let sanitized = sanitize_archive_path(file_path);
        if sanitized.is_empty() {
            return Err(SkillHubError::invalid_input(format!(
                "invalid file path: {file_path}"
            )));
        }

        let (reader, _size) = self.blobs.open(&artifact.blob_key)?;
        let mut archive = zip::ZipArchive::new(reader)
            .map_err(|e| SkillHubError::storage(format!("open archive: {e}")))?;
        let mut entry = archive.by_name(&sanitized).map_err(|_| {
            SkillHubError::not_found(format!("{sanitized} not found in {}", artifact.file_name))
        })?;
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| SkillHubError::storage(format!("read archive member: {e}")))?;
        Ok(bytes)
    }

    fn resolve_in(
        &self,
        repo_id: RepoId,
        slug: &str,
        version: &str,
        visited: &mut HashSet<RepoId>,
    ) -> Result<Artifact> {
        self.walk(repo_id, visited, &|repo| match repo.kind {
            RepositoryType::Hosted => {
                let (found_version, asset) = self.store.get_artifact(repo.id, slug, version)?;
                Ok(build_artifact(repo.id, slug, found_version, asset))
            }
            RepositoryType::Proxy => self.proxy.resolve_proxy_artifact(repo, slug, version),
            RepositoryType::Group => unreachable!("walk dispatches group internally"),
        })
    }

    fn resolve_tag(
        &self,
        repo_id: RepoId,
        slug: &str,
        tag: &str,
        visited: &mut HashSet<RepoId>,
    ) -> Result<String> {
        self.walk(repo_id, visited, &|repo| match repo.kind {
            RepositoryType::Hosted | RepositoryType::Proxy => {
                self.store.resolve_version_by_tag(repo.id, slug, tag)
            }
            RepositoryType::Group => unreachable!("walk dispatches group internally"),
        })
    }

    fn resolve_latest_in(
        &self,
        repo_id: RepoId,
        slug: &str,
        visited: &mut HashSet<RepoId>,
    ) -> Result<Artifact> {
        self.walk(repo_id, visited, &|repo| match repo.kind {
            RepositoryType::Hosted | RepositoryType::Proxy => {
                let (found_version, asset) = self.store.get_latest_artifact(repo.id, slug)?;
                Ok(build_artifact(repo.id, slug, found_version, asset))
            }
            RepositoryType::Group => unreachable!("walk dispatches group internally"),
        })
    }

    /// The shared tree-walk: resolves `repo_id`, treats a disabled
    /// repository as absent, recurses into group members in priority
    /// order (first success wins, a non-`NotFound` error short-circuits),
    /// and guards against cycles with `visited`. `leaf` is invoked only
    /// for non-group repositories.
    fn walk<T>(
        &self,
        repo_id: RepoId,
        visited: &mut HashSet<RepoId>,
        leaf: &dyn Fn(&Repository) -> Result<T>,
    ) -> Result<T> {
        let repo = self.store.get_repository(repo_id)?;
        if !repo.enabled {
            return Err(SkillHubError::not_found(format!(
                "repository {repo_id:?} is disabled"
            )));
        }

        if !matches!(repo.kind, RepositoryType::Group) {
            return leaf(&repo);
        }

        if !visited.insert(repo_id) {
            return Err(SkillHubError::not_found(format!(
                "cycle detected re-entering group {repo_id:?}"
            )));
        }

        let members = self.store.list_group_members(repo_id)?;
        let mut last_not_found = None;
        for member in members {
            match self.walk(member.member_id, visited, leaf) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_not_found() => {
                    last_not_found = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_not_found.unwrap_or_else(|| {
            SkillHubError::not_found(format!("group {repo_id:?} has no members"))
        }))
    }
}

fn build_artifact(repo_id: RepoId, slug: &str, version: Version, asset: Asset) -> Artifact {
    Artifact {
        repo_id,
        package_slug: slug.to_string(),
        version: version.version,
        blob_key: asset.blob_path,
        digest: asset.digest,
        size_bytes: asset.size_bytes,
        file_name: asset.path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skillhub_blobstore::FileBlobStore;
    use skillhub_store::{InMemoryMetadataStore, NewAssetInput, NewVersionInput};
    use std::collections::BTreeMap;
    use std::io::Cursor;

    struct AlwaysNotFoundProxy;
    impl ProxyCacheThrough for AlwaysNotFoundProxy {
        fn resolve_proxy_artifact(
            &self,
            _repo: &Repository,
            slug: &str,
            _version: &str,
        ) -> Result<Artifact> {
            Err(SkillHubError::not_found(format!("no proxy artifact {slug}")))
        }
    }

    fn repo(id: i64, kind: RepositoryType, enabled: bool) -> Repository {
        Repository {
            id: RepoId(id),
            name: format!("repo-{id}"),
            kind,
            upstream_url: matches!(kind, RepositoryType::Proxy)
                .then(|| "https://upstream.example".to_string()),
            enabled,
        }
    }

    fn setup() -> (
        Arc<InMemoryMetadataStore>,
        Arc<dyn BlobStore>,
        Resolver,
        tempfile::TempDir,
    ) {
        let store = Arc::new(InMemoryMetadataStore::new());
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(dir.path()).unwrap());
        let resolver = Resolver::new(
            store.clone() as Arc<dyn MetadataStore>,
            blobs.clone(),
            Arc::new(AlwaysNotFoundProxy),
        );
        (store, blobs, resolver, dir)
    }

    fn publish_zip(
        store: &InMemoryMetadataStore,
        blobs: &Arc<dyn BlobStore>,
        repo_id: RepoId,
        slug: &str,
        version: &str,
        member_path: &str,
        member_contents: &[u8],
    ) {
        let mut zip_bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut zip_bytes));
            writer
                .start_file(member_path, zip::write::SimpleFileOptions::default())
                .unwrap();
            use std::io::Write;
            writer.write_all(member_contents).unwrap();
            writer.finish().unwrap();
        }
        let (digest, size, key) = blobs.put_stream(&mut Cursor::new(zip_bytes)).unwrap();

        store
            .publish_fetch_tx(
                repo_id,
                slug,
                "test",
                NewVersionInput {
                    version: version.to_string(),
                    digest: digest.clone(),
                    size_bytes: size,
                    changelog: String::new(),
                    changelog_source: None,
                    files: vec![],
                    created_at: Utc::now(),
                },
                NewAssetInput {
                    path: format!("{slug}-{version}.zip"),
                    blob_path: key,
                    size_bytes: size,
                    digest,
                },
                BTreeMap::from([("latest".to_string(), version.to_string())]),
            )
            .unwrap();
    }

    #[test]
    fn download_hosted_artifact_by_version() {
        let (store, blobs, resolver, _dir) = setup();
        let r = repo(1, RepositoryType::Hosted, true);
        store.put_repository(r.clone());
        publish_zip(&store, &blobs, r.id, "demo", "1.0.0", "skill.md", b"hello");

        let artifact = resolver
            .download_artifact(r.id, "demo", Some("1.0.0"), None, false)
            .unwrap();
        assert_eq!(artifact.version, "1.0.0");
    }

    #[test]
    fn download_by_tag_resolves_version() {
        let (store, blobs, resolver, _dir) = setup();
        let r = repo(1, RepositoryType::Hosted, true);
        store.put_repository(r.clone());
        publish_zip(&store, &blobs, r.id, "demo", "1.0.0", "skill.md", b"hello");

        let artifact = resolver
            .download_artifact(r.id, "demo", None, Some("latest"), false)
            .unwrap();
        assert_eq!(artifact.version, "1.0.0");
    }

    #[test]
    fn download_with_no_version_or_tag_uses_latest() {
        let (store, blobs, resolver, _dir) = setup();
        let r = repo(1, RepositoryType::Hosted, true);
        store.put_repository(r.clone());
        publish_zip(&store, &blobs, r.id, "demo", "1.0.0", "skill.md", b"v1");
        publish_zip(&store, &blobs, r.id, "demo", "2.0.0", "skill.md", b"v2");

        let artifact = resolver
            .download_artifact(r.id, "demo", None, None, false)
            .unwrap();
        assert_eq!(artifact.version, "2.0.0");
    }

    #[test]
    fn disabled_repository_is_not_found() {
        let (store, _blobs, resolver, _dir) = setup();
        let r = repo(1, RepositoryType::Hosted, false);
        store.put_repository(r.clone());

        let err = resolver
            .download_artifact(r.id, "demo", Some("1.0.0"), None, false)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn invalid_slug_is_invalid_input() {
        let (store, _blobs, resolver, _dir) = setup();
        let r = repo(1, RepositoryType::Hosted, true);
        store.put_repository(r.clone());

        let err = resolver
            .download_artifact(r.id, "a/b", Some("1.0.0"), None, false)
            .unwrap_err();
        assert!(matches!(err, SkillHubError::InvalidInput(_)));
    }

    #[test]
    fn group_probes_members_in_priority_order() {
        let (store, blobs, resolver, _dir) = setup();
        let member1 = repo(2, RepositoryType::Hosted, true);
        let member2 = repo(3, RepositoryType::Hosted, true);
        let group = repo(1, RepositoryType::Group, true);
        store.put_repository(member1.clone());
        store.put_repository(member2.clone());
        store.put_repository(group.clone());
        // Only member2 has the package.
        publish_zip(&store, &blobs, member2.id, "demo", "1.0.0", "skill.md", b"m2");

        store.put_group_membership(skillhub_types::GroupMembership {
            group_id: group.id,
            member_id: member1.id,
            member_name: "member1".to_string(),
            priority: 0,
        });
        store.put_group_membership(skillhub_types::GroupMembership {
            group_id: group.id,
            member_id: member2.id,
            member_name: "member2".to_string(),
            priority: 1,
        });

        let artifact = resolver
            .download_artifact(group.id, "demo", Some("1.0.0"), None, false)
            .unwrap();
        assert_eq!(artifact.repo_id, member2.id);
    }

    #[test]
    fn group_cycle_is_not_found_not_infinite_loop() {
        let (store, _blobs, resolver, _dir) = setup();
        let group_a = repo(1, RepositoryType::Group, true);
        let group_b = repo(2, RepositoryType::Group, true);
        store.put_repository(group_a.clone());
        store.put_repository(group_b.clone());
        store.put_group_membership(skillhub_types::GroupMembership {
            group_id: group_a.id,
            member_id: group_b.id,
            member_name: "group-b".to_string(),
            priority: 0,
        });
        store.put_group_membership(skillhub_types::GroupMembership {
            group_id: group_b.id,
            member_id: group_a.id,
            member_name: "group-a".to_string(),
            priority: 0,
        });

        let err = resolver
            .download_artifact(group_a.id, "demo", Some("1.0.0"), None, false)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn read_skill_file_extracts_archive_member() {
        let (store, blobs, resolver, _dir) = setup();
        let r = repo(1, RepositoryType::Hosted, true);
        store.put_repository(r.clone());
        publish_zip(
            &store,
            &blobs,
            r.id,
            "demo",
            "1.0.0",
            "docs/skill.md",
            b"# Demo Skill",
        );

        let bytes = resolver
            .read_skill_file(r.id, "demo", Some("1.0.0"), None, "docs/skill.md")
            .unwrap();
        assert_eq!(bytes, b"# Demo Skill");
    }

    #[test]
    fn read_skill_file_rejects_traversal_path() {
        let (store, blobs, resolver, _dir) = setup();
        let r = repo(1, RepositoryType::Hosted, true);
        store.put_repository(r.clone());
        publish_zip(&store, &blobs, r.id, "demo", "1.0.0", "skill.md", b"hi");

        let err = resolver
            .read_skill_file(r.id, "demo", Some("1.0.0"), None, "../../etc/passwd")
            .unwrap_err();
        assert!(matches!(err, SkillHubError::InvalidInput(_)));
    }
}
