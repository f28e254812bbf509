//! Wires every federation-core component into one [`SkillHubCore`] facade:
//! the blob store, the in-memory metadata store (primed from a
//! [`ReposManifest`]), the resolver, the proxy fetcher, the sync runner
//! and manual trigger, and the admission rate limiter.
//!
//! This is the library's one composition root — the same role
//! `plan::build_plan` plus `engine::run_publish`'s call sites play for the
//! teacher's CLI: everything downstream (the `skillhub-cli` binary, or any
//! future HTTP-transport crate) talks to `SkillHubCore`, never to the
//! individual component crates directly.

use std::io;
use std::path::Path;
use std::sync::Arc;

use skillhub_blobstore::{BlobStore, FileBlobStore};
use skillhub_config::{ConfigError, FileConfigProvider, SkillHubConfig};
use skillhub_proxy::{ProxyFetcher, ProxyFetcherConfig};
use skillhub_ratelimit::{Decision, RateLimiter, Scope};
use skillhub_resolver::{ProxyCacheThrough, Resolver};
use skillhub_store::{InMemoryMetadataStore, MetadataStore};
use skillhub_sync::{ProxyStoreCacher, SummarySnapshot, SyncRunner, SyncTrigger, TriggerStatus, default_registry};
use skillhub_types::{Artifact, CancelToken, RepoId, Result as CoreResult};
use thiserror::Error;

use crate::admission::{AdmissionGate, Caller};
use crate::manifest::{ManifestError, ReposManifest};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("prepare blob directory: {0}")]
    BlobDir(#[source] io::Error),
}

/// The assembled federation core: one instance per running process.
pub struct SkillHubCore {
    store: Arc<InMemoryMetadataStore>,
    blobs: Arc<dyn BlobStore>,
    resolver: Resolver,
    proxy_fetcher: Arc<ProxyFetcher>,
    sync_runner: Arc<SyncRunner>,
    sync_trigger: SyncTrigger,
    admission: AdmissionGate,
    default_page_size: u32,
}

impl SkillHubCore {
    /// Builds a core from an already-loaded [`SkillHubConfig`], an
    /// optional repository manifest, and a blob-store root directory.
    pub fn bootstrap(
        config: SkillHubConfig,
        manifest: Option<ReposManifest>,
        blob_dir: impl AsRef<Path>,
    ) -> Result<Self, BootstrapError> {
        let store = Arc::new(InMemoryMetadataStore::new());
        if let Some(manifest) = manifest {
            manifest.apply(&store);
        }

        let blobs: Arc<dyn BlobStore> =
            Arc::new(FileBlobStore::new(blob_dir.as_ref()).map_err(BootstrapError::BlobDir)?);

        let proxy_fetcher = Arc::new(ProxyFetcher::new(
            store.clone() as Arc<dyn MetadataStore>,
            blobs.clone(),
            ProxyFetcherConfig {
                timeout: config.proxy.timeout,
                negative_ttl: config.proxy.negative_ttl,
            },
        ));

        let resolver = Resolver::new(
            store.clone() as Arc<dyn MetadataStore>,
            blobs.clone(),
            Arc::clone(&proxy_fetcher) as Arc<dyn ProxyCacheThrough>,
        );

        let config_provider = Arc::new(FileConfigProvider::from_config(config.clone()));
        let cacher = Arc::new(ProxyStoreCacher::new(
            Arc::clone(&proxy_fetcher) as Arc<dyn ProxyCacheThrough>,
            store.clone() as Arc<dyn MetadataStore>,
        ));
        let registry = default_registry(
            cacher,
            config.proxy.timeout,
            config.proxy_sync.concurrency.max(1),
        );
        let sync_runner = Arc::new(SyncRunner::new(
            store.clone() as Arc<dyn MetadataStore>,
            config_provider,
            registry,
        ));
        let default_page_size = if config.proxy_sync.page_size == 0 {
            100
        } else {
            config.proxy_sync.page_size
        };
        let sync_trigger = SyncTrigger::new(Arc::clone(&sync_runner), default_page_size);

        let admission = AdmissionGate::new(RateLimiter::new(config.rate_limit.to_domain()));

        Ok(Self {
            store,
            blobs,
            resolver,
            proxy_fetcher,
            sync_runner,
            sync_trigger,
            admission,
            default_page_size,
        })
    }

    /// Convenience entry point reading config and manifest from disk. A
    /// missing manifest path is treated as "no repositories declared yet"
    /// rather than an error — a fresh install has nothing to federate.
    pub fn bootstrap_from_paths(
        config_path: Option<&Path>,
        manifest_path: Option<&Path>,
        blob_dir: impl AsRef<Path>,
    ) -> Result<Self, BootstrapError> {
        let config = match config_path {
            Some(path) => SkillHubConfig::load_from_file(path)?,
            None => SkillHubConfig::default(),
        };
        let manifest = match manifest_path {
            Some(path) if path.exists() => Some(ReposManifest::load_from_file(path)?),
            _ => None,
        };
        Self::bootstrap(config, manifest, blob_dir)
    }

    /// `downloadArtifact` (spec §4.5), resolving through whatever
    /// repository kind `repo_id` names.
    pub fn download_artifact(
        &self,
        repo_id: RepoId,
        slug: &str,
        version: Option<&str>,
        tag: Option<&str>,
        count_download: bool,
    ) -> CoreResult<Artifact> {
        self.resolver
            .download_artifact(repo_id, slug, version, tag, count_download)
    }

    /// `readSkillFile` (spec §4.5): resolves the artifact then extracts
    /// one archive member.
    pub fn read_skill_file(
        &self,
        repo_id: RepoId,
        slug: &str,
        version: Option<&str>,
        tag: Option<&str>,
        file_path: &str,
    ) -> CoreResult<Vec<u8>> {
        self.resolver
            .read_skill_file(repo_id, slug, version, tag, file_path)
    }

    /// Resolves the artifact and streams its blob to `dest`, returning
    /// the resolved [`Artifact`] alongside the bytes written.
    pub fn download_artifact_to_file(
        &self,
        repo_id: RepoId,
        slug: &str,
        version: Option<&str>,
        tag: Option<&str>,
        dest: &Path,
    ) -> CoreResult<Artifact> {
        let artifact = self.download_artifact(repo_id, slug, version, tag, true)?;
        let (mut reader, _size) = self.blobs.open(&artifact.blob_key)?;
        let mut file = std::fs::File::create(dest)
            .map_err(|e| skillhub_types::SkillHubError::storage(format!("create {}: {e}", dest.display())))?;
        io::copy(&mut reader, &mut file)
            .map_err(|e| skillhub_types::SkillHubError::storage(format!("write {}: {e}", dest.display())))?;
        Ok(artifact)
    }

    /// Starts one manual sync pass in the background (spec §4.8); `false`
    /// if one is already running.
    pub fn trigger_sync(&self) -> bool {
        self.sync_trigger.trigger()
    }

    pub fn sync_status(&self) -> TriggerStatus {
        self.sync_trigger.status()
    }

    /// Runs the sync worker's full lifecycle (spec §4.7) on the calling
    /// thread until `cancel` fires. Intended for a dedicated background
    /// thread rooted at [`CancelToken::process_root`], never on a
    /// request-handling thread.
    pub fn run_sync_worker(&self, cancel: &CancelToken) {
        self.sync_runner.run_worker(cancel);
    }

    /// Runs exactly one synchronous sync pass and returns its summary,
    /// bypassing the trigger's single-flight guard — used by the CLI's
    /// foreground `sync` subcommand, where the caller is already blocked
    /// waiting for the result.
    pub fn run_sync_once(&self, cancel: &CancelToken) -> CoreResult<SummarySnapshot> {
        self.sync_runner
            .run(self.default_page_size, cancel)
            .map(|summary| SummarySnapshot::from(&summary))
    }

    pub fn check_admission(&self, now: u64, scope: Scope, caller: &Caller<'_>) -> Decision {
        self.admission.check(now, scope, caller)
    }

    /// Registers a repository directly — mainly for embedding callers and
    /// tests that don't want to round-trip through a manifest file.
    pub fn put_repository(&self, repo: skillhub_types::Repository) {
        self.store.put_repository(repo);
    }

    pub fn put_group_membership(&self, membership: skillhub_types::GroupMembership) {
        self.store.put_group_membership(membership);
    }

    /// Streams `archive` into the blob store and records the resulting
    /// version/asset against a hosted repository. The publish endpoint
    /// itself (auth, upload negotiation) is out of scope for this crate;
    /// this is the one write path a hosted repository needs to gain
    /// content for [`Self::download_artifact`] to later resolve.
    pub fn publish_artifact(
        &self,
        repo_id: RepoId,
        slug: &str,
        created_by: &str,
        version: &str,
        archive: &mut dyn io::Read,
        tags: std::collections::BTreeMap<String, String>,
    ) -> CoreResult<Artifact> {
        let (digest, size, blob_key) = self.blobs.put_stream(archive)?;
        let (stored_version, asset) = self.store.publish_fetch_tx(
            repo_id,
            slug,
            created_by,
            skillhub_store::NewVersionInput {
                version: version.to_string(),
                digest: digest.clone(),
                size_bytes: size,
                changelog: String::new(),
                changelog_source: None,
                files: vec![],
                created_at: chrono::Utc::now(),
            },
            skillhub_store::NewAssetInput {
                path: format!("{slug}-{version}.zip"),
                blob_path: blob_key.clone(),
                size_bytes: size,
                digest,
            },
            tags,
        )?;
        Ok(Artifact {
            repo_id,
            package_slug: slug.to_string(),
            version: stored_version.version,
            blob_key: asset.blob_path,
            digest: asset.digest,
            size_bytes: asset.size_bytes,
            file_name: asset.path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillhub_types::RepositoryType;

    #[test]
    fn bootstrap_with_no_manifest_has_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let core = SkillHubCore::bootstrap(SkillHubConfig::default(), None, dir.path()).unwrap();
        let err = core
            .download_artifact(RepoId(1), "demo", Some("1.0.0"), None, false)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn published_hosted_artifact_downloads_and_writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let core =
            SkillHubCore::bootstrap(SkillHubConfig::default(), None, dir.path().join("blobs"))
                .unwrap();

        core.put_repository(skillhub_types::Repository {
            id: RepoId(1),
            name: "hosted".to_string(),
            kind: RepositoryType::Hosted,
            upstream_url: None,
            enabled: true,
        });

        let zip_bytes = {
            use std::io::Write as _;
            let mut buf = Vec::new();
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            writer
                .start_file("skill.md", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"# hi").unwrap();
            writer.finish().unwrap();
            buf
        };
        core.publish_artifact(
            RepoId(1),
            "demo",
            "test-user",
            "1.0.0",
            &mut std::io::Cursor::new(zip_bytes),
            std::collections::BTreeMap::from([("latest".to_string(), "1.0.0".to_string())]),
        )
        .unwrap();

        let dest = dir.path().join("out.zip");
        let artifact = core
            .download_artifact_to_file(RepoId(1), "demo", None, Some("latest"), &dest)
            .unwrap();
        assert_eq!(artifact.version, "1.0.0");
        assert!(dest.exists());
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), artifact.size_bytes);

        let contents = core
            .read_skill_file(RepoId(1), "demo", Some("1.0.0"), None, "skill.md")
            .unwrap();
        assert_eq!(contents, b"# hi");
    }

    #[test]
    fn admission_gate_is_reachable_from_the_facade() {
        let dir = tempfile::tempdir().unwrap();
        let core = SkillHubCore::bootstrap(SkillHubConfig::default(), None, dir.path()).unwrap();
        let caller = Caller {
            subject: None,
            client_ip: "1.2.3.4",
        };
        let decision = core.check_admission(0, Scope::Read, &caller);
        assert!(decision.allowed);
    }

    #[test]
    fn sync_trigger_and_status_are_reachable_from_the_facade() {
        let dir = tempfile::tempdir().unwrap();
        let core = SkillHubCore::bootstrap(SkillHubConfig::default(), None, dir.path()).unwrap();
        assert!(core.trigger_sync());
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let mut status = core.sync_status();
        while status.running && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
            status = core.sync_status();
        }
        assert!(!status.running);
    }
}
