//! # skillhub-proxy
//!
//! The proxy cache-through fetcher (spec §4.6): given `(proxyRepo, slug,
//! version)`, checks for a local hit, consults the negative cache, then
//! coalesces concurrent fetches of the same key through
//! `skillhub-singleflight` before issuing one upstream request and
//! materialising the result through a transactional metadata write plus a
//! blob-store publish.
//!
//! Implements [`skillhub_resolver::ProxyCacheThrough`] so the resolver can
//! treat a proxy repository leaf exactly like any other, without
//! depending on this crate directly.

mod descriptor;

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use skillhub_blobstore::BlobStore;
use skillhub_resolver::ProxyCacheThrough;
use skillhub_singleflight::Group;
use skillhub_store::{MetadataStore, NewAssetInput, NewVersionInput};
use skillhub_types::{
    Artifact, CancelToken, ProxyCacheEntry, ProxyCacheStatus, RepoId, Repository, Result,
    SkillHubError,
};
use skillhub_upstream::{DownloadOutcome, UpstreamClient};

pub use descriptor::{extract_file_descriptors, guess_content_type};

/// `(repo_id, slug, version)` — the key the single-flight group
/// coalesces on, matching spec §4.4's `"{repoId}:{slug}:{version}"`.
fn flight_key(repo_id: RepoId, slug: &str, version: &str) -> String {
    format!("{}:{slug}:{version}", repo_id.0)
}

const ERROR_CACHE_TTL: Duration = Duration::from_secs(60);

pub struct ProxyFetcherConfig {
    pub timeout: Duration,
    pub negative_ttl: Duration,
}

impl Default for ProxyFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            negative_ttl: Duration::from_secs(300),
        }
    }
}

pub struct ProxyFetcher {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    config: ProxyFetcherConfig,
    flights: Group<String, Artifact, SkillHubError>,
    clients: Mutex<HashMap<RepoId, Arc<UpstreamClient>>>,
}

impl ProxyFetcher {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        config: ProxyFetcherConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            config,
            flights: Group::new(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, repo: &Repository) -> Result<Arc<UpstreamClient>> {
        let mut clients = self.clients.lock().expect("upstream client cache poisoned");
        if let Some(client) = clients.get(&repo.id) {
            return Ok(Arc::clone(client));
        }
        let base_url = repo
            .upstream_url
            .as_deref()
            .ok_or_else(|| SkillHubError::invalid_input(format!("repo {:?} has no upstream_url", repo.id)))?;
        let client = Arc::new(UpstreamClient::new(base_url, self.config.timeout)?);
        clients.insert(repo.id, Arc::clone(&client));
        Ok(client)
    }

    fn local_hit(&self, repo_id: RepoId, slug: &str, version: &str) -> Result<Option<Artifact>> {
        match self.store.get_artifact(repo_id, slug, version) {
            Ok((found_version, asset)) => Ok(Some(Artifact {
                repo_id,
                package_slug: slug.to_string(),
                version: found_version.version,
                blob_key: asset.blob_path,
                digest: asset.digest,
                size_bytes: asset.size_bytes,
                file_name: asset.path,
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// One upstream fetch attempt, run inside the single-flight body.
    /// Re-checks the local hit first (a coalesced winner may already have
    /// materialised the artifact before this thread acquired the lock).
    fn fetch_from_upstream(&self, repo: &Repository, slug: &str, version: &str) -> Result<Artifact> {
        if let Some(artifact) = self.local_hit(repo.id, slug, version)? {
            return Ok(artifact);
        }

        let prior_cache = self.store.get_proxy_cache(repo.id, slug, version)?;
        let prior_etag = prior_cache.as_ref().and_then(|e| e.etag.clone());

        let client = self.client_for(repo)?;
        let cancel = CancelToken::process_root();
        let outcome = client.download(slug, version, prior_etag.as_deref(), &cancel);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.write_error_cache(repo.id, slug, version, &e.to_string())?;
                return Err(e);
            }
        };

        match outcome {
            DownloadOutcome::Fresh {
                bytes,
                etag,
                content_disposition,
                content_type: _,
            } => self.materialize(repo, slug, version, bytes, etag, content_disposition.as_deref()),
            DownloadOutcome::NotModified => {
                if let Some(artifact) = self.local_hit(repo.id, slug, version)? {
                    Ok(artifact)
                } else {
                    Err(SkillHubError::not_found(format!(
                        "{slug}@{version} returned 304 with no local copy"
                    )))
                }
            }
            DownloadOutcome::NotFound => {
                self.store.upsert_proxy_cache(ProxyCacheEntry {
                    repo_id: repo.id,
                    package_name: slug.to_string(),
                    version: version.to_string(),
                    status: ProxyCacheStatus::NotFound,
                    etag: None,
                    expires_at: Some(Utc::now() + self.config.negative_ttl),
                    last_error: None,
                    last_checked: Utc::now(),
                })?;
                Err(SkillHubError::not_found(format!("{slug}@{version} not found upstream")))
            }
            DownloadOutcome::Other { status, body_snippet } => {
                let message = format!("upstream status {status}: {body_snippet}");
                self.write_error_cache(repo.id, slug, version, &message)?;
                Err(SkillHubError::upstream(message))
            }
        }
    }

    fn write_error_cache(
        &self,
        repo_id: RepoId,
        slug: &str,
        version: &str,
        message: &str,
    ) -> Result<()> {
        self.store.upsert_proxy_cache(ProxyCacheEntry {
            repo_id,
            package_name: slug.to_string(),
            version: version.to_string(),
            status: ProxyCacheStatus::Error,
            etag: None,
            expires_at: Some(Utc::now() + ERROR_CACHE_TTL),
            last_error: Some(message.to_string()),
            last_checked: Utc::now(),
        })
    }

    /// Stores the blob, parses it as a ZIP to emit the `files` descriptor
    /// array, then opens one transaction to ensure the package, insert the
    /// version and asset, and apply the `{"latest": version}` tag patch.
    fn materialize(
        &self,
        repo: &Repository,
        slug: &str,
        version: &str,
        bytes: Vec<u8>,
        etag: Option<String>,
        content_disposition: Option<&str>,
    ) -> Result<Artifact> {
        let (digest, size_bytes, blob_key) = self.blobs.put_stream(&mut Cursor::new(bytes.clone()))?;
        let files = extract_file_descriptors(&bytes)?;
        let file_name = derive_file_name(content_disposition, slug, version);

        let created_by = format!("proxy:{}", repo.name);
        let tag_patch = BTreeMap::from([("latest".to_string(), version.to_string())]);

        let result = self.store.publish_fetch_tx(
            repo.id,
            slug,
            &created_by,
            NewVersionInput {
                version: version.to_string(),
                digest: digest.clone(),
                size_bytes,
                changelog: String::new(),
                changelog_source: None,
                files,
                created_at: Utc::now(),
            },
            NewAssetInput {
                path: file_name,
                blob_path: blob_key,
                size_bytes,
                digest,
            },
            tag_patch,
        );

        let artifact = match result {
            Ok((found_version, asset)) => Artifact {
                repo_id: repo.id,
                package_slug: slug.to_string(),
                version: found_version.version,
                blob_key: asset.blob_path,
                digest: asset.digest,
                size_bytes: asset.size_bytes,
                file_name: asset.path,
            },
            Err(SkillHubError::Conflict(_)) => {
                // Another coalesced winner (or a racing publish) beat us
                // to the insert; the artifact must exist now.
                match self.local_hit(repo.id, slug, version)? {
                    Some(artifact) => artifact,
                    None => return Err(SkillHubError::conflict(format!("{slug}@{version}"))),
                }
            }
            Err(e) => return Err(e),
        };

        self.store.upsert_proxy_cache(ProxyCacheEntry {
            repo_id: repo.id,
            package_name: slug.to_string(),
            version: version.to_string(),
            status: ProxyCacheStatus::Cached,
            etag,
            expires_at: None,
            last_error: None,
            last_checked: Utc::now(),
        })?;

        Ok(artifact)
    }
}

impl ProxyCacheThrough for ProxyFetcher {
    #[tracing::instrument(skip(self, repo), fields(repo_id = ?repo.id, slug, version))]
    fn resolve_proxy_artifact(&self, repo: &Repository, slug: &str, version: &str) -> Result<Artifact> {
        if let Some(artifact) = self.local_hit(repo.id, slug, version)? {
            return Ok(artifact);
        }

        if let Some(cached) = self.store.get_proxy_cache(repo.id, slug, version)? {
            if matches!(cached.status, ProxyCacheStatus::NotFound) {
                if let Some(expires_at) = cached.expires_at {
                    if expires_at > Utc::now() {
                        return Err(SkillHubError::not_found(format!(
                            "{slug}@{version} negatively cached until {expires_at}"
                        )));
                    }
                }
            }
        }

        let key = flight_key(repo.id, slug, version);
        let repo = repo.clone();
        let slug_owned = slug.to_string();
        let version_owned = version.to_string();
        let (result, _shared) = self.flights.work(key, move || {
            self.fetch_from_upstream(&repo, &slug_owned, &version_owned)
        });
        result
    }
}

/// `Content-Disposition: ...; filename="x.zip"` (quoted or bare) wins;
/// otherwise a synthesised `"<slug>-<version>.zip"` name (the URL-basename
/// fallback named in the spec degenerates to this for our query-string
/// download URL, which has no path basename to speak of).
fn derive_file_name(content_disposition: Option<&str>, slug: &str, version: &str) -> String {
    if let Some(value) = content_disposition {
        if let Some(name) = parse_content_disposition_filename(value) {
            return name;
        }
    }
    format!("{slug}-{version}.zip")
}

fn parse_content_disposition_filename(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        let rest = part.strip_prefix("filename=")?;
        let unquoted = rest.trim_matches('"');
        if !unquoted.is_empty() {
            return Some(unquoted.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillhub_store::InMemoryMetadataStore;
    use skillhub_types::RepositoryType;
    use std::io::Write;
    use tiny_http::{Header, Response, Server};

    fn proxy_repo(upstream: &str) -> Repository {
        Repository {
            id: RepoId(1),
            name: "upstream-mirror".to_string(),
            kind: RepositoryType::Proxy,
            upstream_url: Some(upstream.to_string()),
            enabled: true,
        }
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, contents) in entries {
                writer
                    .start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(contents).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    fn setup() -> (Arc<InMemoryMetadataStore>, Arc<dyn BlobStore>, ProxyFetcher, tempfile::TempDir) {
        let store = Arc::new(InMemoryMetadataStore::new());
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(skillhub_blobstore::FileBlobStore::new(dir.path()).unwrap());
        let fetcher = ProxyFetcher::new(
            store.clone() as Arc<dyn MetadataStore>,
            blobs.clone(),
            ProxyFetcherConfig {
                timeout: Duration::from_secs(5),
                negative_ttl: Duration::from_secs(300),
            },
        );
        (store, blobs, fetcher, dir)
    }

    #[test]
    fn fetch_200_materializes_artifact_and_caches() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr());
        let body = zip_bytes(&[("skill.md", b"hello world")]);

        let handle = std::thread::spawn(move || {
            let request = server.recv().unwrap();
            let header = Header::from_bytes(&b"ETag"[..], &b"\"v1\""[..]).unwrap();
            let response = Response::from_data(body).with_header(header);
            request.respond(response).unwrap();
        });

        let (store, _blobs, fetcher, _dir) = setup();
        let repo = proxy_repo(&addr);
        store.put_repository(repo.clone());

        let artifact = fetcher.resolve_proxy_artifact(&repo, "demo", "1.0.0").unwrap();
        assert_eq!(artifact.version, "1.0.0");
        handle.join().unwrap();

        let cache = store.get_proxy_cache(repo.id, "demo", "1.0.0").unwrap().unwrap();
        assert!(matches!(cache.status, ProxyCacheStatus::Cached));
        assert_eq!(cache.etag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn fetch_404_writes_negative_cache_and_second_call_hits_no_network() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr());

        let handle = std::thread::spawn(move || {
            let request = server.recv().unwrap();
            request
                .respond(Response::empty(tiny_http::StatusCode(404)))
                .unwrap();
        });

        let (store, _blobs, fetcher, _dir) = setup();
        let repo = proxy_repo(&addr);
        store.put_repository(repo.clone());

        let err = fetcher.resolve_proxy_artifact(&repo, "missing", "9.9.9").unwrap_err();
        assert!(err.is_not_found());
        handle.join().unwrap();

        // Second call must not hit the network: no server listening now.
        let err2 = fetcher.resolve_proxy_artifact(&repo, "missing", "9.9.9").unwrap_err();
        assert!(err2.is_not_found());
    }

    #[test]
    fn fetch_non_2xx_writes_error_cache() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr());

        let handle = std::thread::spawn(move || {
            let request = server.recv().unwrap();
            request
                .respond(Response::from_string("oops").with_status_code(tiny_http::StatusCode(500)))
                .unwrap();
        });

        let (store, _blobs, fetcher, _dir) = setup();
        let repo = proxy_repo(&addr);
        store.put_repository(repo.clone());

        let err = fetcher.resolve_proxy_artifact(&repo, "demo", "1.0.0").unwrap_err();
        assert!(matches!(err, SkillHubError::UpstreamError(_)));
        handle.join().unwrap();

        let cache = store.get_proxy_cache(repo.id, "demo", "1.0.0").unwrap().unwrap();
        assert!(matches!(cache.status, ProxyCacheStatus::Error));
    }

    #[test]
    fn concurrent_fetches_coalesce_to_one_upstream_request() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr());
        let request_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&request_count);

        let body = zip_bytes(&[("skill.md", b"payload")]);
        let handle = std::thread::spawn(move || {
            // Exactly one request is expected; serve it after a short
            // delay so concurrent callers pile up behind the single
            // flight before it completes.
            let request = server.recv().unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            request.respond(Response::from_data(body)).unwrap();
        });

        let (store, _blobs, fetcher, _dir) = setup();
        let repo = proxy_repo(&addr);
        store.put_repository(repo.clone());
        let fetcher = Arc::new(fetcher);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let fetcher = Arc::clone(&fetcher);
            let repo = repo.clone();
            handles.push(std::thread::spawn(move || {
                fetcher.resolve_proxy_artifact(&repo, "s", "1.0.0")
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        handle.join().unwrap();

        assert_eq!(request_count.load(Ordering::SeqCst), 1);
        let digest = results[0].as_ref().unwrap().digest.clone();
        for result in &results {
            assert_eq!(result.as_ref().unwrap().digest, digest);
        }
    }
}
