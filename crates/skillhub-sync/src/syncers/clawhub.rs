//! The ClawHub-style upstream syncer (spec §4.7): paged skills listing,
//! per-slug paged version listing with a `latestVersion` fallback, and a
//! bounded worker pool dispatching one [`crate::cacher::VersionCacher`]
//! call per version — chunked the way `run_publish_level` in the
//! teacher's `shipper` crate (`src/engine_parallel.rs`) fans out a
//! publish level, except this pool counts every item's outcome instead
//! of returning on the first error (spec §4.7 step 4: "Count successes
//! vs failures").

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use skillhub_types::{CancelToken, Repository, Result, normalize_slug};
use skillhub_upstream::{LatestVersion, SkillSummary, UpstreamClient, VersionSummary};

use super::RepoSyncer;
use crate::cacher::VersionCacher;
use crate::stats::RepoStats;

/// One de-duplicated, merged version entry ready to dispatch.
#[derive(Debug, Clone)]
struct VersionEntry {
    version: String,
    created_at: Option<DateTime<Utc>>,
    changelog: Option<String>,
    changelog_source: Option<String>,
}

pub struct ClawHubSyncer {
    repo: Repository,
    client: Arc<UpstreamClient>,
    cacher: Arc<dyn VersionCacher>,
    concurrency: u32,
}

impl ClawHubSyncer {
    pub fn new(
        repo: Repository,
        client: Arc<UpstreamClient>,
        cacher: Arc<dyn VersionCacher>,
        concurrency: u32,
    ) -> Self {
        Self { repo, client, cacher, concurrency }
    }

    fn fetch_all_versions(
        &self,
        slug: &str,
        page_size: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<VersionSummary>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(skillhub_types::SkillHubError::upstream("sync cancelled"));
            }
            let page = self.client.list_versions(slug, page_size, cursor.as_deref(), cancel)?;
            out.extend(page.items);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }

    fn sync_one_skill(
        &self,
        skill: &SkillSummary,
        page_size: u32,
        cancel: &CancelToken,
        stats: &mut RepoStats,
    ) {
        let slug = normalize_slug(&skill.slug);
        if slug.is_empty() {
            stats.skipped += 1;
            return;
        }

        let raw_versions = match self.fetch_all_versions(&slug, page_size, cancel) {
            Ok(versions) => versions,
            Err(_) => match fallback_entry(skill.latest_version.as_ref()) {
                Some(entry) => vec![entry],
                None => {
                    stats.failed += 1;
                    return;
                }
            },
        };

        let mut entries = dedup_versions(raw_versions);
        merge_latest(&mut entries, skill.latest_version.as_ref());

        if entries.is_empty() {
            stats.skipped += 1;
            return;
        }

        stats.skills += 1;
        let (cached, failed) = self.sync_versions(&slug, &entries, cancel);
        stats.versions += entries.len() as u64;
        stats.cached += cached;
        stats.failed += failed;

        let tag_patch: BTreeMap<String, String> = skill
            .tags
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();
        if let Err(e) = self.cacher.sync_proxy_skill_meta(
            &self.repo,
            &slug,
            Some(skill.display_name.clone()),
            skill.summary.clone(),
            tag_patch,
        ) {
            tracing::warn!(error = %e, slug, "skill meta sync failed");
        }
    }

    /// Bounded worker pool sized `min(concurrency, len(entries))`,
    /// chunked exactly like the teacher's publish-level fan-out — spawn
    /// every thread in a chunk, then join the whole chunk before
    /// starting the next. Unlike the teacher, a failing item does not
    /// abort the remaining chunks; it is counted and the pool continues.
    fn sync_versions(
        &self,
        slug: &str,
        entries: &[VersionEntry],
        cancel: &CancelToken,
    ) -> (u64, u64) {
        let worker_count = (self.concurrency as usize).max(1).min(entries.len().max(1));
        let cached = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        for chunk in entries.chunks(worker_count) {
            let mut handles = Vec::with_capacity(chunk.len());
            for entry in chunk {
                let repo = self.repo.clone();
                let slug = slug.to_string();
                let entry = entry.clone();
                let cacher = Arc::clone(&self.cacher);
                let cached = Arc::clone(&cached);
                let failed = Arc::clone(&failed);
                handles.push(std::thread::spawn(move || {
                    let mut ok = cacher.sync_proxy_version(&repo, &slug, &entry.version).is_ok();
                    if ok {
                        let meta_result = cacher.sync_proxy_version_meta(
                            &repo,
                            &slug,
                            &entry.version,
                            entry.created_at,
                            entry.changelog.clone(),
                            entry.changelog_source.clone(),
                        );
                        // A meta failure over-reports as a content
                        // failure even though the content call itself
                        // succeeded — the open question in spec §9
                        // says to preserve this behaviour.
                        if meta_result.is_err() {
                            ok = false;
                        }
                    }
                    if ok {
                        cached.fetch_add(1, Ordering::SeqCst);
                    } else {
                        failed.fetch_add(1, Ordering::SeqCst);
                    }
                }));
            }
            for handle in handles {
                handle.join().expect("sync worker thread panicked");
            }
            if cancel.is_cancelled() {
                break;
            }
        }

        (cached.load(Ordering::SeqCst), failed.load(Ordering::SeqCst))
    }
}

impl RepoSyncer for ClawHubSyncer {
    #[tracing::instrument(skip(self, cancel), fields(repo = %self.repo.name))]
    fn sync(&self, page_size: u32, cancel: &CancelToken) -> Result<RepoStats> {
        let mut stats = RepoStats::default();
        let mut cursor: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(skillhub_types::SkillHubError::upstream("sync cancelled"));
            }
            let page = self.client.list_skills(page_size, cursor.as_deref(), cancel)?;
            for skill in &page.items {
                if cancel.is_cancelled() {
                    return Err(skillhub_types::SkillHubError::upstream("sync cancelled"));
                }
                self.sync_one_skill(skill, page_size, cancel, &mut stats);
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(stats)
    }
}

fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn normalize_changelog_source(source: Option<String>) -> Option<String> {
    source.filter(|s| !s.trim().is_empty())
}

fn fallback_entry(latest: Option<&LatestVersion>) -> Option<VersionEntry> {
    let latest = latest?;
    let version = latest.version.trim();
    if version.is_empty() {
        return None;
    }
    Some(VersionEntry {
        version: version.to_string(),
        created_at: latest.created_at.and_then(ms_to_datetime),
        changelog: latest.changelog.clone(),
        changelog_source: normalize_changelog_source(latest.changelog_source.clone()),
    })
}

/// De-duplicates a raw versions page by trimmed version, keeping the
/// first occurrence (spec §4.7 step 3).
fn dedup_versions(raw: Vec<VersionSummary>) -> Vec<VersionEntry> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for item in raw {
        let version = item.version.trim().to_string();
        if version.is_empty() || !seen.insert(version.clone()) {
            continue;
        }
        out.push(VersionEntry {
            version,
            created_at: item.created_at.and_then(ms_to_datetime),
            changelog: item.changelog,
            changelog_source: normalize_changelog_source(item.changelog_source),
        });
    }
    out
}

/// Merges `latestVersion` into an already-deduplicated entry list: if
/// its version is already present, nullable fields are filled in
/// primary-wins (existing non-null fields are untouched); otherwise it
/// is appended as a new entry (spec §4.7 step 3).
fn merge_latest(entries: &mut Vec<VersionEntry>, latest: Option<&LatestVersion>) {
    let Some(latest) = latest else { return };
    let version = latest.version.trim();
    if version.is_empty() {
        return;
    }

    if let Some(existing) = entries.iter_mut().find(|e| e.version == version) {
        if existing.created_at.is_none() {
            existing.created_at = latest.created_at.and_then(ms_to_datetime);
        }
        if existing.changelog.is_none() {
            existing.changelog = latest.changelog.clone();
        }
        if existing.changelog_source.is_none() {
            existing.changelog_source = normalize_changelog_source(latest.changelog_source.clone());
        }
    } else {
        entries.push(VersionEntry {
            version: version.to_string(),
            created_at: latest.created_at.and_then(ms_to_datetime),
            changelog: latest.changelog.clone(),
            changelog_source: normalize_changelog_source(latest.changelog_source.clone()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillhub_types::RepositoryType;
    use std::sync::Mutex;
    use tiny_http::{Response, Server};

    struct RecordingCacher {
        calls: Mutex<Vec<String>>,
        fail_on: Vec<String>,
    }

    impl RecordingCacher {
        fn new(fail_on: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: fail_on.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl VersionCacher for RecordingCacher {
        fn sync_proxy_version(&self, _repo: &Repository, slug: &str, version: &str) -> Result<()> {
            let key = format!("{slug}@{version}");
            self.calls.lock().unwrap().push(key.clone());
            if self.fail_on.contains(&key) {
                Err(skillhub_types::SkillHubError::upstream("forced failure"))
            } else {
                Ok(())
            }
        }
    }

    fn proxy_repo(upstream: &str) -> Repository {
        Repository {
            id: skillhub_types::RepoId(1),
            name: "upstream-mirror".to_string(),
            kind: RepositoryType::Proxy,
            upstream_url: Some(upstream.to_string()),
            enabled: true,
        }
    }

    #[test]
    fn paged_sync_matches_literal_scenario_one() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr());

        let handle = std::thread::spawn(move || {
            for _ in 0..4 {
                let request = server.recv().unwrap();
                let url = request.url().to_string();
                let body = if url.starts_with("/api/v1/skills?") && !url.contains("cursor=") {
                    r#"{"items":[{"slug":"alpha","displayName":"Alpha","summary":null,"tags":null,"latestVersion":{"version":"2.0.0","createdAt":null,"changelog":null,"changelogSource":null}}],"nextCursor":"page2"}"#
                } else if url.starts_with("/api/v1/skills?") && url.contains("cursor=page2") {
                    r#"{"items":[{"slug":"beta","displayName":"Beta","summary":null,"tags":null,"latestVersion":{"version":"0.2.0","createdAt":null,"changelog":null,"changelogSource":null}}],"nextCursor":null}"#
                } else if url.starts_with("/api/v1/skills/alpha/versions") {
                    r#"{"items":[{"version":"2.0.0","createdAt":null,"changelog":null,"changelogSource":null},{"version":"1.0.0","createdAt":null,"changelog":null,"changelogSource":null}],"nextCursor":null}"#
                } else {
                    r#"{"items":[{"version":"0.2.0","createdAt":null,"changelog":null,"changelogSource":null}],"nextCursor":null}"#
                };
                request.respond(Response::from_string(body)).unwrap();
            }
        });

        let client = Arc::new(UpstreamClient::new(addr.clone(), std::time::Duration::from_secs(5)).unwrap());
        let cacher = Arc::new(RecordingCacher::new(&[]));
        let syncer = ClawHubSyncer::new(proxy_repo(&addr), client, cacher.clone(), 4);

        let stats = syncer.sync(100, &CancelToken::new()).unwrap();
        handle.join().unwrap();

        assert_eq!(stats.skills, 2);
        assert_eq!(stats.versions, 3);
        assert_eq!(stats.cached, 3);
        assert_eq!(stats.failed, 0);

        let mut calls = cacher.calls();
        calls.sort();
        assert_eq!(calls, vec!["alpha@1.0.0", "alpha@2.0.0", "beta@0.2.0"]);
    }

    #[test]
    fn dedup_and_failure_matches_literal_scenario_two() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr());

        let handle = std::thread::spawn(move || {
            let skills_req = server.recv().unwrap();
            skills_req
                .respond(Response::from_string(
                    r#"{"items":[{"slug":"delta","displayName":"Delta","summary":null,"tags":null,"latestVersion":null}],"nextCursor":null}"#,
                ))
                .unwrap();

            let versions_req = server.recv().unwrap();
            versions_req
                .respond(Response::from_string(
                    r#"{"items":[{"version":"3.0.0","createdAt":null,"changelog":null,"changelogSource":null},{"version":"2.0.0","createdAt":null,"changelog":null,"changelogSource":null},{"version":"3.0.0","createdAt":null,"changelog":null,"changelogSource":null}],"nextCursor":null}"#,
                ))
                .unwrap();
        });

        let client = Arc::new(UpstreamClient::new(addr.clone(), std::time::Duration::from_secs(5)).unwrap());
        let cacher = Arc::new(RecordingCacher::new(&["delta@2.0.0"]));
        let syncer = ClawHubSyncer::new(proxy_repo(&addr), client, cacher.clone(), 4);

        let stats = syncer.sync(100, &CancelToken::new()).unwrap();
        handle.join().unwrap();

        assert_eq!(stats.skills, 1);
        assert_eq!(stats.versions, 2);
        assert_eq!(stats.cached, 1);
        assert_eq!(stats.failed, 1);

        let mut calls = cacher.calls();
        calls.sort();
        assert_eq!(calls, vec!["delta@2.0.0", "delta@3.0.0"]);
    }

    #[test]
    fn rate_limited_skills_listing_retries_then_succeeds() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr());

        let handle = std::thread::spawn(move || {
            let first = server.recv().unwrap();
            let header = tiny_http::Header::from_bytes(&b"Retry-After"[..], &b"0"[..]).unwrap();
            first
                .respond(Response::empty(tiny_http::StatusCode(429)).with_header(header))
                .unwrap();

            let second = server.recv().unwrap();
            second
                .respond(Response::from_string(r#"{"items":[],"nextCursor":null}"#))
                .unwrap();
        });

        let client = Arc::new(UpstreamClient::new(addr.clone(), std::time::Duration::from_secs(5)).unwrap());
        let cacher = Arc::new(RecordingCacher::new(&[]));
        let syncer = ClawHubSyncer::new(proxy_repo(&addr), client, cacher, 4);

        let stats = syncer.sync(100, &CancelToken::new()).unwrap();
        handle.join().unwrap();
        assert_eq!(stats.skills, 0);
    }
}
