//! The sync runner's syncer factory: a `Vec<(predicate, constructor)>`
//! walked in registration order, first match wins. Spec §9 REDESIGN
//! FLAG: the source's dynamic-dispatch builder interface keyed by
//! `match(repo)` is re-architected here as this plain registry instead
//! of an inheritance hierarchy.

use std::sync::Arc;
use std::time::Duration;

use skillhub_types::{Repository, Result, SkillHubError};

use crate::cacher::VersionCacher;
use crate::syncers::{ClawHubSyncer, RepoSyncer};

type Predicate = Box<dyn Fn(&Repository) -> bool + Send + Sync>;
type Constructor = Box<dyn Fn(&Repository) -> Result<Box<dyn RepoSyncer>> + Send + Sync>;

/// One `(predicate, constructor)` entry.
pub struct SyncerBuilder {
    predicate: Predicate,
    constructor: Constructor,
}

impl SyncerBuilder {
    pub fn new(
        predicate: impl Fn(&Repository) -> bool + Send + Sync + 'static,
        constructor: impl Fn(&Repository) -> Result<Box<dyn RepoSyncer>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            constructor: Box::new(constructor),
        }
    }
}

/// An ordered registry of builders; `build` returns the first matching
/// entry's syncer, or an error for an unmatched repo (spec §4.7 step 2:
/// "when no builder matches, record an error for that repo and
/// continue").
#[derive(Default)]
pub struct SyncerRegistry {
    builders: Vec<SyncerBuilder>,
}

impl SyncerRegistry {
    pub fn new() -> Self {
        Self { builders: Vec::new() }
    }

    pub fn register(&mut self, builder: SyncerBuilder) -> &mut Self {
        self.builders.push(builder);
        self
    }

    pub fn build(&self, repo: &Repository) -> Result<Box<dyn RepoSyncer>> {
        for builder in &self.builders {
            if (builder.predicate)(repo) {
                return (builder.constructor)(repo);
            }
        }
        Err(SkillHubError::invalid_input(format!(
            "no syncer builder matches repository {:?}",
            repo.id
        )))
    }
}

/// The standard registry: every `proxy`-kind repository is synced with
/// [`ClawHubSyncer`] against its `upstream_url`, sharing `cacher` and
/// `concurrency` across repos.
pub fn default_registry(
    cacher: Arc<dyn VersionCacher>,
    timeout: Duration,
    concurrency: u32,
) -> SyncerRegistry {
    let mut registry = SyncerRegistry::new();
    registry.register(SyncerBuilder::new(
        |repo| matches!(repo.kind, skillhub_types::RepositoryType::Proxy),
        move |repo| {
            let base_url = repo.upstream_url.clone().ok_or_else(|| {
                SkillHubError::invalid_input(format!("proxy repo {:?} has no upstream_url", repo.id))
            })?;
            let client = Arc::new(skillhub_upstream::UpstreamClient::new(base_url, timeout)?);
            Ok(Box::new(ClawHubSyncer::new(repo.clone(), client, Arc::clone(&cacher), concurrency))
                as Box<dyn RepoSyncer>)
        },
    ));
    registry
}
