//! The sync runner: lists proxy repositories, builds a syncer per repo
//! through the registry, and accumulates results into one [`Summary`]
//! without aborting the run on a single repo's failure (spec §4.7,
//! §7 "Sync Runner joins, never swallows, repo-level errors").

use std::sync::Arc;

use skillhub_config::ConfigProvider;
use skillhub_store::MetadataStore;
use skillhub_types::{CancelToken, Result};

use crate::registry::SyncerRegistry;
use crate::stats::Summary;

pub struct SyncRunner {
    store: Arc<dyn MetadataStore>,
    config: Arc<dyn ConfigProvider>,
    registry: SyncerRegistry,
}

impl SyncRunner {
    pub fn new(store: Arc<dyn MetadataStore>, config: Arc<dyn ConfigProvider>, registry: SyncerRegistry) -> Self {
        Self { store, config, registry }
    }

    /// `runner.run(ctx, pageSize)`: one sync pass across every enabled
    /// proxy repository, sequentially (spec §5: "repositories
    /// sequentially but versions within a slug in parallel"). Context
    /// cancellation aborts immediately; a single repo's failure is
    /// joined into the summary instead.
    #[tracing::instrument(skip(self, cancel))]
    pub fn run(&self, page_size: u32, cancel: &CancelToken) -> Result<Summary> {
        let repos = self.store.list_proxy_repositories()?;
        let mut summary = Summary::default();

        for repo in repos {
            if cancel.is_cancelled() {
                break;
            }
            let syncer = match self.registry.build(&repo) {
                Ok(syncer) => syncer,
                Err(e) => {
                    summary.record_error(&repo.name, e.to_string());
                    continue;
                }
            };
            match syncer.sync(page_size, cancel) {
                Ok(stats) => summary.record_repo(stats),
                Err(e) => summary.record_error(&repo.name, e.to_string()),
            }
        }

        Ok(summary)
    }

    /// The worker lifecycle (spec §4.7): read config once, respect
    /// `startup_delay`, run one pass, then tick at `interval` forever
    /// (re-reading config every tick), until `cancel` fires.
    pub fn run_worker(&self, cancel: &CancelToken) {
        let config = self.config.proxy_sync();
        if !config.enabled {
            return;
        }

        cancel.sleep(config.startup_delay);
        if cancel.is_cancelled() {
            return;
        }
        self.run_and_log(config.page_size, cancel);

        if config.interval.is_zero() {
            return;
        }

        let mut interval = config.interval;
        loop {
            cancel.sleep(interval);
            if cancel.is_cancelled() {
                return;
            }

            let tick_config = self.config.proxy_sync();
            interval = tick_config.interval;
            if tick_config.enabled {
                self.run_and_log(tick_config.page_size, cancel);
            }
            if interval.is_zero() {
                return;
            }
        }
    }

    fn run_and_log(&self, page_size: u32, cancel: &CancelToken) {
        match self.run(page_size, cancel) {
            Ok(summary) => tracing::info!(
                skills = summary.skills,
                versions = summary.versions,
                cached = summary.cached,
                failed = summary.failed,
                errors = summary.repo_errors.len(),
                "sync pass complete"
            ),
            Err(e) => tracing::error!(error = %e, "sync pass failed"),
        }
    }
}
