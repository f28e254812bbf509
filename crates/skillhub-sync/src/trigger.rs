//! Manual sync trigger (spec §4.8): `{running, last_result, last_error}`
//! guarded by one mutex. `trigger()` atomically checks `running`; if
//! already running it returns `false`; otherwise it launches the pass
//! on a `CancelToken::process_root()` — rooted in the process, never
//! the caller's token, per the background-vs-request-lifetime design
//! note in spec §9.

use std::sync::{Arc, Mutex};

use skillhub_types::CancelToken;

use crate::runner::SyncRunner;
use crate::stats::Summary;

/// A plain-data echo of [`Summary`] (no per-repo error detail) for
/// `status()` snapshots.
#[derive(Debug, Clone)]
pub struct SummarySnapshot {
    pub skills: u64,
    pub versions: u64,
    pub cached: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl From<&Summary> for SummarySnapshot {
    fn from(summary: &Summary) -> Self {
        Self {
            skills: summary.skills,
            versions: summary.versions,
            cached: summary.cached,
            failed: summary.failed,
            skipped: summary.skipped,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TriggerStatus {
    pub running: bool,
    pub last_result: Option<SummarySnapshot>,
    pub last_error: Option<String>,
}

struct State {
    running: bool,
    last_result: Option<SummarySnapshot>,
    last_error: Option<String>,
}

pub struct SyncTrigger {
    runner: Arc<SyncRunner>,
    default_page_size: u32,
    state: Arc<Mutex<State>>,
}

impl SyncTrigger {
    pub fn new(runner: Arc<SyncRunner>, default_page_size: u32) -> Self {
        Self {
            runner,
            default_page_size,
            state: Arc::new(Mutex::new(State {
                running: false,
                last_result: None,
                last_error: None,
            })),
        }
    }

    /// Returns `true` if a new pass was started, `false` if one was
    /// already running (spec §4.8: `trigger(ctx)` returns `{started}`).
    pub fn trigger(&self) -> bool {
        {
            let mut state = self.state.lock().expect("sync trigger mutex poisoned");
            if state.running {
                return false;
            }
            state.running = true;
        }

        let runner = Arc::clone(&self.runner);
        let page_size = self.default_page_size;
        let state = Arc::clone(&self.state);
        std::thread::spawn(move || {
            let cancel = CancelToken::process_root();
            let result = runner.run(page_size, &cancel);
            let mut state = state.lock().expect("sync trigger mutex poisoned");
            match result {
                Ok(summary) => {
                    state.last_result = Some(SummarySnapshot::from(&summary));
                    state.last_error = None;
                }
                Err(e) => {
                    state.last_error = Some(e.to_string());
                }
            }
            state.running = false;
        });

        true
    }

    pub fn status(&self) -> TriggerStatus {
        let state = self.state.lock().expect("sync trigger mutex poisoned");
        TriggerStatus {
            running: state.running,
            last_result: state.last_result.clone(),
            last_error: state.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SyncerRegistry;
    use skillhub_config::{FileConfigProvider, SkillHubConfig};
    use skillhub_store::{InMemoryMetadataStore, MetadataStore};
    use std::time::Duration;

    #[test]
    fn trigger_runs_in_background_and_updates_status() {
        let store = Arc::new(InMemoryMetadataStore::new()) as Arc<dyn MetadataStore>;
        let config = Arc::new(FileConfigProvider::from_config(SkillHubConfig::default()));
        let runner = Arc::new(SyncRunner::new(store, config, SyncerRegistry::new()));
        let trigger = SyncTrigger::new(runner, 100);

        assert!(trigger.trigger());

        let mut status = trigger.status();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while status.running && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            status = trigger.status();
        }
        assert!(!status.running);
        assert!(status.last_result.is_some());
    }

    #[test]
    fn second_trigger_while_running_is_rejected() {
        let store = Arc::new(InMemoryMetadataStore::new()) as Arc<dyn MetadataStore>;
        let config = Arc::new(FileConfigProvider::from_config(SkillHubConfig::default()));
        let runner = Arc::new(SyncRunner::new(store, config, SyncerRegistry::new()));
        let trigger = SyncTrigger::new(runner, 100);

        {
            let mut state = trigger.state.lock().unwrap();
            state.running = true;
        }
        assert!(!trigger.trigger());
    }
}
