//! Per-repo and run-wide sync statistics, accumulated by
//! [`crate::runner::SyncRunner`] into the `Summary` shape spec §4.7
//! names: `{skills, versions, cached, failed, skipped}`.

/// One repository's sync-pass counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepoStats {
    pub skills: u64,
    pub versions: u64,
    pub cached: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// The whole pass's accumulated stats plus one joined error per failed
/// repo — never a single aborting error (spec §7: "Sync Runner joins,
/// never swallows, repo-level errors").
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub skills: u64,
    pub versions: u64,
    pub cached: u64,
    pub failed: u64,
    pub skipped: u64,
    pub repo_errors: Vec<(String, String)>,
}

impl Summary {
    pub(crate) fn record_repo(&mut self, stats: RepoStats) {
        self.skills += stats.skills;
        self.versions += stats.versions;
        self.cached += stats.cached;
        self.failed += stats.failed;
        self.skipped += stats.skipped;
    }

    pub(crate) fn record_error(&mut self, repo_name: &str, message: String) {
        self.repo_errors.push((repo_name.to_string(), message));
    }

    pub fn is_clean(&self) -> bool {
        self.repo_errors.is_empty()
    }
}
