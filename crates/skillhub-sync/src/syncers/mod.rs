mod clawhub;

pub use clawhub::ClawHubSyncer;

use skillhub_types::{CancelToken, Result};

use crate::stats::RepoStats;

/// One repository's sync strategy, produced per-repo by
/// [`crate::registry::SyncerRegistry`] (spec §4.7 step 2).
pub trait RepoSyncer: Send + Sync {
    fn sync(&self, page_size: u32, cancel: &CancelToken) -> Result<RepoStats>;
}
