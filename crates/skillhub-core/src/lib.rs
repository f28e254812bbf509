//! # skillhub-core
//!
//! The federation core behind the `skillhub` CLI: resolution across
//! hosted, proxy, and group repositories; a cache-through fetcher for
//! proxy repositories backed by a content-addressable blob store; a
//! config-driven background sync worker; and the request-admission rate
//! limiter that gates all of the above.
//!
//! ## Pipeline
//!
//! [`SkillHubCore::bootstrap`] (or [`SkillHubCore::bootstrap_from_paths`]
//! for the on-disk config/manifest case) assembles every component once,
//! at process start:
//!
//! 1. A [`manifest::ReposManifest`] primes the metadata store with the
//!    repository graph and group memberships the real system would read
//!    from its SQL schema.
//! 2. [`skillhub_resolver::Resolver`] and [`skillhub_proxy::ProxyFetcher`]
//!    are wired against that store and a [`skillhub_blobstore::FileBlobStore`].
//! 3. [`skillhub_sync::SyncRunner`] and [`skillhub_sync::SyncTrigger`] are
//!    wired against a [`skillhub_config::FileConfigProvider`] so a
//!    background worker thread (started by the embedding binary, not by
//!    this crate) can call [`SkillHubCore::run_sync_worker`].
//! 4. [`admission::AdmissionGate`] wraps the shared rate limiter so every
//!    request-handling surface checks admission the same way.
//!
//! ## Modules
//!
//! - [`facade`] — [`SkillHubCore`], the one composition root downstream
//!   callers depend on
//! - [`manifest`] — declarative repository/membership bootstrap
//! - [`admission`] — caller-to-rate-limit-bucket mapping

mod admission;
mod facade;
mod manifest;

pub use admission::{AdmissionGate, Caller};
pub use facade::{BootstrapError, SkillHubCore};
pub use manifest::{ManifestError, ReposManifest};
// Re-exported so embedders (and the `skillhub-cli` binary) can name the
// sync-pass result types returned by `SkillHubCore::run_sync_once` /
// `sync_status` without an extra `skillhub-sync` dependency.
pub use skillhub_sync::{SummarySnapshot, TriggerStatus};
