//! # skillhub-upstream
//!
//! A blocking HTTP client for one ClawHub-style upstream registry (spec
//! §6 External Interfaces): paged skill/version listing and conditional
//! downloads, with transparent `429` retry baked into every request.
//!
//! [`client::UpstreamClient`] is the only public entry point; [`model`]
//! holds the wire shapes it deserializes into and the terminal
//! [`model::DownloadOutcome`] callers switch on.

mod client;
mod model;

pub use client::UpstreamClient;
pub use model::{DownloadOutcome, LatestVersion, SkillSummary, SkillsPage, VersionSummary, VersionsPage};
