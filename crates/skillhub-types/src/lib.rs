//! # skillhub-types
//!
//! Core domain types for the SkillHub federation core: the data model
//! (repositories, packages, versions, assets, proxy-cache entries, repo
//! membership and roles), the shared error enum, slug/path sanitisation,
//! and the cancellation token used in place of an async runtime's
//! cancellation context.
//!
//! Downstream crates (`skillhub-resolver`, `skillhub-proxy`,
//! `skillhub-sync`, `skillhub-store`, `skillhub-blobstore`) all depend on
//! this crate for their shared vocabulary rather than redefining it.

mod cancel;
mod error;
mod model;
mod sanitize;

pub use cancel::CancelToken;
pub use error::{Result, SkillHubError};
pub use model::*;
pub use sanitize::{normalize_slug, sanitize_archive_path};
