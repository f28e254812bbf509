use thiserror::Error;

/// The distinct error kinds surfaced by the federation core.
///
/// Every subsystem in this workspace (resolver, proxy fetcher, sync runner,
/// rate limiter) reports failures through this enum rather than an opaque
/// `anyhow::Error`, so callers at the HTTP boundary can translate each
/// variant into the right status code without string-matching.
#[derive(Debug, Clone, Error)]
pub enum SkillHubError {
    /// Malformed slug, missing required field, invalid path, a non-zip
    /// upload, or a cycle in a group definition detected at mutation time.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Entity absent, or its owning repository is disabled (treated as
    /// absent by every read path).
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint violation — duplicate `(package_id, version)` on
    /// insert, or a duplicate token.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Policy denial from the caller's auth layer. The core never raises
    /// this itself; it is reserved for translation at the boundary.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Non-200/304/404 upstream response, a transport failure, a JSON
    /// decode error, or a timeout talking to an upstream registry.
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// Blob or metadata-store I/O failure.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Emitted only by the admission rate limiter.
    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

impl SkillHubError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamError(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }

    /// True for [`SkillHubError::NotFound`] — the one variant the resolver's
    /// group traversal treats as "keep probing the next member" rather than
    /// an abort signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, SkillHubError>;
