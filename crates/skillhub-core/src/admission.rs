//! The request-admission gate (spec §4.8 "Admission Rate Limit"): picks
//! the `(kind, bucket)` pair from whatever the caller resolved about the
//! request — an authenticated subject takes priority over the client IP
//! — and asks the shared [`RateLimiter`] whether to admit it, before any
//! resolver work begins.

use skillhub_ratelimit::{Decision, Kind, RateLimiter, Scope};
use skillhub_types::WILDCARD_SUBJECT;

/// Identifies the caller of one incoming request, as handed down by the
/// (out-of-scope) auth layer: an authenticated, non-wildcard subject, or
/// failing that a client IP.
pub struct Caller<'a> {
    pub subject: Option<&'a str>,
    pub client_ip: &'a str,
}

impl<'a> Caller<'a> {
    fn bucket(&self) -> (Kind, &'a str) {
        match self.subject {
            Some(subject) if subject != WILDCARD_SUBJECT && !subject.is_empty() => {
                (Kind::Key, subject)
            }
            _ => (Kind::Ip, self.client_ip),
        }
    }
}

pub struct AdmissionGate {
    limiter: RateLimiter,
}

impl AdmissionGate {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }

    /// Admits or denies one request in `scope` from `caller`, at the
    /// given wall-clock time (epoch seconds).
    pub fn check(&self, now: u64, scope: Scope, caller: &Caller<'_>) -> Decision {
        let (kind, bucket) = caller.bucket();
        self.limiter.take(now, scope, kind, bucket)
    }
}
