//! # skillhub-retry
//!
//! Retry/backoff policy for the federation core:
//! - [`strategy`] — general-purpose exponential/linear/constant backoff with
//!   jitter, used anywhere a blocking call needs a retry loop.
//! - [`backoff_429`] — the sync runner's specific 429-response delay
//!   selection (`Retry-After` > `RateLimit-Reset` > `X-RateLimit-Reset`,
//!   default 1s, uniform `[0, 250ms]` jitter), which is a narrower and
//!   differently-jittered policy than [`strategy`] and is kept separate
//!   rather than folded into the general `RetryStrategyConfig` shape.

mod backoff_429;
mod strategy;

pub use backoff_429::{RetryHeaders, select_retry_delay};
pub use strategy::{RetryStrategyConfig, RetryStrategyType, calculate_delay};
