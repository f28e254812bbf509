use std::time::Duration;

use chrono::{DateTime, Utc};

/// The headers this module inspects on a `429 Too Many Requests` response.
/// Construct from whatever HTTP client the caller uses; this module has no
/// direct `reqwest` dependency so it stays testable in isolation.
#[derive(Debug, Clone, Default)]
pub struct RetryHeaders<'a> {
    pub retry_after: Option<&'a str>,
    pub rate_limit_reset: Option<&'a str>,
    pub x_rate_limit_reset: Option<&'a str>,
}

const DEFAULT_DELAY: Duration = Duration::from_secs(1);
const MAX_JITTER_MILLIS: u64 = 250;

/// Selects the retry delay for a `429` response per the priority order
/// `Retry-After` > `RateLimit-Reset` > `X-RateLimit-Reset`, defaulting to
/// one second, then adds uniform jitter in `[0, 250ms]`.
///
/// `now` is passed in explicitly (rather than read from the clock) so the
/// absolute-epoch `X-RateLimit-Reset` case is deterministic in tests.
pub fn select_retry_delay(headers: &RetryHeaders<'_>, now: DateTime<Utc>) -> Duration {
    let base = parse_retry_after(headers.retry_after, now)
        .or_else(|| parse_seconds_until(headers.rate_limit_reset))
        .or_else(|| parse_epoch_seconds(headers.x_rate_limit_reset, now))
        .unwrap_or(DEFAULT_DELAY);

    base + jitter()
}

fn jitter() -> Duration {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let millis: u64 = rng.gen_range(0..=MAX_JITTER_MILLIS);
    Duration::from_millis(millis)
}

/// `Retry-After` is either an integer count of seconds or an RFC1123
/// timestamp.
fn parse_retry_after(value: Option<&str>, now: DateTime<Utc>) -> Option<Duration> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        let at_utc = at.with_timezone(&Utc);
        return Some(duration_until(at_utc, now));
    }
    None
}

/// `RateLimit-Reset` is already expressed as seconds-until-reset.
fn parse_seconds_until(value: Option<&str>) -> Option<Duration> {
    let seconds: u64 = value?.trim().parse().ok()?;
    Some(Duration::from_secs(seconds))
}

/// `X-RateLimit-Reset` is an absolute epoch-seconds timestamp; convert to a
/// delta against `now`.
fn parse_epoch_seconds(value: Option<&str>, now: DateTime<Utc>) -> Option<Duration> {
    let epoch_secs: i64 = value?.trim().parse().ok()?;
    let at = DateTime::<Utc>::from_timestamp(epoch_secs, 0)?;
    Some(duration_until(at, now))
}

fn duration_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let delta = at.signed_duration_since(now);
    delta.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn retry_after_seconds_wins_over_everything() {
        let headers = RetryHeaders {
            retry_after: Some("5"),
            rate_limit_reset: Some("100"),
            x_rate_limit_reset: Some("999999999999"),
        };
        let delay = select_retry_delay(&headers, at(1000));
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(5250));
    }

    #[test]
    fn rate_limit_reset_used_when_retry_after_absent() {
        let headers = RetryHeaders {
            retry_after: None,
            rate_limit_reset: Some("10"),
            x_rate_limit_reset: Some("99999"),
        };
        let delay = select_retry_delay(&headers, at(1000));
        assert!(delay >= Duration::from_secs(10));
        assert!(delay <= Duration::from_millis(10250));
    }

    #[test]
    fn x_rate_limit_reset_is_absolute_epoch() {
        let headers = RetryHeaders {
            retry_after: None,
            rate_limit_reset: None,
            x_rate_limit_reset: Some("1100"),
        };
        let delay = select_retry_delay(&headers, at(1000));
        assert!(delay >= Duration::from_secs(100));
        assert!(delay <= Duration::from_millis(100250));
    }

    #[test]
    fn default_is_one_second_when_no_headers() {
        let headers = RetryHeaders::default();
        let delay = select_retry_delay(&headers, at(1000));
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1250));
    }

    #[test]
    fn retry_after_rfc1123_timestamp() {
        let headers = RetryHeaders {
            retry_after: Some("Thu, 01 Jan 1970 00:16:40 GMT"),
            rate_limit_reset: None,
            x_rate_limit_reset: None,
        };
        let delay = select_retry_delay(&headers, at(1000));
        assert!(delay <= Duration::from_millis(250));
    }
}
