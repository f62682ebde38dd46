use std::thread;
use std::time::Duration;

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AdapterError;

/// Transport-level retry for rate-limited requests only. Other failures are
/// returned on the first occurrence.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl RateLimitPolicy {
    pub const fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Server-advised `retryDelay` plus five seconds, otherwise
    /// `base_delay * 2^attempt`.
    pub fn delay_for(&self, err: &AdapterError, attempt: usize) -> Option<Duration> {
        if !err.is_rate_limited() {
            return None;
        }
        if let AdapterError::HttpStatus { body, .. } = err {
            if let Some(secs) = parse_retry_delay(body) {
                return Some(Duration::from_secs(secs + 5));
            }
        }
        let multiplier = 1u32.checked_shl(attempt as u32).unwrap_or(1);
        self.base_delay
            .checked_mul(multiplier)
            .or(Some(self.base_delay))
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(5),
        }
    }
}

pub fn call_with_rate_limit_retry<F, T>(
    provider: &str,
    policy: &RateLimitPolicy,
    sleep: impl Fn(Duration),
    mut f: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Result<T, AdapterError>,
{
    let mut attempt = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(delay) = policy.delay_for(&err, attempt) else {
                    return Err(err);
                };
                if attempt >= policy.max_retries {
                    return Err(AdapterError::retry_exhausted(attempt + 1, err));
                }
                attempt += 1;
                warn!(
                    "{provider} rate limit encountered, retrying in {:?} (retry {}/{})",
                    delay, attempt, policy.max_retries
                );
                sleep(delay);
            }
        }
    }
}

pub fn thread_sleep(delay: Duration) {
    thread::sleep(delay);
}

pub(crate) fn parse_retry_delay(body: &str) -> Option<u64> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(details) = value
            .get("error")
            .and_then(|v| v.get("details"))
            .and_then(|v| v.as_array())
        {
            for detail in details {
                if let Some(delay) = detail
                    .get("retryDelay")
                    .or_else(|| detail.get("retry_delay"))
                {
                    if let Some(parsed) = parse_delay_value(delay) {
                        return Some(parsed);
                    }
                }
            }
        }
    }

    static RETRY_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)retry[_ -]?(?:delay|after)[^0-9]*(\d+)")
            .expect("valid regex for retry delay")
    });

    RETRY_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|matched| matched.as_str().parse::<u64>().ok())
}

fn parse_delay_value(value: &serde_json::Value) -> Option<u64> {
    if let Some(number) = value.as_u64() {
        return Some(number);
    }

    value
        .as_str()
        .and_then(|text| text.trim_end_matches('s').parse::<u64>().ok())
}
