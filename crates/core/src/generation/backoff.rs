use std::thread;
use std::time::Duration;

/// Wait applied after failed attempt `attempt` (1-based): `2^(attempt-1)` seconds.
pub fn backoff_delay(attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as u32;
    Duration::from_secs(1u64 << exponent)
}

pub trait Backoff: Send + Sync {
    fn wait(&self, delay: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadBackoff;

impl Backoff for ThreadBackoff {
    fn wait(&self, delay: Duration) {
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
    }
}
