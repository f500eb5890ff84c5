use rand::Rng;

use crate::jobs::error_codes::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// base * 2^(attempt-1)
    #[default]
    Exponential,
    /// base, every time
    Fixed,
}

impl std::str::FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exponential" | "exp" => Ok(Backoff::Exponential),
            "fixed" => Ok(Backoff::Fixed),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub backoff: Backoff,
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential,
            base_seconds: 2,
            max_seconds: 15 * 60,
            jitter_pct: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

pub fn classify_error(code: &str) -> ErrorClass {
    match ErrorCode::from_str(code) {
        ErrorCode::BadPayload | ErrorCode::UnknownTaskKind => ErrorClass::NonRetryable,
        _ => ErrorClass::Retryable,
    }
}

/// Delay before the job becomes eligible again after failing attempt `attempt_no` (1-based).
pub fn next_delay_seconds(attempt_no: i32, cfg: &RetryConfig, rng: &mut impl Rng) -> i64 {
    let attempt_no = attempt_no.max(1) as u32;
    let base = cfg.base_seconds.max(0);
    let max = cfg.max_seconds.max(0);

    let delay = match cfg.backoff {
        Backoff::Fixed => base,
        Backoff::Exponential => {
            let exp = attempt_no.saturating_sub(1);
            // overflow: treat multiplier as huge and let the cap handle it
            let pow2 = if exp < 62 { 1_i64 << exp } else { i64::MAX };
            base.saturating_mul(pow2)
        }
    }
    .min(max);

    if cfg.jitter_pct <= 0.0 || delay == 0 {
        return delay;
    }

    // jitter in range [-jitter_pct, +jitter_pct]
    let jitter_range = (delay as f64) * cfg.jitter_pct;
    let jitter = rng.gen_range(-jitter_range..=jitter_range);

    let jittered = (delay as f64 + jitter).round() as i64;
    jittered.clamp(0, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn no_jitter(backoff: Backoff) -> RetryConfig {
        RetryConfig {
            backoff,
            base_seconds: 2,
            max_seconds: 60,
            jitter_pct: 0.0,
        }
    }

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let cfg = no_jitter(Backoff::Exponential);
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<i64> = (1..=7)
            .map(|n| next_delay_seconds(n, &cfg, &mut rng))
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn fixed_backoff_is_flat() {
        let cfg = no_jitter(Backoff::Fixed);
        let mut rng = StdRng::seed_from_u64(7);
        for n in 1..5 {
            assert_eq!(next_delay_seconds(n, &cfg, &mut rng), 2);
        }
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let cfg = no_jitter(Backoff::Exponential);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(next_delay_seconds(i32::MAX, &cfg, &mut rng), 60);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let cfg = RetryConfig {
            jitter_pct: 0.5,
            ..no_jitter(Backoff::Fixed)
        };
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let d = next_delay_seconds(3, &cfg, &mut rng);
            assert!((1..=3).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn payload_errors_are_not_retried() {
        assert_eq!(classify_error("BAD_PAYLOAD"), ErrorClass::NonRetryable);
        assert_eq!(classify_error("UNKNOWN_TASK_KIND"), ErrorClass::NonRetryable);
        assert_eq!(classify_error("TIMEOUT"), ErrorClass::Retryable);
        assert_eq!(classify_error("SOMETHING_NEW"), ErrorClass::Retryable);
    }
}
