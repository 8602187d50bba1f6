use rand::Rng;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// jittered by ±50% so a burst of failures does not retry in lockstep.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let nominal = base.as_millis() as u64 * 2u64.pow(exp);
    let factor = rand::thread_rng().gen_range(0.5..=1.5);
    Duration::from_millis((nominal as f64 * factor) as u64)
}
