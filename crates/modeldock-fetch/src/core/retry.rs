use std::time::Duration;

/// Delay before retry `k` (1-indexed): `base * 2^k`, saturating on
/// overflow.
pub fn retry_delay(retry: u32, base: Duration) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(retry))
}
