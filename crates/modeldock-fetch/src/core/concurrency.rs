/// Concurrency level for newly launched chunk fetches.
///
/// Starts at 3 and steps down as the observed failure ratio crosses 10% and
/// 30%. Counters are attempt-scoped (retries count), so a flaky link
/// throttles the whole task group rather than a single chunk.
pub fn concurrency_level(attempted: u64, failed: u64) -> usize {
    if attempted == 0 {
        return 3;
    }
    let ratio = failed as f64 / attempted as f64;
    if ratio <= 0.10 {
        3
    } else if ratio <= 0.30 {
        2
    } else {
        1
    }
}
