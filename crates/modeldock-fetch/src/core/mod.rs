//! Pure transformations: no I/O, no shared state.

mod concurrency;
mod estimate;
mod retry;

pub use concurrency::concurrency_level;
pub use estimate::{estimated_total, eta_seconds, fetch_percentage, phase_percentage};
pub use retry::retry_delay;
