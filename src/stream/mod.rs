//! Stream combinators for consuming simulator updates.

mod rate;

pub use rate::{RateLimit, RateLimitExt};
