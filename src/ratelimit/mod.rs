//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod limiter;
mod sweeper;

pub use bucket::Bucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{Decision, LimiterConfig, RateLimitInfo, SlidingWindowLimiter};
pub use sweeper::Sweeper;
