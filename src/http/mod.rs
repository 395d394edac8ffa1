//! HTTP glue: route scoping, client keys and rate limit headers.

mod middleware;
mod routes;
mod server;

pub use middleware::{
    rate_limit, RateLimitState, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use routes::app_router;
pub use server::HttpServer;
