use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

pub const REQUESTS_PER_MINUTE: u32 = 60;
pub const TASK_REQUESTS_PER_MINUTE: u32 = 10;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub general_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    pub task_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        let general_quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap());
        let task_quota = Quota::per_minute(NonZeroU32::new(TASK_REQUESTS_PER_MINUTE).unwrap());
        Self {
            general_limiter: Arc::new(RateLimiter::direct(general_quota)),
            task_limiter: Arc::new(RateLimiter::direct(task_quota)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Global (not per-IP) token-bucket limiter; task creation gets its own
/// tighter quota on top of the general one.
pub async fn rate_limit_middleware(axum::extract::State(limits): axum::extract::State<Arc<RateLimitConfig>>, request: Request, next: Next) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();
    let is_task_create = path == "/api/tasks" && request.method() == "POST";

    if limits.general_limiter.check().is_err() {
        warn!(path, "general rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    if is_task_create && limits.task_limiter.check().is_err() {
        warn!(path, "task creation rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}
