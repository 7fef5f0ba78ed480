use axum::extract::ConnectInfo;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DashMapStateStore};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

// Keyed by client IP. X-Forwarded-For wins when a reverse proxy fronts us.
type IpRateLimiter = RateLimiter<std::net::IpAddr, DashMapStateStore<std::net::IpAddr>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub limiter: Arc<IpRateLimiter>,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        let enabled =
            std::env::var("RATE_LIMIT_ENABLED").unwrap_or_else(|_| "true".into()) == "true";

        let rps = std::env::var("RATE_LIMIT_RPS")
            .unwrap_or_else(|_| "100".into())
            .parse::<u32>()
            .unwrap_or(100);

        let burst = std::env::var("RATE_LIMIT_BURST")
            .unwrap_or_else(|_| "200".into())
            .parse::<u32>()
            .unwrap_or(200);

        let quota = Quota::per_second(NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));

        let limiter = Arc::new(RateLimiter::keyed(quota));

        tracing::info!(enabled, rps, burst, "rate limiting configured");

        Self { limiter, enabled }
    }
}

pub async fn rate_limit_middleware(
    State(config): State<RateLimitConfig>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !config.enabled {
        return Ok(next.run(req).await);
    }

    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<std::net::IpAddr>().ok());

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());

    // In-process test drivers have neither; let those pass.
    let ip = match forwarded.or(peer) {
        Some(ip) => ip,
        None => return Ok(next.run(req).await),
    };

    if config.limiter.check_key(&ip).is_err() {
        warn!(%ip, "rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}
