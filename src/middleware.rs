use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Baseline HTTP hardening headers, applied to every response.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// Fixed-window request counter keyed by client IP. A window starts on the
/// first hit and resets once it is older than the configured duration.
/// Stale windows are swept out periodically so the map stays bounded by the
/// number of clients seen in the last window, not over the process lifetime.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: DashMap<String, Window>,
    last_sweep: Mutex<Instant>,
}

#[derive(Clone, Copy)]
struct Window {
    count: u32,
    started_at: Instant,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            windows: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Counts a request against `key`. Returns the remaining allowance, or
    /// `None` once the window is exhausted.
    pub fn hit(&self, key: &str) -> Option<u32> {
        self.hit_at(key, Instant::now())
    }

    fn hit_at(&self, key: &str, now: Instant) -> Option<u32> {
        self.sweep_at(now);
        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started_at: now,
        });
        if now.duration_since(window.started_at) >= self.window {
            window.count = 0;
            window.started_at = now;
        }
        if window.count >= self.max {
            return None;
        }
        window.count += 1;
        Some(self.max - window.count)
    }

    /// Drops every expired window. Runs at most once per window length, and
    /// never while another request is already sweeping. Must be called before
    /// taking any map entry, as `retain` locks the shards.
    fn sweep_at(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last) < self.window {
            return;
        }
        *last = now;
        self.windows
            .retain(|_, window| now.duration_since(window.started_at) < self.window);
    }
}

pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_ip(&req, state.config.trust_proxy);
    let Some(remaining) = state.limiter.hit(&key) else {
        return Err(AppError::RateLimited);
    };

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&state.limiter.max().to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    Ok(response)
}

/// Client identity for rate limiting: normally the peer address. The first
/// `X-Forwarded-For` hop is used only when the deployment declares a trusted
/// proxy in front, since anyone can send that header.
fn client_ip(req: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn allows_up_to_max_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(3600));
        let now = Instant::now();

        assert_eq!(limiter.hit_at("1.2.3.4", now), Some(2));
        assert_eq!(limiter.hit_at("1.2.3.4", now), Some(1));
        assert_eq!(limiter.hit_at("1.2.3.4", now), Some(0));
        assert_eq!(limiter.hit_at("1.2.3.4", now), None);
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(limiter.hit_at("1.2.3.4", start), Some(0));
        assert_eq!(limiter.hit_at("1.2.3.4", start), None);

        let later = start + Duration::from_secs(61);
        assert_eq!(limiter.hit_at("1.2.3.4", later), Some(0));
    }

    #[test]
    fn keys_are_counted_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.hit_at("1.2.3.4", now), Some(0));
        assert_eq!(limiter.hit_at("5.6.7.8", now), Some(0));
        assert_eq!(limiter.hit_at("1.2.3.4", now), None);
    }

    #[test]
    fn expired_windows_are_swept_out() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        for i in 0..100 {
            limiter.hit_at(&format!("198.51.100.{i}"), start);
        }
        assert_eq!(limiter.windows.len(), 100);

        // The first hit after a full window drops every stale entry, so a
        // flood of one-off keys cannot grow the map forever.
        let later = start + Duration::from_secs(61);
        assert_eq!(limiter.hit_at("203.0.113.1", later), Some(0));
        assert_eq!(limiter.windows.len(), 1);
    }

    #[test]
    fn forwarded_header_counts_only_behind_a_trusted_proxy() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        // Without a declared proxy the header is attacker-controlled noise,
        // so every such request shares the fallback key.
        assert_eq!(client_ip(&req, false), "unknown");
        assert_eq!(client_ip(&req, true), "203.0.113.9");
    }
}
