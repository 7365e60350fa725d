use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_name: String,
    pub env: String,
    pub email_from: String,
    /// Honor `X-Forwarded-For` for client identity. Off unless the app
    /// actually sits behind a proxy, since the header is client-writable.
    pub trust_proxy: bool,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let database_name =
            std::env::var("DATABASE_NAME").unwrap_or_else(|_| "wayfare".into());
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".into());
        let email_from =
            std::env::var("EMAIL_FROM").unwrap_or_else(|_| "hello@wayfare.io".into());
        let trust_proxy = std::env::var("TRUST_PROXY")
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "wayfare".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "wayfare-users".into()),
            // Sessions are long-lived; the cookie carries the same lifetime.
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 90),
        };
        let rate_limit = RateLimitConfig {
            max_requests: std::env::var("RATE_LIMIT_MAX")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(100),
            window_secs: std::env::var("RATE_LIMIT_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60 * 60),
        };
        Ok(Self {
            database_url,
            database_name,
            env,
            email_from,
            trust_proxy,
            jwt,
            rate_limit,
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}
