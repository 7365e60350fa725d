use crate::config::AppConfig;
use crate::email::{LogMailer, Mailer};
use crate::middleware::RateLimiter;
use crate::payments::{DevPaymentGateway, PaymentGateway};
use anyhow::Context;
use mongodb::bson::doc;
use mongodb::{Client, Database};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
    pub payments: Arc<dyn PaymentGateway>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let client = Client::with_uri_str(&config.database_url)
            .await
            .context("invalid DATABASE_URL")?;
        let db = client.database(&config.database_name);

        // The driver connects lazily; ping now so an unreachable store
        // fails startup instead of the first request.
        db.run_command(doc! { "ping": 1 })
            .await
            .context("database unreachable")?;

        let mailer = Arc::new(LogMailer::new(config.email_from.clone())) as Arc<dyn Mailer>;
        let payments = Arc::new(DevPaymentGateway) as Arc<dyn PaymentGateway>;

        Ok(Self::from_parts(db, config, mailer, payments))
    }

    pub fn from_parts(
        db: Database,
        config: Arc<AppConfig>,
        mailer: Arc<dyn Mailer>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_requests,
            std::time::Duration::from_secs(config.rate_limit.window_secs),
        ));
        Self {
            db,
            config,
            mailer,
            payments,
            limiter,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use mongodb::options::{ClientOptions, ServerAddress};

        // Never contacted by unit tests; the client only dials on first use.
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: "localhost".into(),
                port: Some(27017),
            }])
            .build();
        let client = Client::with_options(options).expect("client options ok");
        let db = client.database("wayfare_test");

        let config = Arc::new(AppConfig {
            database_url: "mongodb://localhost:27017".into(),
            database_name: "wayfare_test".into(),
            env: "test".into(),
            email_from: "test@wayfare.io".into(),
            trust_proxy: false,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 5,
            },
            rate_limit: crate::config::RateLimitConfig {
                max_requests: 100,
                window_secs: 3600,
            },
        });

        let mailer = Arc::new(LogMailer::new("test@wayfare.io")) as Arc<dyn Mailer>;
        let payments = Arc::new(DevPaymentGateway) as Arc<dyn PaymentGateway>;
        Self::from_parts(db, config, mailer, payments)
    }
}
