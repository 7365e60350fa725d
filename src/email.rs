use async_trait::async_trait;
use tracing::info;

/// Outbound mail collaborator. The password-reset flow only ever talks to
/// this trait; swapping in a real SMTP/API transport is a deployment concern.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Development transport: logs the message instead of delivering it, so the
/// reset URL shows up in the server output.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        info!(from = %self.from, to = %to, subject = %subject, body = %body, "outbound email");
        Ok(())
    }
}
