use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// What the booking flow needs from a checkout provider: one line item
/// (the tour), the purchasing user, and redirect URLs.
pub struct CheckoutRequest {
    pub tour_id: String,
    pub tour_name: String,
    pub tour_summary: String,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Payment collaborator. Handlers depend on this trait only; the concrete
/// provider integration lives behind it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> anyhow::Result<CheckoutSession>;
}

/// Development gateway: mints a session id locally and points the redirect
/// URL at the success page, skipping any external call.
pub struct DevPaymentGateway;

#[async_trait]
impl PaymentGateway for DevPaymentGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> anyhow::Result<CheckoutSession> {
        let id = format!("cs_dev_{}", Uuid::new_v4().simple());
        info!(
            session = %id,
            tour = %request.tour_name,
            amount_cents = request.amount_cents,
            customer = %request.customer_email,
            "created dev checkout session"
        );
        Ok(CheckoutSession {
            id,
            url: request.success_url,
            amount_cents: request.amount_cents,
            currency: request.currency,
        })
    }
}
