//! Payment provider abstraction.
//!
//! A provider creates hosted checkout sessions and reports whether a session has been paid.
//! Applying a paid session to the ledger is the billing service's job, so providers never touch
//! credits.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::types::{PlanId, UserId};

pub mod dummy;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("checkout session {0} not found")]
    SessionNotFound(String),

    #[error("checkout session {0} has not been paid")]
    NotPaid(String),

    #[error("payment provider API error: {0}")]
    Provider(#[from] anyhow::Error),
}

/// What a checkout session is buying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckoutItem {
    Plan {
        #[schema(value_type = String, format = "uuid")]
        plan_id: PlanId,
    },
    Credits { package_id: String },
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub item: CheckoutItem,
    /// Price after any coupon discount
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub checkout_url: String,
}

/// A session as reported back by the provider.
#[derive(Debug, Clone)]
pub struct PaymentSession {
    pub session_id: String,
    pub user_id: UserId,
    pub item: CheckoutItem,
    pub amount: Decimal,
    pub coupon_code: Option<String>,
    pub is_paid: bool,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    async fn get_payment_session(&self, session_id: &str) -> Result<PaymentSession>;
}
