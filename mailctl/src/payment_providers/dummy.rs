//! Dummy payment provider
//!
//! Sessions are kept in memory and every session is immediately paid. Useful for development and
//! tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::payment_providers::{CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider, PaymentSession, Result};

#[derive(Clone, Default)]
pub struct DummyProvider {
    sessions: Arc<DashMap<String, PaymentSession>>,
}

impl DummyProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let session_id = format!("dummy_session_{}", uuid::Uuid::new_v4().simple());
        self.sessions.insert(
            session_id.clone(),
            PaymentSession {
                session_id: session_id.clone(),
                user_id: request.user_id,
                item: request.item.clone(),
                amount: request.amount,
                coupon_code: request.coupon_code.clone(),
                is_paid: true,
            },
        );
        tracing::info!(session_id = %session_id, user_id = %request.user_id, amount = %request.amount, "Dummy provider created checkout session");

        Ok(CheckoutSession {
            checkout_url: format!("/billing/success?session_id={session_id}"),
            session_id,
        })
    }

    async fn get_payment_session(&self, session_id: &str) -> Result<PaymentSession> {
        self.sessions
            .get(session_id)
            .map(|session| session.clone())
            .ok_or_else(|| PaymentError::SessionNotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_providers::CheckoutItem;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sessions_are_paid_immediately() {
        let provider = DummyProvider::new();
        let user_id = Uuid::new_v4();
        let session = provider
            .create_checkout_session(&CheckoutRequest {
                user_id,
                item: CheckoutItem::Credits {
                    package_id: "credits-1k".to_string(),
                },
                amount: Decimal::new(1000, 2),
                currency: "usd".to_string(),
                description: "1,000 credits".to_string(),
                coupon_code: None,
            })
            .await
            .unwrap();
        assert!(session.session_id.starts_with("dummy_session_"));
        assert!(session.checkout_url.contains(&session.session_id));

        let fetched = provider.get_payment_session(&session.session_id).await.unwrap();
        assert!(fetched.is_paid);
        assert_eq!(fetched.user_id, user_id);
        assert_eq!(fetched.amount, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let provider = DummyProvider::new();
        assert!(matches!(
            provider.get_payment_session("cs_missing").await,
            Err(PaymentError::SessionNotFound(_))
        ));
    }
}
