//! Purchases: plan checkout, credit packages, coupon evaluation and payment verification.
//!
//! Checkout only prices the purchase and opens a provider session. Nothing touches the ledger
//! until [`BillingService::verify`] sees a paid session, and each session is applied at most once.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::config::{BillingConfig, CreditPackage};
use crate::coupons::{self, Evaluation, PurchaseContext};
use crate::db::{
    Database,
    errors::DbError,
    handlers::{Coupons, Payments, Plans, Repository, Transactions},
    models::{
        payments::ProcessedPayment,
        plans::{PlanDBResponse, PlanFilter},
        transactions::{TransactionDBResponse, TransactionFilter},
    },
};
use crate::errors::{Error, Result};
use crate::ledger::Ledger;
use crate::payment_providers::{CheckoutItem, CheckoutRequest, PaymentError, PaymentProvider, PaymentSession};
use crate::types::{Credits, PlanId, UserId, abbrev_uuid};

/// A priced checkout ready for payment.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Checkout {
    pub session_id: String,
    pub checkout_url: String,
    pub item: CheckoutItem,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub amount: Decimal,
    pub bonus_credits: Credits,
    pub currency: String,
}

/// Outcome of verifying a checkout session.
#[derive(Debug, Clone)]
pub struct Verification {
    pub payment: ProcessedPayment,
    pub transaction: TransactionDBResponse,
    /// False when the session had already been applied by an earlier call
    pub newly_processed: bool,
}

#[derive(Clone)]
pub struct BillingService {
    db: Database,
    ledger: Ledger,
    provider: Arc<dyn PaymentProvider>,
    config: BillingConfig,
}

impl BillingService {
    pub fn new(db: Database, ledger: Ledger, provider: Arc<dyn PaymentProvider>, config: BillingConfig) -> Self {
        Self {
            db,
            ledger,
            provider,
            config,
        }
    }

    pub fn plans(&self) -> Result<Vec<PlanDBResponse>> {
        Ok(Plans::new(&self.db).list(&PlanFilter { active_only: true })?)
    }

    pub fn packages(&self) -> &[CreditPackage] {
        &self.config.credit_packages
    }

    fn active_plan(&self, plan_id: PlanId) -> Result<PlanDBResponse> {
        Plans::new(&self.db)
            .get_by_id(plan_id)?
            .filter(|plan| plan.is_active)
            .ok_or_else(|| Error::NotFound {
                resource: "Plan".to_string(),
                id: plan_id.to_string(),
            })
    }

    fn package(&self, package_id: &str) -> Result<CreditPackage> {
        self.config
            .credit_packages
            .iter()
            .find(|p| p.id == package_id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                resource: "Credit package".to_string(),
                id: package_id.to_string(),
            })
    }

    /// Evaluate `code` for `user_id` without side effects.
    pub fn validate_coupon(&self, user_id: UserId, code: &str, ctx: &PurchaseContext) -> Result<Evaluation> {
        let coupons = Coupons::new(&self.db);
        let coupon = coupons.get_by_code(code)?.ok_or_else(|| Error::NotFound {
            resource: "Coupon".to_string(),
            id: coupons::normalize_code(code),
        })?;
        let used = coupons.user_redemptions(coupon.id, user_id);
        Ok(coupons::evaluate(&coupon, ctx, used, Utc::now()))
    }

    async fn open_session(
        &self,
        user_id: UserId,
        item: CheckoutItem,
        ctx: PurchaseContext,
        description: String,
        coupon_code: Option<&str>,
    ) -> Result<Checkout> {
        let evaluation = match coupon_code {
            Some(code) => {
                let evaluation = self.validate_coupon(user_id, code, &ctx)?;
                if let Some(reason) = &evaluation.reason {
                    return Err(Error::BadRequest { message: reason.to_string() });
                }
                evaluation
            }
            None => Evaluation {
                eligible: true,
                reason: None,
                original_amount: ctx.amount,
                discount_amount: Decimal::ZERO,
                adjusted_amount: ctx.amount,
                bonus_credits: 0,
            },
        };

        let session = self
            .provider
            .create_checkout_session(&CheckoutRequest {
                user_id,
                item: item.clone(),
                amount: evaluation.adjusted_amount,
                currency: self.config.currency.clone(),
                description,
                coupon_code: coupon_code.map(coupons::normalize_code),
            })
            .await?;

        Ok(Checkout {
            session_id: session.session_id,
            checkout_url: session.checkout_url,
            item,
            original_amount: evaluation.original_amount,
            discount_amount: evaluation.discount_amount,
            amount: evaluation.adjusted_amount,
            bonus_credits: evaluation.bonus_credits,
            currency: self.config.currency.clone(),
        })
    }

    /// Start a plan purchase. An ineligible coupon is rejected before any session is created.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn checkout(&self, user_id: UserId, plan_id: PlanId, coupon_code: Option<&str>) -> Result<Checkout> {
        let plan = self.active_plan(plan_id)?;
        let ctx = PurchaseContext {
            amount: plan.price,
            plan: Some(plan.name.clone()),
        };
        self.open_session(user_id, CheckoutItem::Plan { plan_id }, ctx, format!("{} plan", plan.name), coupon_code)
            .await
    }

    /// Start a credit package purchase.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn buy_credits(&self, user_id: UserId, package_id: &str, coupon_code: Option<&str>) -> Result<Checkout> {
        let package = self.package(package_id)?;
        let ctx = PurchaseContext {
            amount: package.price,
            plan: None,
        };
        let item = CheckoutItem::Credits {
            package_id: package.id.clone(),
        };
        self.open_session(user_id, item, ctx, package.name.clone(), coupon_code).await
    }

    /// Apply a paid session to the ledger, exactly once.
    ///
    /// Verifying an already applied session returns the original transaction.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn verify(&self, user_id: UserId, session_id: &str) -> Result<Verification> {
        let session = match self.provider.get_payment_session(session_id).await {
            Ok(session) if session.user_id == user_id => session,
            Ok(_) => return Err(PaymentError::SessionNotFound(session_id.to_string()).into()),
            Err(e) => return Err(e.into()),
        };
        if !session.is_paid {
            return Err(PaymentError::NotPaid(session_id.to_string()).into());
        }

        let (payment, newly_processed) = Payments::new(&self.db).process_once(session_id, || self.apply(&session))?;
        let transaction = Transactions::new(&self.db)
            .get_by_id(payment.transaction_id)?
            .ok_or_else(|| Error::Internal {
                operation: format!("load transaction for session {session_id}"),
            })?;
        Ok(Verification {
            payment,
            transaction,
            newly_processed,
        })
    }

    fn apply(&self, session: &PaymentSession) -> Result<ProcessedPayment> {
        let now = Utc::now();
        let (ctx, plan, package) = match &session.item {
            CheckoutItem::Plan { plan_id } => {
                let plan = Plans::new(&self.db).get_by_id(*plan_id)?.ok_or_else(|| Error::NotFound {
                    resource: "Plan".to_string(),
                    id: plan_id.to_string(),
                })?;
                let ctx = PurchaseContext {
                    amount: plan.price,
                    plan: Some(plan.name.clone()),
                };
                (ctx, Some(plan), None)
            }
            CheckoutItem::Credits { package_id } => {
                let package = self.package(package_id)?;
                let ctx = PurchaseContext {
                    amount: package.price,
                    plan: None,
                };
                (ctx, None, Some(package))
            }
        };

        let mut bonus_credits = 0;
        let mut coupon_code = None;
        if let Some(code) = &session.coupon_code {
            match Coupons::new(&self.db).redeem(code, session.user_id, &ctx, &session.session_id, now) {
                Ok(redemption) => {
                    bonus_credits = redemption.evaluation.bonus_credits;
                    coupon_code = Some(redemption.code);
                }
                // The customer has paid; honour the purchase without the coupon
                Err(e @ (DbError::CheckViolation { .. } | DbError::NotFound)) => {
                    warn!(session_id = %session.session_id, code = %code, error = %e, "Coupon no longer redeemable at payment time");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let transaction = match (plan, package) {
            (Some(plan), _) => self.ledger.subscribe(
                session.user_id,
                &plan,
                bonus_credits,
                session.amount,
                Some(session.session_id.clone()),
                None,
                now,
            )?,
            (None, Some(package)) => self.ledger.credit_purchase(
                session.user_id,
                package.credits + bonus_credits,
                session.amount,
                package.name.clone(),
                Some(session.session_id.clone()),
            )?,
            (None, None) => {
                return Err(Error::Internal {
                    operation: "resolve checkout item".to_string(),
                });
            }
        };

        info!(
            session_id = %session.session_id,
            credits_added = transaction.credits_added,
            bonus_credits,
            "Applied payment"
        );
        Ok(ProcessedPayment {
            session_id: session.session_id.clone(),
            user_id: session.user_id,
            transaction_id: transaction.id,
            credits_added: transaction.credits_added,
            bonus_credits,
            coupon_code,
            processed_at: now,
        })
    }

    pub fn transactions(&self, filter: &TransactionFilter) -> Result<(Vec<TransactionDBResponse>, i64)> {
        let transactions = Transactions::new(&self.db);
        Ok((transactions.list(filter)?, transactions.count(filter)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupons::DiscountType;
    use crate::db::models::coupons::{CouponCreateDBRequest, CouponUpdateDBRequest};
    use crate::db::models::plans::PlanCreateDBRequest;
    use crate::payment_providers::dummy::DummyProvider;
    use uuid::Uuid;

    struct Fixture {
        db: Database,
        billing: BillingService,
        user: UserId,
        plan: PlanDBResponse,
    }

    fn fixture() -> Fixture {
        let db = Database::new();
        let ledger = Ledger::new(db.clone());
        let user = Uuid::new_v4();
        ledger.open_account(user, None).unwrap();
        let plan = Plans::new(&db)
            .create(&PlanCreateDBRequest {
                name: "Pro".to_string(),
                description: None,
                price: Decimal::from(100),
                credits_limit: 5_000,
                billing_period_days: 30,
                is_active: true,
            })
            .unwrap();
        let billing = BillingService::new(db.clone(), ledger, Arc::new(DummyProvider::new()), BillingConfig::default());
        Fixture { db, billing, user, plan }
    }

    fn coupon(db: &Database, code: &str, discount_type: DiscountType, value: i64, max_uses: Option<u32>) {
        Coupons::new(db)
            .create(&CouponCreateDBRequest {
                code: code.to_string(),
                description: None,
                discount_type,
                discount_value: Decimal::from(value),
                max_discount: Some(Decimal::from(10)),
                min_purchase_amount: Decimal::ZERO,
                max_uses,
                max_uses_per_user: 1,
                starts_at: Utc::now() - chrono::Duration::days(1),
                expires_at: None,
                is_active: true,
                applicable_plans: vec![],
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_checkout_applies_coupon_price() {
        let f = fixture();
        coupon(&f.db, "SAVE20", DiscountType::Percentage, 20, None);
        let checkout = f.billing.checkout(f.user, f.plan.id, Some("save20")).await.unwrap();
        assert_eq!(checkout.original_amount, Decimal::from(100));
        assert_eq!(checkout.amount, Decimal::from(90));
    }

    #[tokio::test]
    async fn test_ineligible_coupon_rejected_at_checkout() {
        let f = fixture();
        coupon(&f.db, "GONE", DiscountType::Fixed, 5, Some(1));
        let id = Coupons::new(&f.db).get_by_code("GONE").unwrap().unwrap().id;
        Coupons::new(&f.db)
            .update(
                id,
                &CouponUpdateDBRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        let err = f.billing.checkout(f.user, f.plan.id, Some("GONE")).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_verify_subscribes_once() {
        let f = fixture();
        coupon(&f.db, "BONUS", DiscountType::Credits, 250, None);
        let checkout = f.billing.checkout(f.user, f.plan.id, Some("BONUS")).await.unwrap();

        let first = f.billing.verify(f.user, &checkout.session_id).await.unwrap();
        assert!(first.newly_processed);
        assert_eq!(first.payment.bonus_credits, 250);
        assert_eq!(f.billing.ledger.balance(f.user).unwrap().balance, 5_250);

        let second = f.billing.verify(f.user, &checkout.session_id).await.unwrap();
        assert!(!second.newly_processed);
        assert_eq!(second.transaction.id, first.transaction.id);
        assert_eq!(f.billing.ledger.balance(f.user).unwrap().balance, 5_250);

        let coupon = Coupons::new(&f.db).get_by_code("BONUS").unwrap().unwrap();
        assert_eq!(coupon.current_uses, 1);
    }

    #[tokio::test]
    async fn test_coupon_race_still_credits_purchase() {
        let f = fixture();
        coupon(&f.db, "LATE", DiscountType::Credits, 100, None);
        let checkout = f.billing.buy_credits(f.user, "credits-1k", Some("LATE")).await.unwrap();

        let coupons = Coupons::new(&f.db);
        let id = coupons.get_by_code("LATE").unwrap().unwrap().id;
        coupons
            .update(
                id,
                &CouponUpdateDBRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        let verification = f.billing.verify(f.user, &checkout.session_id).await.unwrap();
        assert_eq!(verification.payment.bonus_credits, 0);
        assert_eq!(verification.transaction.credits_added, 1_000);
        assert_eq!(f.billing.ledger.balance(f.user).unwrap().purchased_credits, 1_000);
    }

    #[tokio::test]
    async fn test_other_users_cannot_verify_session() {
        let f = fixture();
        let checkout = f.billing.buy_credits(f.user, "credits-1k", None).await.unwrap();
        let err = f.billing.verify(Uuid::new_v4(), &checkout.session_id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_validate_coupon_has_no_side_effects() {
        let f = fixture();
        coupon(&f.db, "ONCE", DiscountType::Fixed, 5, Some(1));
        let ctx = PurchaseContext {
            amount: Decimal::from(20),
            plan: None,
        };
        for _ in 0..3 {
            let evaluation = f.billing.validate_coupon(f.user, "once", &ctx).unwrap();
            assert!(evaluation.eligible);
            assert_eq!(evaluation.adjusted_amount, Decimal::from(15));
        }
        assert!(matches!(
            f.billing.validate_coupon(f.user, "missing", &ctx),
            Err(Error::NotFound { .. })
        ));
    }
}
