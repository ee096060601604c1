//! Coupon and discount evaluation.
//!
//! [`evaluate`] is a pure function: it never mutates the coupon, so it can back both the
//! side-effect free `/billing/coupons/validate` endpoint and the checkout price computation.
//! Redemption (incrementing use counters) happens in the coupon repository once a payment has
//! settled.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::types::{CouponId, Credits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` percent off, optionally capped by `max_discount`
    Percentage,
    /// `discount_value` off the price, never below zero
    Fixed,
    /// Price unchanged, `discount_value` bonus credits granted
    Credits,
}

/// A stored coupon.
#[derive(Debug, Clone)]
pub struct Coupon {
    pub id: CouponId,
    /// Upper-cased, trimmed code
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub min_purchase_amount: Decimal,
    /// `None` means unlimited
    pub max_uses: Option<u32>,
    pub max_uses_per_user: u32,
    pub current_uses: u32,
    pub starts_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Plan names the coupon applies to. Empty means every purchase.
    pub applicable_plans: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What is being bought.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseContext {
    pub amount: Decimal,
    /// Plan name for subscriptions, `None` for credit packages
    pub plan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum IneligibleReason {
    Inactive,
    NotStarted,
    Expired,
    MaxedOut,
    UserLimitReached,
    BelowMinimum { minimum: Decimal },
    PlanNotApplicable,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::Inactive => write!(f, "Coupon is not active"),
            IneligibleReason::NotStarted => write!(f, "Coupon is not valid yet"),
            IneligibleReason::Expired => write!(f, "Coupon has expired"),
            IneligibleReason::MaxedOut => write!(f, "Coupon has reached its usage limit"),
            IneligibleReason::UserLimitReached => write!(f, "You have already used this coupon the maximum number of times"),
            IneligibleReason::BelowMinimum { minimum } => write!(f, "Coupon requires a minimum purchase of {minimum}"),
            IneligibleReason::PlanNotApplicable => write!(f, "Coupon does not apply to this purchase"),
        }
    }
}

/// Outcome of evaluating a coupon against a purchase.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Evaluation {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IneligibleReason>,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub adjusted_amount: Decimal,
    pub bonus_credits: Credits,
}

impl Evaluation {
    fn rejected(ctx: &PurchaseContext, reason: IneligibleReason) -> Self {
        Self {
            eligible: false,
            reason: Some(reason),
            original_amount: ctx.amount,
            discount_amount: Decimal::ZERO,
            adjusted_amount: ctx.amount,
            bonus_credits: 0,
        }
    }
}

/// Codes are compared case-insensitively; stored codes are upper-case.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Check the discount terms of a coupon being created or updated.
pub fn validate_terms(discount_type: DiscountType, value: Decimal, max_discount: Option<Decimal>) -> Result<(), String> {
    if value <= Decimal::ZERO {
        return Err("discount_value must be positive".to_string());
    }
    match discount_type {
        DiscountType::Percentage if value > Decimal::ONE_HUNDRED => Err("percentage discounts cannot exceed 100".to_string()),
        DiscountType::Credits if !value.fract().is_zero() => Err("credit coupons must grant a whole number of credits".to_string()),
        _ => Ok(()),
    }?;
    if let Some(cap) = max_discount
        && cap <= Decimal::ZERO
    {
        return Err("max_discount must be positive".to_string());
    }
    Ok(())
}

impl Coupon {
    /// Whether the coupon can be used by a user with `user_redemptions` prior uses, ignoring the
    /// purchase itself.
    pub fn usability(&self, user_redemptions: u32, now: DateTime<Utc>) -> Result<(), IneligibleReason> {
        if !self.is_active {
            return Err(IneligibleReason::Inactive);
        }
        if now < self.starts_at {
            return Err(IneligibleReason::NotStarted);
        }
        if self.expires_at.is_some_and(|expires| now >= expires) {
            return Err(IneligibleReason::Expired);
        }
        if self.max_uses.is_some_and(|max| self.current_uses >= max) {
            return Err(IneligibleReason::MaxedOut);
        }
        if user_redemptions >= self.max_uses_per_user {
            return Err(IneligibleReason::UserLimitReached);
        }
        Ok(())
    }

    fn applies_to(&self, plan: Option<&str>) -> bool {
        if self.applicable_plans.is_empty() {
            return true;
        }
        plan.is_some_and(|plan| self.applicable_plans.iter().any(|p| p.eq_ignore_ascii_case(plan)))
    }
}

/// Evaluate `coupon` for a purchase by a user who has redeemed it `user_redemptions` times.
pub fn evaluate(coupon: &Coupon, ctx: &PurchaseContext, user_redemptions: u32, now: DateTime<Utc>) -> Evaluation {
    if let Err(reason) = coupon.usability(user_redemptions, now) {
        return Evaluation::rejected(ctx, reason);
    }
    if ctx.amount < coupon.min_purchase_amount {
        return Evaluation::rejected(
            ctx,
            IneligibleReason::BelowMinimum {
                minimum: coupon.min_purchase_amount,
            },
        );
    }
    if !coupon.applies_to(ctx.plan.as_deref()) {
        return Evaluation::rejected(ctx, IneligibleReason::PlanNotApplicable);
    }

    let (discount_amount, bonus_credits) = match coupon.discount_type {
        DiscountType::Percentage => {
            let raw = (ctx.amount * coupon.discount_value / Decimal::ONE_HUNDRED).round_dp(2);
            let capped = coupon.max_discount.map_or(raw, |cap| raw.min(cap));
            (capped.min(ctx.amount), 0)
        }
        DiscountType::Fixed => (coupon.discount_value.min(ctx.amount), 0),
        DiscountType::Credits => (Decimal::ZERO, coupon.discount_value.trunc().to_i64().unwrap_or(0)),
    };

    Evaluation {
        eligible: true,
        reason: None,
        original_amount: ctx.amount,
        discount_amount,
        adjusted_amount: ctx.amount - discount_amount,
        bonus_credits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn coupon(discount_type: DiscountType, value: i64) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: Uuid::new_v4(),
            code: "TEST".to_string(),
            description: None,
            discount_type,
            discount_value: Decimal::from(value),
            max_discount: None,
            min_purchase_amount: Decimal::ZERO,
            max_uses: None,
            max_uses_per_user: 1,
            current_uses: 0,
            starts_at: now - Duration::days(1),
            expires_at: None,
            is_active: true,
            applicable_plans: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn purchase(amount: i64) -> PurchaseContext {
        PurchaseContext {
            amount: Decimal::from(amount),
            plan: Some("Pro".to_string()),
        }
    }

    #[test]
    fn test_percentage_capped_by_max_discount() {
        let mut c = coupon(DiscountType::Percentage, 20);
        c.code = "SAVE20".to_string();
        c.max_discount = Some(Decimal::from(10));

        let eval = evaluate(&c, &purchase(100), 0, Utc::now());
        assert!(eval.eligible);
        assert_eq!(eval.adjusted_amount, Decimal::from(90));
        assert_eq!(eval.discount_amount, Decimal::from(10));
    }

    #[test]
    fn test_percentage_without_cap() {
        let c = coupon(DiscountType::Percentage, 20);
        let eval = evaluate(&c, &purchase(100), 0, Utc::now());
        assert_eq!(eval.adjusted_amount, Decimal::from(80));
    }

    #[test]
    fn test_fixed_discount_never_below_zero() {
        let c = coupon(DiscountType::Fixed, 150);
        let eval = evaluate(&c, &purchase(100), 0, Utc::now());
        assert!(eval.eligible);
        assert_eq!(eval.adjusted_amount, Decimal::ZERO);
        assert_eq!(eval.discount_amount, Decimal::from(100));
    }

    #[test]
    fn test_credits_coupon_keeps_price_and_grants_bonus() {
        let c = coupon(DiscountType::Credits, 500);
        let eval = evaluate(&c, &purchase(25), 0, Utc::now());
        assert!(eval.eligible);
        assert_eq!(eval.adjusted_amount, Decimal::from(25));
        assert_eq!(eval.bonus_credits, 500);
    }

    #[test]
    fn test_maxed_out_coupon_is_never_eligible() {
        let mut c = coupon(DiscountType::Percentage, 10);
        c.max_uses = Some(5);
        c.current_uses = 5;
        let eval = evaluate(&c, &purchase(100), 0, Utc::now());
        assert!(!eval.eligible);
        assert_eq!(eval.reason, Some(IneligibleReason::MaxedOut));
        assert_eq!(eval.adjusted_amount, Decimal::from(100));
    }

    #[test]
    fn test_user_limit() {
        let mut c = coupon(DiscountType::Percentage, 10);
        c.max_uses_per_user = 2;
        assert!(evaluate(&c, &purchase(100), 1, Utc::now()).eligible);
        let eval = evaluate(&c, &purchase(100), 2, Utc::now());
        assert_eq!(eval.reason, Some(IneligibleReason::UserLimitReached));
    }

    #[test]
    fn test_time_window() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Fixed, 5);
        c.starts_at = now + Duration::hours(1);
        assert_eq!(evaluate(&c, &purchase(10), 0, now).reason, Some(IneligibleReason::NotStarted));

        c.starts_at = now - Duration::days(2);
        c.expires_at = Some(now - Duration::seconds(1));
        assert_eq!(evaluate(&c, &purchase(10), 0, now).reason, Some(IneligibleReason::Expired));

        c.expires_at = Some(now + Duration::days(1));
        assert!(evaluate(&c, &purchase(10), 0, now).eligible);
    }

    #[test]
    fn test_inactive_checked_first() {
        let mut c = coupon(DiscountType::Fixed, 5);
        c.is_active = false;
        c.max_uses = Some(0);
        assert_eq!(evaluate(&c, &purchase(10), 0, Utc::now()).reason, Some(IneligibleReason::Inactive));
    }

    #[test]
    fn test_minimum_purchase() {
        let mut c = coupon(DiscountType::Fixed, 5);
        c.min_purchase_amount = Decimal::from(50);
        let eval = evaluate(&c, &purchase(49), 0, Utc::now());
        assert_eq!(
            eval.reason,
            Some(IneligibleReason::BelowMinimum {
                minimum: Decimal::from(50)
            })
        );
        assert!(evaluate(&c, &purchase(50), 0, Utc::now()).eligible);
    }

    #[test]
    fn test_applicable_plans() {
        let mut c = coupon(DiscountType::Fixed, 5);
        c.applicable_plans = vec!["pro".to_string(), "Business".to_string()];
        assert!(evaluate(&c, &purchase(10), 0, Utc::now()).eligible);

        let starter = PurchaseContext {
            amount: Decimal::from(10),
            plan: Some("Starter".to_string()),
        };
        assert_eq!(evaluate(&c, &starter, 0, Utc::now()).reason, Some(IneligibleReason::PlanNotApplicable));

        let package = PurchaseContext {
            amount: Decimal::from(10),
            plan: None,
        };
        assert_eq!(evaluate(&c, &package, 0, Utc::now()).reason, Some(IneligibleReason::PlanNotApplicable));
    }

    #[test]
    fn test_evaluation_does_not_touch_the_coupon() {
        let c = coupon(DiscountType::Percentage, 10);
        let before = c.current_uses;
        let _ = evaluate(&c, &purchase(100), 0, Utc::now());
        assert_eq!(c.current_uses, before);
    }

    #[test]
    fn test_validate_terms() {
        assert!(validate_terms(DiscountType::Percentage, Decimal::from(100), None).is_ok());
        assert!(validate_terms(DiscountType::Percentage, Decimal::from(101), None).is_err());
        assert!(validate_terms(DiscountType::Fixed, Decimal::ZERO, None).is_err());
        assert!(validate_terms(DiscountType::Credits, Decimal::new(105, 1), None).is_err());
        assert!(validate_terms(DiscountType::Percentage, Decimal::from(10), Some(Decimal::ZERO)).is_err());
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  save20 "), "SAVE20");
    }
}
