use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::coupons::{DiscountType, Evaluation};
use crate::types::{CouponId, UserId};

#[derive(Debug, Clone)]
pub struct CouponCreateDBRequest {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub min_purchase_amount: Decimal,
    pub max_uses: Option<u32>,
    pub max_uses_per_user: u32,
    pub starts_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub applicable_plans: Vec<String>,
}

/// Nullable fields use `Option<Option<_>>` so an update can clear them.
#[derive(Debug, Clone, Default)]
pub struct CouponUpdateDBRequest {
    pub description: Option<String>,
    pub discount_value: Option<Decimal>,
    pub max_discount: Option<Option<Decimal>>,
    pub min_purchase_amount: Option<Decimal>,
    pub max_uses: Option<Option<u32>>,
    pub max_uses_per_user: Option<u32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
    pub applicable_plans: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct CouponFilter {
    pub active_only: bool,
}

/// Result of applying one coupon use to a purchase.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub coupon_id: CouponId,
    pub code: String,
    pub user_id: UserId,
    pub reference: String,
    pub evaluation: Evaluation,
    /// False when this purchase had already redeemed the coupon
    pub newly_redeemed: bool,
}
