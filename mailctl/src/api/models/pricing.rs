//! API request/response models for plan and coupon administration.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::coupons::{Coupon, DiscountType};
use crate::db::models::coupons::{CouponCreateDBRequest, CouponUpdateDBRequest};
use crate::db::models::plans::{PlanCreateDBRequest, PlanUpdateDBRequest};
use crate::types::{CouponId, Credits};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanCreate {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub credits_limit: Credits,
    pub billing_period_days: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl From<PlanCreate> for PlanCreateDBRequest {
    fn from(api: PlanCreate) -> Self {
        Self {
            name: api.name,
            description: api.description,
            price: api.price,
            credits_limit: api.credits_limit,
            billing_period_days: api.billing_period_days,
            is_active: api.is_active,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub credits_limit: Option<Credits>,
    pub billing_period_days: Option<i64>,
    pub is_active: Option<bool>,
}

impl From<PlanUpdate> for PlanUpdateDBRequest {
    fn from(api: PlanUpdate) -> Self {
        Self {
            name: api.name,
            description: api.description,
            price: api.price,
            credits_limit: api.credits_limit,
            billing_period_days: api.billing_period_days,
            is_active: api.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CouponCreate {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    #[serde(default)]
    pub min_purchase_amount: Decimal,
    /// Omit for unlimited uses
    pub max_uses: Option<u32>,
    pub max_uses_per_user: Option<u32>,
    /// Defaults to now
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Plan names; empty applies to every purchase
    #[serde(default)]
    pub applicable_plans: Vec<String>,
}

impl CouponCreate {
    pub fn into_db(self, now: DateTime<Utc>) -> CouponCreateDBRequest {
        CouponCreateDBRequest {
            code: self.code,
            description: self.description,
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            max_discount: self.max_discount,
            min_purchase_amount: self.min_purchase_amount,
            max_uses: self.max_uses,
            max_uses_per_user: self.max_uses_per_user.unwrap_or(1),
            starts_at: self.starts_at.unwrap_or(now),
            expires_at: self.expires_at,
            is_active: self.is_active,
            applicable_plans: self.applicable_plans,
        }
    }
}

/// Nullable fields accept an explicit `null` to clear them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CouponUpdate {
    pub description: Option<String>,
    pub discount_value: Option<Decimal>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<Decimal>)]
    pub max_discount: Option<Option<Decimal>>,
    pub min_purchase_amount: Option<Decimal>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<u32>)]
    pub max_uses: Option<Option<u32>>,
    pub max_uses_per_user: Option<u32>,
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<DateTime<Utc>>)]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
    pub applicable_plans: Option<Vec<String>>,
}

impl From<CouponUpdate> for CouponUpdateDBRequest {
    fn from(api: CouponUpdate) -> Self {
        Self {
            description: api.description,
            discount_value: api.discount_value,
            max_discount: api.max_discount,
            min_purchase_amount: api.min_purchase_amount,
            max_uses: api.max_uses,
            max_uses_per_user: api.max_uses_per_user,
            starts_at: api.starts_at,
            expires_at: api.expires_at,
            is_active: api.is_active,
            applicable_plans: api.applicable_plans,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CouponResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: CouponId,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub min_purchase_amount: Decimal,
    pub max_uses: Option<u32>,
    pub max_uses_per_user: u32,
    pub current_uses: u32,
    pub starts_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub applicable_plans: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Coupon> for CouponResponse {
    fn from(c: Coupon) -> Self {
        Self {
            id: c.id,
            code: c.code,
            description: c.description,
            discount_type: c.discount_type,
            discount_value: c.discount_value,
            max_discount: c.max_discount,
            min_purchase_amount: c.min_purchase_amount,
            max_uses: c.max_uses,
            max_uses_per_user: c.max_uses_per_user,
            current_uses: c.current_uses,
            starts_at: c.starts_at,
            expires_at: c.expires_at,
            is_active: c.is_active,
            applicable_plans: c.applicable_plans,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}
