use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::{Credits, PlanId};

/// Subscription plan offered at checkout.
#[derive(Debug, Clone)]
pub struct PlanDBResponse {
    pub id: PlanId,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub credits_limit: Credits,
    pub billing_period_days: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PlanCreateDBRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub credits_limit: Credits,
    pub billing_period_days: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PlanUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub credits_limit: Option<Credits>,
    pub billing_period_days: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    pub active_only: bool,
}
