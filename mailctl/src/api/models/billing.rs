//! API request/response models for billing, credits and transactions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::PageQuery;
use crate::db::models::plans::PlanDBResponse;
use crate::db::models::transactions::{TransactionDBResponse, TransactionStatus, TransactionType};
use crate::types::{Credits, PlanId, TransactionId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanResponse {
    #[schema(value_type = String, format = "uuid")]
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

impl From<PlanDBResponse> for PlanResponse {
    fn from(db: PlanDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            description: db.description,
            price: db.price,
            credits_limit: db.credits_limit,
            billing_period_days: db.billing_period_days,
            is_active: db.is_active,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanCheckoutRequest {
    #[schema(value_type = String, format = "uuid")]
    pub plan_id: PlanId,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditsCheckoutRequest {
    pub package_id: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub session_id: String,
    pub credits_added: Credits,
    pub bonus_credits: Credits,
    pub coupon_code: Option<String>,
    /// False when this session had already been applied
    pub newly_processed: bool,
    pub transaction: TransactionResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CouponValidateRequest {
    pub code: String,
    pub amount: Decimal,
    /// Plan name, when validating against a subscription
    pub plan: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionAmount {
    pub paid: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionCredits {
    pub added: Credits,
    pub deducted: Credits,
    pub before: Credits,
    pub after: Credits,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TransactionId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: TransactionAmount,
    pub credits: TransactionCredits,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub reference: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub actor_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl From<TransactionDBResponse> for TransactionResponse {
    fn from(db: TransactionDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            transaction_type: db.transaction_type,
            amount: TransactionAmount { paid: db.amount_paid },
            credits: TransactionCredits {
                added: db.credits_added,
                deducted: db.credits_deducted,
                before: db.credits_before,
                after: db.credits_after,
            },
            status: db.status,
            description: db.description,
            reference: db.reference,
            actor_id: db.actor_id,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListTransactionsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: PageQuery,

    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    /// Admin listing only
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
}
