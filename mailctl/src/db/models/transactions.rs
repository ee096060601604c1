use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{Credits, TransactionId, UserId};

/// What caused a ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Plan purchase or plan change
    Subscription,
    /// Add-on credit purchase
    CreditPackage,
    /// Admin adjust or set
    AdminAdjustment,
    /// Credits consumed by a validation job, written when the job settles
    Usage,
    /// Periodic reset of plan credits
    PlanRenewal,
}

/// Transactions are only written after the ledger change they describe has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
}

/// Immutable ledger audit record.
#[derive(Debug, Clone)]
pub struct TransactionDBResponse {
    pub id: TransactionId,
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub amount_paid: Decimal,
    pub credits_added: Credits,
    pub credits_deducted: Credits,
    pub credits_before: Credits,
    pub credits_after: Credits,
    pub status: TransactionStatus,
    pub description: Option<String>,
    /// Checkout session, job, or plan the movement belongs to
    pub reference: Option<String>,
    /// Admin who caused the movement, if any
    pub actor_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TransactionCreateDBRequest {
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub amount_paid: Decimal,
    pub credits_added: Credits,
    pub credits_deducted: Credits,
    pub credits_before: Credits,
    pub credits_after: Credits,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub actor_id: Option<UserId>,
}

#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub user_id: Option<UserId>,
    pub transaction_type: Option<TransactionType>,
    pub skip: i64,
    pub limit: i64,
}

impl TransactionFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            user_id: None,
            transaction_type: None,
            skip,
            limit,
        }
    }
}
