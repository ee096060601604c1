use chrono::{DateTime, Utc};

use crate::types::{Credits, TransactionId, UserId};

/// A checkout session whose payment has been applied to the ledger.
#[derive(Debug, Clone)]
pub struct ProcessedPayment {
    pub session_id: String,
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub credits_added: Credits,
    pub bonus_credits: Credits,
    pub coupon_code: Option<String>,
    pub processed_at: DateTime<Utc>,
}
