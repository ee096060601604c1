//! Append-only store for ledger transactions.

use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::Result,
    handlers::paginate,
    models::transactions::{TransactionCreateDBRequest, TransactionDBResponse, TransactionFilter, TransactionStatus},
};
use crate::types::{TransactionId, abbrev_uuid};

pub struct Transactions<'c> {
    db: &'c Database,
}

impl<'c> Transactions<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    fn matches(tx: &TransactionDBResponse, filter: &TransactionFilter) -> bool {
        filter.user_id.is_none_or(|user_id| tx.user_id == user_id)
            && filter.transaction_type.is_none_or(|kind| tx.transaction_type == kind)
    }

    /// Record a ledger movement that has already been applied.
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), kind = ?request.transaction_type))]
    pub fn append(&self, request: TransactionCreateDBRequest) -> TransactionDBResponse {
        let tx = TransactionDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            transaction_type: request.transaction_type,
            amount_paid: request.amount_paid,
            credits_added: request.credits_added,
            credits_deducted: request.credits_deducted,
            credits_before: request.credits_before,
            credits_after: request.credits_after,
            status: TransactionStatus::Completed,
            description: request.description,
            reference: request.reference,
            actor_id: request.actor_id,
            created_at: Utc::now(),
        };
        self.db.tables().transactions.write().push(tx.clone());
        tx
    }

    pub fn get_by_id(&self, id: TransactionId) -> Result<Option<TransactionDBResponse>> {
        Ok(self.db.tables().transactions.read().iter().find(|tx| tx.id == id).cloned())
    }

    /// Newest first.
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    pub fn list(&self, filter: &TransactionFilter) -> Result<Vec<TransactionDBResponse>> {
        let log = self.db.tables().transactions.read();
        Ok(paginate(
            log.iter().rev().filter(|tx| Self::matches(tx, filter)).cloned(),
            filter.skip,
            filter.limit,
        ))
    }

    pub fn count(&self, filter: &TransactionFilter) -> Result<i64> {
        Ok(self.db.tables().transactions.read().iter().filter(|tx| Self::matches(tx, filter)).count() as i64)
    }
}
