//! Record of checkout sessions already applied to the ledger.

use dashmap::mapref::entry::Entry;
use tracing::instrument;

use crate::db::{Database, models::payments::ProcessedPayment};

pub struct Payments<'c> {
    db: &'c Database,
}

impl<'c> Payments<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    pub fn get(&self, session_id: &str) -> Option<ProcessedPayment> {
        self.db.tables().payments.get(session_id).map(|p| p.clone())
    }

    /// Run `apply` for `session_id` unless it already ran successfully.
    ///
    /// The session's slot stays locked while `apply` runs, so concurrent verifications of one
    /// session apply it once. Returns the stored payment and whether this call applied it. A failed
    /// `apply` leaves nothing recorded.
    #[instrument(skip(self, apply), err)]
    pub fn process_once<E>(&self, session_id: &str, apply: impl FnOnce() -> Result<ProcessedPayment, E>) -> Result<(ProcessedPayment, bool), E>
    where
        E: std::fmt::Display,
    {
        match self.db.tables().payments.entry(session_id.to_string()) {
            Entry::Occupied(existing) => Ok((existing.get().clone(), false)),
            Entry::Vacant(slot) => {
                let payment = apply()?;
                slot.insert(payment.clone());
                Ok((payment, true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn payment(session_id: &str) -> ProcessedPayment {
        ProcessedPayment {
            session_id: session_id.to_string(),
            user_id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            credits_added: 1000,
            bonus_credits: 0,
            coupon_code: None,
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_applies_once() {
        let db = Database::new();
        let payments = Payments::new(&db);
        let mut calls = 0;

        let (first, applied) = payments
            .process_once::<String>("cs_1", || {
                calls += 1;
                Ok(payment("cs_1"))
            })
            .unwrap();
        assert!(applied);

        let (second, applied) = payments
            .process_once::<String>("cs_1", || {
                calls += 1;
                Ok(payment("cs_1"))
            })
            .unwrap();
        assert!(!applied);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_apply_records_nothing() {
        let db = Database::new();
        let payments = Payments::new(&db);
        let result = payments.process_once("cs_2", || Err::<ProcessedPayment, _>("provider down".to_string()));
        assert!(result.is_err());
        assert!(payments.get("cs_2").is_none());
    }
}
