//! Credit ledger: the single source of truth for spendable balances.
//!
//! A user's balance is the sum of plan credits (reset every billing period) and purchased
//! credits (kept indefinitely). Debits draw plan credits first.
//!
//! Jobs never debit the balance directly. They first [`reserve`](Ledger::reserve) their maximum
//! cost, which only holds credits, then commit consumption against the hold as addresses are
//! checked and finally [`settle`](Ledger::settle) or [`release`](Ledger::release) it. The ledger
//! keeps `balance >= held >= 0` at all times:
//!
//! - a reservation is refused unless `balance - held` covers it
//! - consumption can never exceed the hold it is committed against
//! - admin adjustments never take the balance below what is held
//!
//! Every account sits behind its own mutex, so mutations for one user are totally ordered while
//! different users proceed in parallel. Lock order is account, then the audit tables.

pub mod renewal;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::{
    Database,
    handlers::{Activity, Repository, Transactions, Users},
    models::{
        activity::{ActivityAction, ActivityCreateDBRequest, Actor, TargetType},
        plans::PlanDBResponse,
        transactions::{TransactionCreateDBRequest, TransactionDBResponse, TransactionType},
    },
};
use crate::types::{Credits, JobId, PlanId, ReservationId, UserId, abbrev_uuid};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: Credits, available: Credits },

    #[error("no credit account for user {0}")]
    AccountNotFound(UserId),

    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),

    #[error("{0}")]
    InvalidAmount(String),

    #[error("cannot set balance to {value}: {held} credits are held by running jobs")]
    BelowHeld { value: Credits, held: Credits },

    #[error("user {0} has jobs holding credits")]
    OutstandingReservations(UserId),

    #[error("credit account for user {0} already exists")]
    AccountExists(UserId),

    #[error("settlement of {consumed} consumed and {refund} refunded does not match the {reserved} reserved")]
    SettlementMismatch { reserved: Credits, consumed: Credits, refund: Credits },

    #[error("reservation {reservation} cannot consume {requested} credits, {reserved} are held")]
    Overconsumption {
        reservation: ReservationId,
        requested: Credits,
        reserved: Credits,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Largest balance an account may hold. Every credit addition is checked against it, so sums of
/// plan and purchased credits never overflow.
pub const MAX_BALANCE: Credits = 1_000_000_000_000;

fn ceiling_exceeded() -> LedgerError {
    LedgerError::InvalidAmount(format!("balance cannot exceed {MAX_BALANCE} credits"))
}

/// The plan an account is subscribed to.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlanAssignment {
    #[schema(value_type = String, format = "uuid")]
    pub plan_id: PlanId,
    pub name: String,
    pub credits_limit: Credits,
    pub billing_period_days: i64,
    pub renewal_date: DateTime<Utc>,
}

impl PlanAssignment {
    /// Assign `plan` starting at `now`; the first renewal is one billing period later.
    pub fn start(plan: &PlanDBResponse, now: DateTime<Utc>) -> Self {
        Self {
            plan_id: plan.id,
            name: plan.name.clone(),
            credits_limit: plan.credits_limit,
            billing_period_days: plan.billing_period_days,
            renewal_date: now + Duration::days(plan.billing_period_days.max(1)),
        }
    }
}

/// Point-in-time view of an account.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BalanceSnapshot {
    pub balance: Credits,
    pub plan_credits: Credits,
    pub purchased_credits: Credits,
    /// Credits held by running jobs
    pub reserved: Credits,
    /// `balance - reserved`, what a new job can reserve
    pub available: Credits,
    pub plan: Option<PlanAssignment>,
}

/// Result of settling or releasing a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub consumed: Credits,
    pub refunded: Credits,
    pub balance: Credits,
}

/// Result of an admin balance change.
#[derive(Debug, Clone)]
pub struct CreditChange {
    pub before: Credits,
    pub after: Credits,
    pub transaction: TransactionDBResponse,
}

#[derive(Debug)]
struct Reservation {
    job_id: Option<JobId>,
    amount: Credits,
    consumed: Credits,
}

impl Reservation {
    fn outstanding(&self) -> Credits {
        self.amount - self.consumed
    }
}

#[derive(Debug, Default)]
struct Account {
    plan_credits: Credits,
    purchased_credits: Credits,
    plan: Option<PlanAssignment>,
    reservations: HashMap<ReservationId, Reservation>,
    closed: bool,
}

impl Account {
    fn balance(&self) -> Credits {
        self.plan_credits + self.purchased_credits
    }

    /// Purchased credits after adding `credits`, or an error if the balance would pass
    /// [`MAX_BALANCE`].
    fn purchased_after(&self, credits: Credits) -> Result<Credits> {
        let purchased = self.purchased_credits.checked_add(credits).ok_or_else(ceiling_exceeded)?;
        match self.plan_credits.checked_add(purchased) {
            Some(total) if total <= MAX_BALANCE => Ok(purchased),
            _ => Err(ceiling_exceeded()),
        }
    }

    /// Plan credits to hold when resetting to `limit`: never below what holds need, never past
    /// the ceiling.
    fn plan_reset(&self, limit: Credits) -> Credits {
        limit.max(self.plan_floor()).min(MAX_BALANCE - self.purchased_credits)
    }

    fn held(&self) -> Credits {
        self.reservations.values().map(Reservation::outstanding).sum()
    }

    fn snapshot(&self) -> BalanceSnapshot {
        let held = self.held();
        BalanceSnapshot {
            balance: self.balance(),
            plan_credits: self.plan_credits,
            purchased_credits: self.purchased_credits,
            reserved: held,
            available: self.balance() - held,
            plan: self.plan.clone(),
        }
    }

    /// Remove `amount` credits, plan credits first. Callers guarantee `amount <= balance`.
    fn debit(&mut self, amount: Credits) {
        let from_plan = amount.min(self.plan_credits);
        self.plan_credits -= from_plan;
        self.purchased_credits -= amount - from_plan;
    }

    /// Lowest plan credit level that still covers every hold.
    fn plan_floor(&self) -> Credits {
        (self.held() - self.purchased_credits).max(0)
    }
}

/// Shared handle to every credit account.
#[derive(Clone)]
pub struct Ledger {
    accounts: Arc<DashMap<UserId, Arc<Mutex<Account>>>>,
    reservations: Arc<DashMap<ReservationId, UserId>>,
    db: Database,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self {
            accounts: Arc::new(DashMap::new()),
            reservations: Arc::new(DashMap::new()),
            db,
        }
    }

    /// Fetch the account handle; the map guard is dropped before the caller locks it.
    fn account(&self, user_id: UserId) -> Result<Arc<Mutex<Account>>> {
        self.accounts
            .get(&user_id)
            .map(|account| account.clone())
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    fn reservation_owner(&self, reservation_id: ReservationId) -> Result<UserId> {
        self.reservations
            .get(&reservation_id)
            .map(|owner| *owner)
            .ok_or(LedgerError::ReservationNotFound(reservation_id))
    }

    fn user_label(&self, user_id: UserId) -> String {
        Users::new(&self.db)
            .get_by_id(user_id)
            .ok()
            .flatten()
            .map(|user| user.email)
            .unwrap_or_else(|| user_id.to_string())
    }

    /// Create an account. Plan credits start at the plan's limit.
    #[instrument(skip(self, plan), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub fn open_account(&self, user_id: UserId, plan: Option<PlanAssignment>) -> Result<BalanceSnapshot> {
        match self.accounts.entry(user_id) {
            Entry::Occupied(_) => Err(LedgerError::AccountExists(user_id)),
            Entry::Vacant(slot) => {
                let account = Account {
                    plan_credits: plan.as_ref().map_or(0, |p| p.credits_limit.clamp(0, MAX_BALANCE)),
                    plan,
                    ..Default::default()
                };
                let snapshot = account.snapshot();
                slot.insert(Arc::new(Mutex::new(account)));
                debug!(balance = snapshot.balance, "Opened credit account");
                Ok(snapshot)
            }
        }
    }

    pub fn balance(&self, user_id: UserId) -> Result<BalanceSnapshot> {
        let account = self.account(user_id)?;
        let account = account.lock();
        if account.closed {
            return Err(LedgerError::AccountNotFound(user_id));
        }
        Ok(account.snapshot())
    }

    /// Hold `amount` credits for a job without debiting them.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub fn reserve(&self, user_id: UserId, amount: Credits, job_id: Option<JobId>) -> Result<ReservationId> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount("reservation amount must be positive".to_string()));
        }
        let account = self.account(user_id)?;
        let mut account = account.lock();
        if account.closed {
            return Err(LedgerError::AccountNotFound(user_id));
        }

        let available = account.balance() - account.held();
        if amount > available {
            return Err(LedgerError::InsufficientCredits {
                required: amount,
                available: available.max(0),
            });
        }

        let id = Uuid::new_v4();
        account.reservations.insert(
            id,
            Reservation {
                job_id,
                amount,
                consumed: 0,
            },
        );
        self.reservations.insert(id, user_id);
        debug!(reservation_id = %abbrev_uuid(&id), amount, "Reserved credits");
        Ok(id)
    }

    /// Commit consumption against a reservation.
    ///
    /// `consumed_total` is the total consumed so far, not an increment, so replaying a commit is a
    /// no-op. Returns the credits debited by this call.
    pub fn commit_usage(&self, reservation_id: ReservationId, consumed_total: Credits) -> Result<Credits> {
        let user_id = self.reservation_owner(reservation_id)?;
        let account = self.account(user_id)?;
        let mut account = account.lock();
        Self::commit_locked(&mut account, reservation_id, consumed_total)
    }

    fn commit_locked(account: &mut Account, reservation_id: ReservationId, consumed_total: Credits) -> Result<Credits> {
        let reservation = account
            .reservations
            .get_mut(&reservation_id)
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;
        if consumed_total > reservation.amount {
            return Err(LedgerError::Overconsumption {
                reservation: reservation_id,
                requested: consumed_total,
                reserved: reservation.amount,
            });
        }
        if consumed_total <= reservation.consumed {
            return Ok(0);
        }
        let delta = consumed_total - reservation.consumed;
        reservation.consumed = consumed_total;
        account.debit(delta);
        metrics::counter!("mailctl_credits_debited_total").increment(delta as u64);
        Ok(delta)
    }

    /// Close out a reservation: `consumed` credits are charged in total (less whatever was already
    /// committed) and `refund` credits return to the available balance.
    #[instrument(skip(self), fields(reservation_id = %abbrev_uuid(&reservation_id)), err)]
    pub fn settle(&self, reservation_id: ReservationId, consumed: Credits, refund: Credits) -> Result<Settlement> {
        let user_id = self.reservation_owner(reservation_id)?;
        let account = self.account(user_id)?;
        let mut account = account.lock();
        self.settle_locked(&mut account, user_id, reservation_id, consumed, refund)
    }

    /// Settle at whatever has been committed so far, refunding the remainder.
    #[instrument(skip(self), fields(reservation_id = %abbrev_uuid(&reservation_id)), err)]
    pub fn release(&self, reservation_id: ReservationId) -> Result<Settlement> {
        let user_id = self.reservation_owner(reservation_id)?;
        let account = self.account(user_id)?;
        let mut account = account.lock();
        let (consumed, refund) = account
            .reservations
            .get(&reservation_id)
            .map(|r| (r.consumed, r.outstanding()))
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;
        self.settle_locked(&mut account, user_id, reservation_id, consumed, refund)
    }

    fn settle_locked(
        &self,
        account: &mut Account,
        user_id: UserId,
        reservation_id: ReservationId,
        consumed: Credits,
        refund: Credits,
    ) -> Result<Settlement> {
        let (amount, already, job_id) = account
            .reservations
            .get(&reservation_id)
            .map(|r| (r.amount, r.consumed, r.job_id))
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;
        if consumed < 0 || refund < 0 || consumed.checked_add(refund) != Some(amount) || consumed < already {
            return Err(LedgerError::SettlementMismatch {
                reserved: amount,
                consumed,
                refund,
            });
        }

        Self::commit_locked(account, reservation_id, consumed)?;
        account.reservations.remove(&reservation_id);
        self.reservations.remove(&reservation_id);

        let balance = account.balance();
        if consumed > 0 {
            Transactions::new(&self.db).append(TransactionCreateDBRequest {
                user_id,
                transaction_type: TransactionType::Usage,
                amount_paid: Decimal::ZERO,
                credits_added: 0,
                credits_deducted: consumed,
                credits_before: balance + consumed,
                credits_after: balance,
                description: Some(format!("Validation of {consumed} addresses")),
                reference: Some(job_id.unwrap_or(reservation_id).to_string()),
                actor_id: None,
            });
        }
        info!(consumed, refunded = refund, balance, "Settled reservation");
        Ok(Settlement {
            consumed,
            refunded: refund,
            balance,
        })
    }

    /// Add purchased credits from a credit package.
    #[instrument(skip(self, description), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub fn credit_purchase(
        &self,
        user_id: UserId,
        credits: Credits,
        amount_paid: Decimal,
        description: String,
        reference: Option<String>,
    ) -> Result<TransactionDBResponse> {
        if credits < 0 {
            return Err(LedgerError::InvalidAmount("purchased credits cannot be negative".to_string()));
        }
        let account = self.account(user_id)?;
        let mut account = account.lock();
        if account.closed {
            return Err(LedgerError::AccountNotFound(user_id));
        }
        let before = account.balance();
        account.purchased_credits = account.purchased_after(credits)?;
        let after = account.balance();

        Ok(Transactions::new(&self.db).append(TransactionCreateDBRequest {
            user_id,
            transaction_type: TransactionType::CreditPackage,
            amount_paid,
            credits_added: credits,
            credits_deducted: 0,
            credits_before: before,
            credits_after: after,
            description: Some(description),
            reference,
            actor_id: None,
        }))
    }

    /// Move the account onto `plan`: plan credits are set to the plan's limit and the renewal
    /// date to one billing period from `now`. `bonus_credits` are added as purchased credits.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, plan, reference), fields(user_id = %abbrev_uuid(&user_id), plan = %plan.name), err)]
    pub fn subscribe(
        &self,
        user_id: UserId,
        plan: &PlanDBResponse,
        bonus_credits: Credits,
        amount_paid: Decimal,
        reference: Option<String>,
        actor_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<TransactionDBResponse> {
        if bonus_credits < 0 {
            return Err(LedgerError::InvalidAmount("bonus credits cannot be negative".to_string()));
        }
        let account = self.account(user_id)?;
        let mut account = account.lock();
        if account.closed {
            return Err(LedgerError::AccountNotFound(user_id));
        }
        let before = account.balance();
        let purchased = account.purchased_after(bonus_credits)?;
        let plan_credits = plan.credits_limit.max(account.plan_floor());
        if plan_credits.checked_add(purchased).is_none_or(|total| total > MAX_BALANCE) {
            return Err(ceiling_exceeded());
        }
        account.purchased_credits = purchased;
        account.plan_credits = plan_credits;
        account.plan = Some(PlanAssignment::start(plan, now));
        let after = account.balance();

        let description = if bonus_credits > 0 {
            format!("Subscribed to {} with {bonus_credits} bonus credits", plan.name)
        } else {
            format!("Subscribed to {}", plan.name)
        };
        Ok(Transactions::new(&self.db).append(TransactionCreateDBRequest {
            user_id,
            transaction_type: TransactionType::Subscription,
            amount_paid,
            credits_added: (after - before).max(0),
            credits_deducted: (before - after).max(0),
            credits_before: before,
            credits_after: after,
            description: Some(description),
            reference,
            actor_id,
        }))
    }

    /// Reset plan credits on every account whose renewal date is at or before `now`.
    ///
    /// Plan credits do not accumulate: they are set back to the plan's limit, but never below
    /// what outstanding holds need. Returns the number of accounts renewed.
    #[instrument(skip(self))]
    pub fn renew_due(&self, now: DateTime<Utc>) -> usize {
        let accounts: Vec<(UserId, Arc<Mutex<Account>>)> =
            self.accounts.iter().map(|entry| (*entry.key(), entry.value().clone())).collect();

        let mut renewed = 0;
        for (user_id, account) in accounts {
            let mut account = account.lock();
            let Some(plan) = account.plan.clone() else { continue };
            if account.closed || plan.renewal_date > now {
                continue;
            }

            let before = account.balance();
            account.plan_credits = account.plan_reset(plan.credits_limit);
            let period = Duration::days(plan.billing_period_days.max(1));
            let mut next = plan.renewal_date;
            while next <= now {
                next += period;
            }
            if let Some(assigned) = account.plan.as_mut() {
                assigned.renewal_date = next;
            }
            let after = account.balance();

            Transactions::new(&self.db).append(TransactionCreateDBRequest {
                user_id,
                transaction_type: TransactionType::PlanRenewal,
                amount_paid: Decimal::ZERO,
                credits_added: (after - before).max(0),
                credits_deducted: (before - after).max(0),
                credits_before: before,
                credits_after: after,
                description: Some(format!("{} plan renewed", plan.name)),
                reference: Some(plan.plan_id.to_string()),
                actor_id: None,
            });
            renewed += 1;
        }
        if renewed > 0 {
            info!(renewed, "Renewed plan credits");
        }
        renewed
    }

    /// Admin adjustment by `delta` credits.
    ///
    /// Additions land in purchased credits. Removals are clamped: the balance never drops below
    /// the credits held by running jobs, which is zero when nothing is held. The transaction and
    /// activity entry record both the requested and the applied delta.
    #[instrument(skip(self, reason, actor), fields(user_id = %abbrev_uuid(&user_id), admin = %actor.email), err)]
    pub fn adjust(&self, user_id: UserId, delta: Credits, reason: &str, actor: &Actor) -> Result<CreditChange> {
        if delta == 0 {
            return Err(LedgerError::InvalidAmount("adjustment cannot be zero".to_string()));
        }
        let label = self.user_label(user_id);
        let account = self.account(user_id)?;
        let mut account = account.lock();
        if account.closed {
            return Err(LedgerError::AccountNotFound(user_id));
        }

        let before = account.balance();
        if delta > 0 {
            account.purchased_credits = account.purchased_after(delta)?;
        } else {
            let target = before.saturating_add(delta).max(account.held());
            account.debit(before - target);
        }
        let after = account.balance();
        let applied = after - before;

        let description = if applied == delta {
            reason.to_string()
        } else {
            format!("{reason} (requested {delta}, applied {applied})")
        };
        let transaction = Transactions::new(&self.db).append(TransactionCreateDBRequest {
            user_id,
            transaction_type: TransactionType::AdminAdjustment,
            amount_paid: Decimal::ZERO,
            credits_added: applied.max(0),
            credits_deducted: (-applied).max(0),
            credits_before: before,
            credits_after: after,
            description: Some(description),
            reference: None,
            actor_id: Some(actor.user_id),
        });
        Activity::new(&self.db).append(
            actor,
            ActivityCreateDBRequest {
                action: ActivityAction::AdjustCredits,
                target_type: TargetType::User,
                target_id: Some(user_id.to_string()),
                target_label: label,
                details: json!({
                    "requested_delta": delta,
                    "applied_delta": applied,
                    "before": before,
                    "after": after,
                    "reason": reason,
                }),
            },
        );
        Ok(CreditChange { before, after, transaction })
    }

    /// Admin override setting the balance to exactly `value`.
    ///
    /// Rejected when `value` is negative or below the credits held by running jobs. Plan credits
    /// are kept up to `value`, the rest becomes purchased credits.
    #[instrument(skip(self, reason, actor), fields(user_id = %abbrev_uuid(&user_id), admin = %actor.email), err)]
    pub fn set_absolute(&self, user_id: UserId, value: Credits, reason: &str, actor: &Actor) -> Result<CreditChange> {
        if value < 0 {
            return Err(LedgerError::InvalidAmount("balance cannot be negative".to_string()));
        }
        if value > MAX_BALANCE {
            return Err(ceiling_exceeded());
        }
        let label = self.user_label(user_id);
        let account = self.account(user_id)?;
        let mut account = account.lock();
        if account.closed {
            return Err(LedgerError::AccountNotFound(user_id));
        }
        let held = account.held();
        if value < held {
            return Err(LedgerError::BelowHeld { value, held });
        }

        let before = account.balance();
        account.plan_credits = account.plan_credits.min(value);
        account.purchased_credits = value - account.plan_credits;
        let after = account.balance();

        let transaction = Transactions::new(&self.db).append(TransactionCreateDBRequest {
            user_id,
            transaction_type: TransactionType::AdminAdjustment,
            amount_paid: Decimal::ZERO,
            credits_added: (after - before).max(0),
            credits_deducted: (before - after).max(0),
            credits_before: before,
            credits_after: after,
            description: Some(reason.to_string()),
            reference: None,
            actor_id: Some(actor.user_id),
        });
        Activity::new(&self.db).append(
            actor,
            ActivityCreateDBRequest {
                action: ActivityAction::SetCredits,
                target_type: TargetType::User,
                target_id: Some(user_id.to_string()),
                target_label: label,
                details: json!({
                    "before": before,
                    "after": after,
                    "reason": reason,
                }),
            },
        );
        Ok(CreditChange { before, after, transaction })
    }

    /// Remove an account. Refused while any job still holds credits.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub fn close_account(&self, user_id: UserId) -> Result<BalanceSnapshot> {
        let account = self.account(user_id)?;
        let mut account = account.lock();
        if account.closed {
            return Err(LedgerError::AccountNotFound(user_id));
        }
        if !account.reservations.is_empty() {
            return Err(LedgerError::OutstandingReservations(user_id));
        }
        account.closed = true;
        let snapshot = account.snapshot();
        self.accounts.remove(&user_id);
        info!(balance = snapshot.balance, "Closed credit account");
        Ok(snapshot)
    }
}
