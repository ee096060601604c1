//! Repository for coupons and their redemptions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::coupons::{self, Coupon, PurchaseContext};
use crate::db::{
    Database,
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::coupons::{CouponCreateDBRequest, CouponFilter, CouponUpdateDBRequest, Redemption},
};
use crate::types::{CouponId, UserId, abbrev_uuid};

pub struct Coupons<'c> {
    db: &'c Database,
}

fn violation(message: impl Into<String>) -> DbError {
    DbError::CheckViolation {
        table: "coupons",
        message: message.into(),
    }
}

/// Constraints shared by create and update, applied to the merged record.
fn check_coupon(coupon: &Coupon) -> Result<()> {
    coupons::validate_terms(coupon.discount_type, coupon.discount_value, coupon.max_discount).map_err(violation)?;
    if coupon.min_purchase_amount < Decimal::ZERO {
        return Err(violation("min_purchase_amount cannot be negative"));
    }
    if coupon.max_uses == Some(0) {
        return Err(violation("max_uses must be at least 1 when set"));
    }
    if coupon.max_uses_per_user == 0 {
        return Err(violation("max_uses_per_user must be at least 1"));
    }
    if coupon.expires_at.is_some_and(|expires| expires <= coupon.starts_at) {
        return Err(violation("expires_at must be after starts_at"));
    }
    Ok(())
}

impl<'c> Coupons<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub fn get_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let Some(id) = self.db.tables().coupon_codes.get(&coupons::normalize_code(code)).map(|id| *id) else {
            return Ok(None);
        };
        self.get_by_id(id)
    }

    /// How many times `user_id` has redeemed the coupon.
    pub fn user_redemptions(&self, coupon_id: CouponId, user_id: UserId) -> u32 {
        self.db
            .tables()
            .coupon_redemptions
            .get(&(coupon_id, user_id))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Redeem `code` for the purchase identified by `reference`.
    ///
    /// Re-evaluates the coupon and increments the global and per-user counters in one step, so
    /// concurrent redemptions can never push either counter past its limit. Redeeming the same
    /// reference again returns the original redemption with `newly_redeemed = false`. An
    /// ineligible coupon is reported as a check violation carrying the reason.
    #[instrument(skip(self, ctx), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub fn redeem(&self, code: &str, user_id: UserId, ctx: &PurchaseContext, reference: &str, now: DateTime<Utc>) -> Result<Redemption> {
        let tables = self.db.tables();
        let coupon_id = tables
            .coupon_codes
            .get(&coupons::normalize_code(code))
            .map(|id| *id)
            .ok_or(DbError::NotFound)?;

        // Lock order: purchase reference, then coupon, then the personal counter
        let slot = match tables.redeemed_purchases.entry(reference.to_string()) {
            Entry::Occupied(existing) => {
                return Ok(Redemption {
                    newly_redeemed: false,
                    ..existing.get().clone()
                });
            }
            Entry::Vacant(slot) => slot,
        };

        let mut coupon = tables.coupons.get_mut(&coupon_id).ok_or(DbError::NotFound)?;
        let mut personal = tables.coupon_redemptions.entry((coupon_id, user_id)).or_insert(0);

        let evaluation = coupons::evaluate(&coupon, ctx, *personal, now);
        if let Some(reason) = &evaluation.reason {
            warn!(code = %coupon.code, %reason, "Coupon redemption refused");
            return Err(violation(reason.to_string()));
        }

        coupon.current_uses += 1;
        coupon.updated_at = now;
        *personal += 1;

        let redemption = Redemption {
            coupon_id,
            code: coupon.code.clone(),
            user_id,
            reference: reference.to_string(),
            evaluation,
            newly_redeemed: true,
        };
        slot.insert(redemption.clone());
        Ok(redemption)
    }
}

impl<'c> Repository for Coupons<'c> {
    type CreateRequest = CouponCreateDBRequest;
    type UpdateRequest = CouponUpdateDBRequest;
    type Response = Coupon;
    type Id = CouponId;
    type Filter = CouponFilter;

    #[instrument(skip(self, request), fields(code = %request.code), err)]
    fn create(&self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let code = coupons::normalize_code(&request.code);
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(violation("code must be non-empty and contain only letters, digits, '-' or '_'"));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let coupon = Coupon {
            id,
            code: code.clone(),
            description: request.description.clone(),
            discount_type: request.discount_type,
            discount_value: request.discount_value,
            max_discount: request.max_discount,
            min_purchase_amount: request.min_purchase_amount,
            max_uses: request.max_uses,
            max_uses_per_user: request.max_uses_per_user,
            current_uses: 0,
            starts_at: request.starts_at,
            expires_at: request.expires_at,
            is_active: request.is_active,
            applicable_plans: request.applicable_plans.iter().map(|p| p.trim().to_string()).collect(),
            created_at: now,
            updated_at: now,
        };
        check_coupon(&coupon)?;

        match self.db.tables().coupon_codes.entry(code.clone()) {
            Entry::Occupied(_) => {
                return Err(DbError::UniqueViolation {
                    table: "coupons",
                    field: "code",
                    value: code,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        self.db.tables().coupons.insert(id, coupon.clone());
        Ok(coupon)
    }

    #[instrument(skip(self), fields(coupon_id = %abbrev_uuid(&id)), err)]
    fn get_by_id(&self, id: Self::Id) -> Result<Option<Self::Response>> {
        Ok(self.db.tables().coupons.get(&id).map(|c| c.clone()))
    }

    fn get_bulk(&self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        Ok(ids
            .into_iter()
            .filter_map(|id| self.db.tables().coupons.get(&id).map(|c| (id, c.clone())))
            .collect())
    }

    fn list(&self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut coupons: Vec<Coupon> = self
            .db
            .tables()
            .coupons
            .iter()
            .filter(|c| !filter.active_only || c.is_active)
            .map(|c| c.clone())
            .collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.code.cmp(&b.code)));
        Ok(coupons)
    }

    #[instrument(skip(self), fields(coupon_id = %abbrev_uuid(&id)), err)]
    fn delete(&self, id: Self::Id) -> Result<bool> {
        let Some((_, coupon)) = self.db.tables().coupons.remove(&id) else {
            return Ok(false);
        };
        self.db.tables().coupon_codes.remove_if(&coupon.code, |_, owner| *owner == id);
        self.db.tables().coupon_redemptions.retain(|(coupon_id, _), _| *coupon_id != id);
        Ok(true)
    }

    #[instrument(skip(self, request), fields(coupon_id = %abbrev_uuid(&id)), err)]
    fn update(&self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let mut coupon = self.db.tables().coupons.get_mut(&id).ok_or(DbError::NotFound)?;

        let mut updated = coupon.clone();
        if let Some(description) = &request.description {
            updated.description = Some(description.clone());
        }
        if let Some(value) = request.discount_value {
            updated.discount_value = value;
        }
        if let Some(max_discount) = request.max_discount {
            updated.max_discount = max_discount;
        }
        if let Some(min) = request.min_purchase_amount {
            updated.min_purchase_amount = min;
        }
        if let Some(max_uses) = request.max_uses {
            updated.max_uses = max_uses;
        }
        if let Some(per_user) = request.max_uses_per_user {
            updated.max_uses_per_user = per_user;
        }
        if let Some(starts_at) = request.starts_at {
            updated.starts_at = starts_at;
        }
        if let Some(expires_at) = request.expires_at {
            updated.expires_at = expires_at;
        }
        if let Some(active) = request.is_active {
            updated.is_active = active;
        }
        if let Some(plans) = &request.applicable_plans {
            updated.applicable_plans = plans.iter().map(|p| p.trim().to_string()).collect();
        }
        check_coupon(&updated)?;
        if updated.max_uses.is_some_and(|max| max < updated.current_uses) {
            return Err(violation("max_uses cannot be lower than current_uses"));
        }

        updated.updated_at = Utc::now();
        *coupon = updated.clone();
        Ok(updated)
    }
}
