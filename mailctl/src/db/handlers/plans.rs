//! Repository for subscription plans.

use std::collections::HashMap;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::plans::{PlanCreateDBRequest, PlanDBResponse, PlanFilter, PlanUpdateDBRequest},
};
use crate::ledger::MAX_BALANCE;
use crate::types::{Credits, PlanId, abbrev_uuid};

pub struct Plans<'c> {
    db: &'c Database,
}

fn check_terms(price: Decimal, credits_limit: Credits, billing_period_days: i64) -> Result<()> {
    let message = if price < Decimal::ZERO {
        "price cannot be negative"
    } else if credits_limit < 0 {
        "credits_limit cannot be negative"
    } else if credits_limit > MAX_BALANCE {
        "credits_limit exceeds the largest allowed balance"
    } else if billing_period_days < 1 {
        "billing_period_days must be at least 1"
    } else {
        return Ok(());
    };
    Err(DbError::CheckViolation {
        table: "plans",
        message: message.to_string(),
    })
}

impl<'c> Plans<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    fn claim_name(&self, name: &str, id: PlanId) -> Result<()> {
        match self.db.tables().plan_names.entry(name.to_lowercase()) {
            Entry::Occupied(existing) if *existing.get() != id => Err(DbError::UniqueViolation {
                table: "plans",
                field: "name",
                value: name.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    #[instrument(skip(self), err)]
    pub fn get_by_name(&self, name: &str) -> Result<Option<PlanDBResponse>> {
        let Some(id) = self.db.tables().plan_names.get(&name.trim().to_lowercase()).map(|id| *id) else {
            return Ok(None);
        };
        self.get_by_id(id)
    }
}

impl<'c> Repository for Plans<'c> {
    type CreateRequest = PlanCreateDBRequest;
    type UpdateRequest = PlanUpdateDBRequest;
    type Response = PlanDBResponse;
    type Id = PlanId;
    type Filter = PlanFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    fn create(&self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(DbError::CheckViolation {
                table: "plans",
                message: "name cannot be empty".to_string(),
            });
        }
        check_terms(request.price, request.credits_limit, request.billing_period_days)?;

        let id = Uuid::new_v4();
        self.claim_name(&name, id)?;

        let now = Utc::now();
        let plan = PlanDBResponse {
            id,
            name,
            description: request.description.clone(),
            price: request.price,
            credits_limit: request.credits_limit,
            billing_period_days: request.billing_period_days,
            is_active: request.is_active,
            created_at: now,
            updated_at: now,
        };
        self.db.tables().plans.insert(id, plan.clone());
        Ok(plan)
    }

    #[instrument(skip(self), fields(plan_id = %abbrev_uuid(&id)), err)]
    fn get_by_id(&self, id: Self::Id) -> Result<Option<Self::Response>> {
        Ok(self.db.tables().plans.get(&id).map(|p| p.clone()))
    }

    fn get_bulk(&self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        Ok(ids
            .into_iter()
            .filter_map(|id| self.db.tables().plans.get(&id).map(|p| (id, p.clone())))
            .collect())
    }

    /// Plans are listed cheapest first.
    fn list(&self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut plans: Vec<PlanDBResponse> = self
            .db
            .tables()
            .plans
            .iter()
            .filter(|p| !filter.active_only || p.is_active)
            .map(|p| p.clone())
            .collect();
        plans.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.name.cmp(&b.name)));
        Ok(plans)
    }

    #[instrument(skip(self), fields(plan_id = %abbrev_uuid(&id)), err)]
    fn delete(&self, id: Self::Id) -> Result<bool> {
        let Some((_, plan)) = self.db.tables().plans.remove(&id) else {
            return Ok(false);
        };
        self.db.tables().plan_names.remove_if(&plan.name.to_lowercase(), |_, owner| *owner == id);
        Ok(true)
    }

    #[instrument(skip(self, request), fields(plan_id = %abbrev_uuid(&id)), err)]
    fn update(&self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let current = self.get_by_id(id)?.ok_or(DbError::NotFound)?;
        check_terms(
            request.price.unwrap_or(current.price),
            request.credits_limit.unwrap_or(current.credits_limit),
            request.billing_period_days.unwrap_or(current.billing_period_days),
        )?;

        let new_name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty() && name.to_lowercase() != current.name.to_lowercase());
        if let Some(name) = new_name {
            self.claim_name(name, id)?;
        }

        let updated = {
            let mut plan = self.db.tables().plans.get_mut(&id).ok_or(DbError::NotFound)?;
            if let Some(name) = request.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                plan.name = name.to_string();
            }
            if let Some(description) = &request.description {
                plan.description = Some(description.clone());
            }
            if let Some(price) = request.price {
                plan.price = price;
            }
            if let Some(limit) = request.credits_limit {
                plan.credits_limit = limit;
            }
            if let Some(days) = request.billing_period_days {
                plan.billing_period_days = days;
            }
            if let Some(active) = request.is_active {
                plan.is_active = active;
            }
            plan.updated_at = Utc::now();
            plan.clone()
        };

        if new_name.is_some() {
            self.db
                .tables()
                .plan_names
                .remove_if(&current.name.to_lowercase(), |_, owner| *owner == id);
        }
        Ok(updated)
    }
}
