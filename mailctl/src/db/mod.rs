//! In-process persistence layer.
//!
//! All records live in concurrent maps behind a cheaply cloneable [`Database`] handle. Access goes
//! through the repository handlers in [`handlers`], which enforce uniqueness and check constraints
//! the way a relational schema would and report violations as [`errors::DbError`].
//!
//! The credit ledger and the job store keep their own per-user and per-job locks and only use this
//! module for the append-only audit tables (transactions and admin activity).

pub mod errors;
pub mod handlers;
pub mod models;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::coupons::Coupon;
use crate::types::{ApiKeyId, CouponId, PlanId, ServerId, UserId};
use models::{
    activity::ActivityDBResponse, api_keys::ApiKeyDBResponse, coupons::Redemption, payments::ProcessedPayment, plans::PlanDBResponse,
    servers::ServerDBResponse, transactions::TransactionDBResponse, users::UserDBResponse,
};

/// Shared handle to every table.
#[derive(Clone, Default)]
pub struct Database {
    tables: Arc<Tables>,
}

#[derive(Default)]
pub(crate) struct Tables {
    pub users: DashMap<UserId, UserDBResponse>,
    /// Lower-cased email -> user, the unique index on `users.email`
    pub user_emails: DashMap<String, UserId>,
    pub api_keys: DashMap<ApiKeyId, ApiKeyDBResponse>,
    /// Key digest -> key, the unique index on `api_keys.key_hash`
    pub api_key_hashes: DashMap<String, ApiKeyId>,
    pub plans: DashMap<PlanId, PlanDBResponse>,
    /// Lower-cased name -> plan
    pub plan_names: DashMap<String, PlanId>,
    pub coupons: DashMap<CouponId, Coupon>,
    /// Normalized code -> coupon, the unique index on `coupons.code`
    pub coupon_codes: DashMap<String, CouponId>,
    /// Per-user redemption counters
    pub coupon_redemptions: DashMap<(CouponId, UserId), u32>,
    /// Purchase reference -> redemption, so a purchase redeems at most once
    pub redeemed_purchases: DashMap<String, Redemption>,
    pub servers: DashMap<ServerId, ServerDBResponse>,
    /// Normalized URL -> server
    pub server_urls: DashMap<String, ServerId>,
    pub payments: DashMap<String, ProcessedPayment>,
    pub transactions: RwLock<Vec<TransactionDBResponse>>,
    pub activity: RwLock<Vec<ActivityDBResponse>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn tables(&self) -> &Tables {
        &self.tables
    }
}
