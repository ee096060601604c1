//! Repository implementations for store access.
//!
//! Each repository borrows the shared [`Database`](crate::db::Database) handle and provides
//! strongly-typed operations over one table, returning models from [`crate::db::models`].
//! Uniqueness is enforced through the index maps kept next to each table, so a violated
//! constraint surfaces as [`DbError::UniqueViolation`](crate::db::errors::DbError) exactly as a
//! relational store would report it.
//!
//! ```ignore
//! use mailctl::db::handlers::{Repository, Users};
//!
//! let users = Users::new(&db);
//! let page = users.list(&UserFilter::new(0, 20))?;
//! ```

pub mod activity;
pub mod api_keys;
pub mod coupons;
pub mod payments;
pub mod plans;
pub mod repository;
pub mod servers;
pub mod transactions;
pub mod users;

pub use activity::Activity;
pub use api_keys::ApiKeys;
pub use coupons::Coupons;
pub use payments::Payments;
pub use plans::Plans;
pub use repository::Repository;
pub use servers::Servers;
pub use transactions::Transactions;
pub use users::Users;

/// Apply `skip`/`limit` to an already ordered sequence. Negative values are treated as zero.
pub(crate) fn paginate<T>(items: impl IntoIterator<Item = T>, skip: i64, limit: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(skip.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}
