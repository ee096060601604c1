//! Admin override layer.
//!
//! Privileged operations that bypass the purchase flow: user management, credit overrides and
//! bulk commands. Credit changes still go through the [`Ledger`](crate::ledger::Ledger) and its
//! invariant checks, and every operation leaves an activity log entry.

pub mod activity;
pub mod bulk;
pub mod users;

pub use bulk::{BulkAction, BulkOutcome, BulkParams, BulkRequest, BulkResponse};
pub use users::{NewUser, Provisioned, UserAdmin};
