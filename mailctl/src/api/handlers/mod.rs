//! HTTP request handlers for all API endpoints.
//!
//! Handlers authenticate through the [`CurrentUser`](crate::api::models::users::CurrentUser) and
//! [`AdminUser`](crate::auth::current_user::AdminUser) extractors, delegate to the domain services
//! held in [`AppState`](crate::AppState), and map results to response models. Errors convert to
//! [`crate::errors::Error`], which renders the status code and a user-safe message.
//!
//! # Handler Modules
//!
//! - [`auth`]: Registration, login and the current user
//! - [`validation`]: Single validation, bulk upload, job listing, cancellation and results
//! - [`api_keys`]: API key CRUD for the caller
//! - [`credits`]: Credit balance
//! - [`billing`]: Plans, packages, checkout, payment verification, coupons, transactions
//! - [`admin_users`]: User management and credit overrides
//! - [`admin`]: Cross-user jobs, transactions, API keys and the activity log
//! - [`pricing`]: Plan and coupon management
//! - [`servers`]: Validation-server pool management

pub mod admin;
pub mod admin_users;
pub mod api_keys;
pub mod auth;
pub mod billing;
pub mod credits;
pub mod pricing;
pub mod servers;
pub mod validation;
