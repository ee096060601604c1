//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! Everything is mounted under `/api/v1`:
//!
//! - **Authentication** (`/auth/*`): Registration, login, current user
//! - **Validation** (`/validate/*`): Single checks, bulk uploads, job polling and results
//! - **API keys** (`/keys/*`): Key management for the caller
//! - **Credits & billing** (`/credits`, `/billing/*`): Balance, plans, checkout, transactions
//! - **Admin** (`/admin/*`): User, job, key, pricing and server management plus the activity log
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations; the rendered reference is served at
//! `/docs`.

pub mod handlers;
pub mod models;
