//! Terminal-state notifications for validation jobs.
//!
//! - [`signing`]: HMAC-SHA256 signatures per the Standard Webhooks scheme
//! - [`events`]: `job.completed` / `job.failed` / `job.cancelled` payloads
//! - [`dispatcher`]: fire-and-forget delivery through a bounded channel

pub mod dispatcher;
pub mod events;
pub mod signing;

pub use dispatcher::WebhookSender;
pub use events::{WebhookEvent, WebhookEventType};
