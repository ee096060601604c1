//! Request authentication.
//!
//! Every API call carries its principal as an API key, either `Authorization: Bearer sk-...` or
//! `X-API-Key: sk-...`. The key is looked up by digest, checked against its owner's status, rate
//! limited per key, and counted. There is no process-wide current user.
//!
//! - [`current_user`]: the [`CurrentUser`](crate::api::models::users::CurrentUser) and
//!   [`AdminUser`](current_user::AdminUser) extractors
//! - [`password`]: Argon2 password hashing for login

pub mod current_user;
pub mod password;
