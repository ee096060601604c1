pub mod activity;
pub mod api_keys;
pub mod billing;
pub mod jobs;
pub mod pagination;
pub mod pricing;
pub mod servers;
pub mod users;
