pub mod activity;
pub mod api_keys;
pub mod coupons;
pub mod payments;
pub mod plans;
pub mod servers;
pub mod transactions;
pub mod users;
