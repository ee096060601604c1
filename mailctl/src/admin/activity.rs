//! Audit helpers for admin operations.

use axum::http::HeaderMap;
use serde_json::Value;

use crate::db::{
    Database,
    handlers::Activity,
    models::activity::{ActivityAction, ActivityCreateDBRequest, ActivityDBResponse, Actor, TargetType},
};

/// Client address as reported by the fronting proxy. The first `x-forwarded-for` hop wins over
/// `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    forwarded.or_else(real_ip).map(str::to_string)
}

/// Append one entry to the activity log.
pub fn record(
    db: &Database,
    actor: &Actor,
    action: ActivityAction,
    target_type: TargetType,
    target_id: Option<String>,
    target_label: impl Into<String>,
    details: Value,
) -> ActivityDBResponse {
    Activity::new(db).append(
        actor,
        ActivityCreateDBRequest {
            action,
            target_type,
            target_id,
            target_label: target_label.into(),
            details,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.9"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }
}
