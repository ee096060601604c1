//! Append-only store for the admin activity log.

use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::Result,
    handlers::paginate,
    models::activity::{ActivityCreateDBRequest, ActivityDBResponse, ActivityFilter, Actor},
};

pub struct Activity<'c> {
    db: &'c Database,
}

impl<'c> Activity<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    fn matches(entry: &ActivityDBResponse, filter: &ActivityFilter) -> bool {
        filter.action.is_none_or(|action| entry.action == action) && filter.admin_id.is_none_or(|admin| entry.admin_id == admin)
    }

    #[instrument(skip_all, fields(action = ?request.action, admin = %actor.email))]
    pub fn append(&self, actor: &Actor, request: ActivityCreateDBRequest) -> ActivityDBResponse {
        let entry = ActivityDBResponse {
            id: Uuid::new_v4(),
            action: request.action,
            admin_id: actor.user_id,
            admin_email: actor.email.clone(),
            target_type: request.target_type,
            target_id: request.target_id,
            target_label: request.target_label,
            details: request.details,
            ip: actor.ip.clone(),
            created_at: Utc::now(),
        };
        self.db.tables().activity.write().push(entry.clone());
        entry
    }

    /// Newest first.
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    pub fn list(&self, filter: &ActivityFilter) -> Result<Vec<ActivityDBResponse>> {
        let log = self.db.tables().activity.read();
        Ok(paginate(
            log.iter().rev().filter(|entry| Self::matches(entry, filter)).cloned(),
            filter.skip,
            filter.limit,
        ))
    }

    pub fn count(&self, filter: &ActivityFilter) -> Result<i64> {
        Ok(self.db.tables().activity.read().iter().filter(|e| Self::matches(e, filter)).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::activity::{ActivityAction, TargetType};
    use serde_json::json;

    #[test]
    fn test_append_captures_actor() {
        let db = Database::new();
        let log = Activity::new(&db);
        let actor = Actor {
            user_id: Uuid::new_v4(),
            email: "admin@example.com".to_string(),
            ip: Some("10.0.0.1".to_string()),
        };

        log.append(
            &actor,
            ActivityCreateDBRequest {
                action: ActivityAction::AdjustCredits,
                target_type: TargetType::User,
                target_id: None,
                target_label: "user@example.com".to_string(),
                details: json!({"delta": 50}),
            },
        );
        log.append(
            &actor,
            ActivityCreateDBRequest {
                action: ActivityAction::RevokeApiKey,
                target_type: TargetType::ApiKey,
                target_id: None,
                target_label: "sk-abc...wxyz".to_string(),
                details: json!({}),
            },
        );

        let entries = log.list(&ActivityFilter::new(0, 10)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, ActivityAction::RevokeApiKey);
        assert_eq!(entries[1].ip.as_deref(), Some("10.0.0.1"));

        let mut filter = ActivityFilter::new(0, 10);
        filter.action = Some(ActivityAction::AdjustCredits);
        assert_eq!(log.count(&filter).unwrap(), 1);
    }
}
