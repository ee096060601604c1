//! Repository for users.

use std::collections::HashMap;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::{DbError, Result},
    handlers::{paginate, repository::Repository},
    models::users::{UserCreateDBRequest, UserDBResponse, UserFilter, UserUpdateDBRequest},
};
use crate::types::{UserId, abbrev_uuid};

pub struct Users<'c> {
    db: &'c Database,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    fn matches(user: &UserDBResponse, filter: &UserFilter) -> bool {
        if filter.role.is_some_and(|role| user.role != role) {
            return false;
        }
        if filter.is_active.is_some_and(|active| user.is_active != active) {
            return false;
        }
        match filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(term) => {
                let term = term.to_lowercase();
                user.email.to_lowercase().contains(&term) || user.name.to_lowercase().contains(&term)
            }
            None => true,
        }
    }

    /// Claim `email` in the unique index for `user_id`.
    fn claim_email(&self, email: &str, user_id: UserId) -> Result<()> {
        match self.db.tables().user_emails.entry(Self::normalize_email(email)) {
            Entry::Occupied(existing) if *existing.get() != user_id => Err(DbError::UniqueViolation {
                table: "users",
                field: "email",
                value: email.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(user_id);
                Ok(())
            }
        }
    }

    #[instrument(skip(self, email), err)]
    pub fn get_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let Some(id) = self.db.tables().user_emails.get(&Self::normalize_email(email)).map(|id| *id) else {
            return Ok(None);
        };
        self.get_by_id(id)
    }

    /// Number of users matching the filter, ignoring `skip` and `limit`.
    pub fn count(&self, filter: &UserFilter) -> Result<i64> {
        Ok(self.db.tables().users.iter().filter(|u| Self::matches(u.value(), filter)).count() as i64)
    }
}

impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    fn create(&self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let email = request.email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(DbError::CheckViolation {
                table: "users",
                message: "A valid email address is required".to_string(),
            });
        }

        let id = Uuid::new_v4();
        self.claim_email(&email, id)?;

        let now = Utc::now();
        let user = UserDBResponse {
            id,
            email,
            name: request.name.trim().to_string(),
            role: request.role,
            is_active: true,
            password_hash: request.password_hash.clone(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        self.db.tables().users.insert(id, user.clone());
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    fn get_by_id(&self, id: Self::Id) -> Result<Option<Self::Response>> {
        Ok(self.db.tables().users.get(&id).map(|u| u.clone()))
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    fn get_bulk(&self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        Ok(ids
            .into_iter()
            .filter_map(|id| self.db.tables().users.get(&id).map(|u| (id, u.clone())))
            .collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    fn list(&self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut users: Vec<UserDBResponse> = self
            .db
            .tables()
            .users
            .iter()
            .filter(|u| Self::matches(u.value(), filter))
            .map(|u| u.clone())
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(users, filter.skip, filter.limit))
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    fn delete(&self, id: Self::Id) -> Result<bool> {
        let Some((_, user)) = self.db.tables().users.remove(&id) else {
            return Ok(false);
        };
        self.db
            .tables()
            .user_emails
            .remove_if(&Self::normalize_email(&user.email), |_, owner| *owner == id);
        Ok(true)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    fn update(&self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let current = self.get_by_id(id)?.ok_or(DbError::NotFound)?;

        // Claim the new address before touching the record so a conflict leaves it unchanged
        let new_email = request
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| Self::normalize_email(email) != Self::normalize_email(&current.email));
        if let Some(email) = new_email {
            self.claim_email(email, id)?;
        }

        let updated = {
            let mut user = self.db.tables().users.get_mut(&id).ok_or(DbError::NotFound)?;
            if let Some(email) = new_email {
                user.email = email.to_string();
            }
            if let Some(name) = &request.name {
                user.name = name.trim().to_string();
            }
            if let Some(role) = request.role {
                user.role = role;
            }
            if let Some(is_active) = request.is_active {
                user.is_active = is_active;
            }
            if let Some(hash) = &request.password_hash {
                user.password_hash = Some(hash.clone());
            }
            if let Some(at) = request.last_login_at {
                user.last_login_at = Some(at);
            }
            user.updated_at = Utc::now();
            user.clone()
        };

        if new_email.is_some() {
            self.db
                .tables()
                .user_emails
                .remove_if(&Self::normalize_email(&current.email), |_, owner| *owner == id);
        }
        Ok(updated)
    }
}
