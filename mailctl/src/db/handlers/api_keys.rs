//! Repository for API keys.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::{DbError, Result},
    handlers::{paginate, repository::Repository},
    models::api_keys::{ApiKeyCreateDBRequest, ApiKeyDBResponse, ApiKeyFilter, ApiKeyUpdateDBRequest},
};
use crate::crypto::{generate_api_key, hash_api_key, key_preview};
use crate::types::{ApiKeyId, UserId, abbrev_uuid};

pub struct ApiKeys<'c> {
    db: &'c Database,
}

impl<'c> ApiKeys<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    fn matches(key: &ApiKeyDBResponse, filter: &ApiKeyFilter) -> bool {
        filter.user_id.is_none_or(|user_id| key.user_id == user_id) && filter.is_active.is_none_or(|active| key.is_active == active)
    }

    /// Generate a new key for `user_id`. The raw secret is returned here and nowhere else.
    pub fn issue(&self, user_id: UserId, name: &str, rate_limit_per_minute: u32) -> Result<(ApiKeyDBResponse, String)> {
        let secret = generate_api_key();
        let key = self.create(&ApiKeyCreateDBRequest {
            user_id,
            name: name.to_string(),
            key_hash: hash_api_key(&secret),
            preview: key_preview(&secret),
            rate_limit_per_minute,
        })?;
        Ok((key, secret))
    }

    /// Look a key up by the digest of its secret.
    #[instrument(skip_all, err)]
    pub fn get_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyDBResponse>> {
        let Some(id) = self.db.tables().api_key_hashes.get(key_hash).map(|id| *id) else {
            return Ok(None);
        };
        self.get_by_id(id)
    }

    pub fn count(&self, filter: &ApiKeyFilter) -> Result<i64> {
        Ok(self.db.tables().api_keys.iter().filter(|k| Self::matches(k.value(), filter)).count() as i64)
    }

    /// Revoke a key. Revocation is terminal and idempotent; the record is kept.
    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&id)), err)]
    pub fn revoke(&self, id: ApiKeyId) -> Result<ApiKeyDBResponse> {
        let mut key = self.db.tables().api_keys.get_mut(&id).ok_or(DbError::NotFound)?;
        if key.is_active {
            key.is_active = false;
            key.revoked_at = Some(Utc::now());
        }
        Ok(key.clone())
    }

    /// Count one authenticated use of the key.
    pub fn record_usage(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<ApiKeyDBResponse> {
        let mut key = self.db.tables().api_keys.get_mut(&id).ok_or(DbError::NotFound)?;
        key.usage_count += 1;
        key.last_used_at = Some(at);
        Ok(key.clone())
    }

    /// Remove every key owned by `user_id`, returning how many were removed.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub fn delete_for_user(&self, user_id: UserId) -> Result<usize> {
        let ids: Vec<ApiKeyId> = self
            .db
            .tables()
            .api_keys
            .iter()
            .filter(|k| k.user_id == user_id)
            .map(|k| k.id)
            .collect();
        let mut removed = 0;
        for id in ids {
            if self.delete(id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl<'c> Repository for ApiKeys<'c> {
    type CreateRequest = ApiKeyCreateDBRequest;
    type UpdateRequest = ApiKeyUpdateDBRequest;
    type Response = ApiKeyDBResponse;
    type Id = ApiKeyId;
    type Filter = ApiKeyFilter;

    #[instrument(skip(self, request), fields(name = %request.name, user_id = %abbrev_uuid(&request.user_id)), err)]
    fn create(&self, request: &Self::CreateRequest) -> Result<Self::Response> {
        if request.rate_limit_per_minute == 0 {
            return Err(DbError::CheckViolation {
                table: "api_keys",
                message: "rate_limit_per_minute must be at least 1".to_string(),
            });
        }

        let id = Uuid::new_v4();
        match self.db.tables().api_key_hashes.entry(request.key_hash.clone()) {
            Entry::Occupied(_) => {
                return Err(DbError::UniqueViolation {
                    table: "api_keys",
                    field: "key_hash",
                    value: request.preview.clone(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let key = ApiKeyDBResponse {
            id,
            user_id: request.user_id,
            name: request.name.trim().to_string(),
            key_hash: request.key_hash.clone(),
            preview: request.preview.clone(),
            is_active: true,
            usage_count: 0,
            rate_limit_per_minute: request.rate_limit_per_minute,
            created_at: Utc::now(),
            last_used_at: None,
            revoked_at: None,
        };
        self.db.tables().api_keys.insert(id, key.clone());
        Ok(key)
    }

    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&id)), err)]
    fn get_by_id(&self, id: Self::Id) -> Result<Option<Self::Response>> {
        Ok(self.db.tables().api_keys.get(&id).map(|k| k.clone()))
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    fn get_bulk(&self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        Ok(ids
            .into_iter()
            .filter_map(|id| self.db.tables().api_keys.get(&id).map(|k| (id, k.clone())))
            .collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    fn list(&self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut keys: Vec<ApiKeyDBResponse> = self
            .db
            .tables()
            .api_keys
            .iter()
            .filter(|k| Self::matches(k.value(), filter))
            .map(|k| k.clone())
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(keys, filter.skip, filter.limit))
    }

    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&id)), err)]
    fn delete(&self, id: Self::Id) -> Result<bool> {
        let Some((_, key)) = self.db.tables().api_keys.remove(&id) else {
            return Ok(false);
        };
        self.db.tables().api_key_hashes.remove(&key.key_hash);
        Ok(true)
    }

    #[instrument(skip(self, request), fields(api_key_id = %abbrev_uuid(&id)), err)]
    fn update(&self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        if request.rate_limit_per_minute == Some(0) {
            return Err(DbError::CheckViolation {
                table: "api_keys",
                message: "rate_limit_per_minute must be at least 1".to_string(),
            });
        }
        let mut key = self.db.tables().api_keys.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(name) = &request.name {
            key.name = name.trim().to_string();
        }
        if let Some(limit) = request.rate_limit_per_minute {
            key.rate_limit_per_minute = limit;
        }
        Ok(key.clone())
    }
}
