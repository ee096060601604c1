//! Repository for the validation-server pool.

use std::collections::HashMap;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::servers::{ServerCreateDBRequest, ServerDBResponse, ServerFilter, ServerHealthUpdate, ServerUpdateDBRequest},
};
use crate::types::{ServerId, abbrev_uuid};

pub struct Servers<'c> {
    db: &'c Database,
}

/// Trailing slashes are not significant.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn check_server(name: &str, url: &str, weight: u32) -> Result<()> {
    let message = if name.trim().is_empty() {
        "name cannot be empty"
    } else if !(url.starts_with("http://") || url.starts_with("https://")) {
        "url must be an http(s) URL"
    } else if weight == 0 {
        "weight must be at least 1"
    } else {
        return Ok(());
    };
    Err(DbError::CheckViolation {
        table: "servers",
        message: message.to_string(),
    })
}

impl<'c> Servers<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    fn claim_url(&self, url: &str, id: ServerId) -> Result<()> {
        match self.db.tables().server_urls.entry(url.to_lowercase()) {
            Entry::Occupied(existing) if *existing.get() != id => Err(DbError::UniqueViolation {
                table: "servers",
                field: "url",
                value: url.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    /// Store the outcome of a health probe.
    #[instrument(skip(self, update), fields(server_id = %abbrev_uuid(&id), healthy = update.is_healthy), err)]
    pub fn record_probe(&self, id: ServerId, update: &ServerHealthUpdate) -> Result<ServerDBResponse> {
        let mut server = self.db.tables().servers.get_mut(&id).ok_or(DbError::NotFound)?;
        server.is_healthy = update.is_healthy;
        server.response_time_ms = Some(update.response_time_ms);
        server.last_error = update.error.clone();
        server.last_checked_at = Some(update.checked_at);
        Ok(server.clone())
    }
}

impl<'c> Repository for Servers<'c> {
    type CreateRequest = ServerCreateDBRequest;
    type UpdateRequest = ServerUpdateDBRequest;
    type Response = ServerDBResponse;
    type Id = ServerId;
    type Filter = ServerFilter;

    #[instrument(skip(self, request), fields(name = %request.name, url = %request.url), err)]
    fn create(&self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let url = normalize_url(&request.url);
        check_server(&request.name, &url, request.weight)?;

        let id = Uuid::new_v4();
        self.claim_url(&url, id)?;

        let now = Utc::now();
        // New servers are assumed healthy until the first probe says otherwise
        let server = ServerDBResponse {
            id,
            name: request.name.trim().to_string(),
            url,
            weight: request.weight,
            is_healthy: true,
            response_time_ms: None,
            last_checked_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.db.tables().servers.insert(id, server.clone());
        Ok(server)
    }

    #[instrument(skip(self), fields(server_id = %abbrev_uuid(&id)), err)]
    fn get_by_id(&self, id: Self::Id) -> Result<Option<Self::Response>> {
        Ok(self.db.tables().servers.get(&id).map(|s| s.clone()))
    }

    fn get_bulk(&self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        Ok(ids
            .into_iter()
            .filter_map(|id| self.db.tables().servers.get(&id).map(|s| (id, s.clone())))
            .collect())
    }

    fn list(&self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut servers: Vec<ServerDBResponse> = self
            .db
            .tables()
            .servers
            .iter()
            .filter(|s| !filter.healthy_only || s.is_healthy)
            .map(|s| s.clone())
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(servers)
    }

    #[instrument(skip(self), fields(server_id = %abbrev_uuid(&id)), err)]
    fn delete(&self, id: Self::Id) -> Result<bool> {
        let Some((_, server)) = self.db.tables().servers.remove(&id) else {
            return Ok(false);
        };
        self.db.tables().server_urls.remove_if(&server.url.to_lowercase(), |_, owner| *owner == id);
        Ok(true)
    }

    #[instrument(skip(self, request), fields(server_id = %abbrev_uuid(&id)), err)]
    fn update(&self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let current = self.get_by_id(id)?.ok_or(DbError::NotFound)?;
        let url = request.url.as_deref().map(normalize_url).unwrap_or_else(|| current.url.clone());
        let name = request.name.clone().unwrap_or_else(|| current.name.clone());
        let weight = request.weight.unwrap_or(current.weight);
        check_server(&name, &url, weight)?;

        let url_changed = url.to_lowercase() != current.url.to_lowercase();
        if url_changed {
            self.claim_url(&url, id)?;
        }

        let updated = {
            let mut server = self.db.tables().servers.get_mut(&id).ok_or(DbError::NotFound)?;
            server.name = name.trim().to_string();
            server.url = url;
            server.weight = weight;
            if let Some(healthy) = request.is_healthy {
                server.is_healthy = healthy;
            }
            server.updated_at = Utc::now();
            server.clone()
        };

        if url_changed {
            self.db
                .tables()
                .server_urls
                .remove_if(&current.url.to_lowercase(), |_, owner| *owner == id);
        }
        Ok(updated)
    }
}
