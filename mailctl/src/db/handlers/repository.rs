//! Base repository trait for store operations.

use std::collections::HashMap;

use crate::db::errors::Result;

/// Base repository trait providing common store operations.
///
/// A repository is the data access layer for one table. It provides methods for creating,
/// reading, updating, and deleting entities, as well as listing them with simple filters. Each
/// repository has separate associated types for create requests, update requests, and responses.
pub trait Repository {
    /// The request type for creating entities
    type CreateRequest;

    /// The request type for updating entities
    type UpdateRequest;

    /// The response/DTO type returned by operations
    type Response;

    /// The identifier type for lookups
    type Id: Send + Sync;

    /// The filter type for list operations
    type Filter: Send + Sync;

    /// Create a new entity
    fn create(&self, request: &Self::CreateRequest) -> Result<Self::Response>;

    /// Get an entity by ID
    fn get_by_id(&self, id: Self::Id) -> Result<Option<Self::Response>>;

    /// Get lots of entities by their IDs, keyed by ID
    fn get_bulk(&self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>>;

    /// List entities with filtering and pagination
    fn list(&self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    /// Delete an entity by ID
    fn delete(&self, id: Self::Id) -> Result<bool>;

    /// Update an entity by ID
    fn update(&self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;
}
