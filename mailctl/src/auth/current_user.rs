use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use chrono::Utc;
use tracing::{debug, instrument, trace};

use crate::{
    AppState,
    admin::activity::client_ip,
    api::models::users::CurrentUser,
    crypto::hash_api_key,
    db::{
        handlers::{ApiKeys, Repository, Users},
        models::activity::Actor,
    },
    errors::{Error, Result},
    types::{Operation, abbrev_uuid},
};

/// Header accepted as an alternative to `Authorization: Bearer`.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Pull the raw key out of the request headers.
/// Returns:
/// - None: no credentials present
/// - Some(Ok(key)): a key was found
/// - Some(Err(error)): an auth header was present but unreadable
pub fn extract_api_key(headers: &HeaderMap) -> Option<Result<String>> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = match value.to_str() {
            Ok(s) => s,
            Err(e) => {
                return Some(Err(Error::BadRequest {
                    message: format!("Invalid authorization header: {e}"),
                }));
            }
        };
        if let Some(key) = value.strip_prefix("Bearer ") {
            return Some(Ok(key.trim().to_string()));
        }
    }

    let value = headers.get(API_KEY_HEADER)?;
    Some(
        value
            .to_str()
            .map(|s| s.trim().to_string())
            .map_err(|e| Error::BadRequest {
                message: format!("Invalid {API_KEY_HEADER} header: {e}"),
            }),
    )
}

/// Resolve a raw key to its principal, applying the key's rate limit and counting the use.
#[instrument(skip_all, err)]
pub async fn authenticate(state: &AppState, raw_key: &str) -> Result<CurrentUser> {
    let keys = ApiKeys::new(&state.db);
    let Some(key) = keys.get_by_hash(&hash_api_key(raw_key))? else {
        return Err(Error::Unauthenticated {
            message: Some("Invalid API key".to_string()),
        });
    };
    if !key.is_active {
        return Err(Error::Unauthenticated {
            message: Some("API key has been revoked".to_string()),
        });
    }

    let user = Users::new(&state.db).get_by_id(key.user_id)?.filter(|u| u.is_active).ok_or(Error::Unauthenticated {
        message: Some("Account is disabled".to_string()),
    })?;

    let now = Utc::now();
    state.limiters.api_keys.check(key.id, key.rate_limit_per_minute, now).await?;
    keys.record_usage(key.id, now)?;

    Ok(CurrentUser {
        id: user.id,
        email: user.email,
        name: user.name,
        role: user.role,
        api_key_id: key.id,
    })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let raw_key = match extract_api_key(&parts.headers) {
            Some(key) => key?,
            None => {
                trace!("No API key present");
                return Err(Error::Unauthenticated { message: None });
            }
        };
        let user = authenticate(state, &raw_key).await?;
        debug!(user_id = %abbrev_uuid(&user.id), "Authenticated request");
        Ok(user)
    }
}

/// An authenticated admin, together with the actor identity recorded in the activity log.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub user: CurrentUser,
    pub actor: Actor,
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(Error::InsufficientPermissions {
                action: Operation::Administer,
                resource: "the platform".to_string(),
            });
        }
        let actor = Actor {
            user_id: user.id,
            email: user.email.clone(),
            ip: client_ip(&parts.headers),
        };
        Ok(AdminUser { user, actor })
    }
}
