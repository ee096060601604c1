use axum::{extract::State, response::Json};

use crate::{AppState, api::models::users::CurrentUser, errors::Result, ledger::BalanceSnapshot};

/// The caller's credit account
#[utoipa::path(
    get,
    path = "/credits",
    tag = "credits",
    summary = "Credit balance",
    description = "Balance split into plan and purchased credits, the amount held by running jobs, and the current plan.",
    responses(
        (status = 200, description = "Balance snapshot", body = BalanceSnapshot),
        (status = 401, description = "Missing or invalid API key"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn get_balance(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<BalanceSnapshot>> {
    Ok(Json(state.ledger.balance(current_user.id)?))
}

#[cfg(test)]
mod tests {
    use crate::jobs::JobKind;
    use crate::test_utils::*;
    use serde_json::Value;

    #[test_log::test(tokio::test)]
    async fn test_balance_reflects_holds() {
        let app = create_test_app().await;
        let (user, key) = create_test_user(&app.state, 50);
        app.state
            .jobs
            .submit(
                user.id,
                JobKind::Single,
                vec!["a@company.io".to_string(), "b@company.io".to_string()],
                None,
                None,
            )
            .unwrap();

        let (name, value) = auth_header(&key);
        let response = app.server.get("/api/v1/credits").add_header(name, value).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["balance"], 50);
        assert_eq!(body["purchased_credits"], 50);
        assert_eq!(body["reserved"], 2);
        assert_eq!(body["available"], 48);
        assert!(body["plan"].is_null());
    }

    #[test_log::test(tokio::test)]
    async fn test_balance_requires_key() {
        let app = create_test_app().await;
        app.server.get("/api/v1/credits").await.assert_status_unauthorized();
    }
}
