//! OpenAPI documentation for the `/api/v1` surface, served by Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Bearer API key authentication.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("API Key")
                        .description(Some(
                            "API key authentication. Include your key in the `Authorization` header:\n\n\
                            ```\nAuthorization: Bearer sk-...\n```\n\n\
                            The `X-API-Key` header is accepted as well. Keys are issued at registration, login, \
                            or through `POST /keys`.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api/v1", description = "mailctl API")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::me,
        api::handlers::validation::validate_one,
        api::handlers::validation::submit_bulk,
        api::handlers::validation::list_jobs,
        api::handlers::validation::get_job,
        api::handlers::validation::cancel_job,
        api::handlers::validation::job_results,
        api::handlers::api_keys::list_keys,
        api::handlers::api_keys::create_key,
        api::handlers::api_keys::get_key,
        api::handlers::api_keys::update_key,
        api::handlers::api_keys::revoke_key,
        api::handlers::credits::get_balance,
        api::handlers::billing::list_plans,
        api::handlers::billing::list_packages,
        api::handlers::billing::checkout_plan,
        api::handlers::billing::checkout_credits,
        api::handlers::billing::verify_payment,
        api::handlers::billing::validate_coupon,
        api::handlers::billing::list_transactions,
        api::handlers::admin_users::list_users,
        api::handlers::admin_users::create_user,
        api::handlers::admin_users::get_user,
        api::handlers::admin_users::update_user,
        api::handlers::admin_users::delete_user,
        api::handlers::admin_users::adjust_credits,
        api::handlers::admin_users::set_credits,
        api::handlers::admin_users::set_role,
        api::handlers::admin_users::activate_user,
        api::handlers::admin_users::deactivate_user,
        api::handlers::admin_users::reset_password,
        api::handlers::admin_users::set_plan,
        api::handlers::admin_users::bulk_action,
        api::handlers::admin::list_jobs,
        api::handlers::admin::cancel_job,
        api::handlers::admin::list_transactions,
        api::handlers::admin::list_api_keys,
        api::handlers::admin::revoke_api_key,
        api::handlers::admin::delete_api_key,
        api::handlers::admin::list_activity,
        api::handlers::pricing::list_plans,
        api::handlers::pricing::create_plan,
        api::handlers::pricing::update_plan,
        api::handlers::pricing::delete_plan,
        api::handlers::pricing::list_coupons,
        api::handlers::pricing::create_coupon,
        api::handlers::pricing::get_coupon,
        api::handlers::pricing::update_coupon,
        api::handlers::pricing::delete_coupon,
        api::handlers::servers::list_servers,
        api::handlers::servers::create_server,
        api::handlers::servers::get_server,
        api::handlers::servers::update_server,
        api::handlers::servers::delete_server,
        api::handlers::servers::test_url,
        api::handlers::servers::test_server,
    ),
    components(
        schemas(
            api::models::pagination::PageInfo,
            api::models::users::UserResponse,
            api::models::users::UserDetailResponse,
            api::models::users::RegisterRequest,
            api::models::users::LoginRequest,
            api::models::users::AuthResponse,
            api::models::users::AdminUserCreate,
            api::models::users::AdminUserUpdate,
            api::models::users::RoleUpdate,
            api::models::users::CreditAdjustRequest,
            api::models::users::CreditSetRequest,
            api::models::users::CreditChangeResponse,
            api::models::users::SetPlanRequest,
            api::models::users::PasswordResetResponse,
            api::models::api_keys::ApiKeyCreate,
            api::models::api_keys::ApiKeyUpdate,
            api::models::api_keys::ApiKeyResponse,
            api::models::api_keys::ApiKeyCreatedResponse,
            api::models::jobs::SingleValidationRequest,
            api::models::jobs::SingleValidationResponse,
            api::models::jobs::BulkSubmitResponse,
            api::models::jobs::JobResponse,
            api::models::jobs::CancelJobResponse,
            api::models::jobs::ResultFormat,
            api::models::billing::PlanResponse,
            api::models::billing::PlanCheckoutRequest,
            api::models::billing::CreditsCheckoutRequest,
            api::models::billing::VerifyPaymentRequest,
            api::models::billing::VerifyPaymentResponse,
            api::models::billing::CouponValidateRequest,
            api::models::billing::TransactionResponse,
            api::models::billing::TransactionAmount,
            api::models::billing::TransactionCredits,
            api::models::pricing::PlanCreate,
            api::models::pricing::PlanUpdate,
            api::models::pricing::CouponCreate,
            api::models::pricing::CouponUpdate,
            api::models::pricing::CouponResponse,
            api::models::servers::ServerCreate,
            api::models::servers::ServerUpdate,
            api::models::servers::ServerTestRequest,
            api::models::servers::ServerResponse,
            api::models::activity::ActivityResponse,
            crate::admin::BulkAction,
            crate::admin::BulkParams,
            crate::admin::BulkRequest,
            crate::admin::BulkOutcome,
            crate::admin::BulkResponse,
            crate::billing::Checkout,
            crate::checker::CheckOptions,
            crate::checker::Checks,
            crate::config::CreditPackage,
            crate::coupons::DiscountType,
            crate::coupons::Evaluation,
            crate::coupons::IneligibleReason,
            crate::db::models::activity::ActivityAction,
            crate::db::models::activity::TargetType,
            crate::db::models::transactions::TransactionType,
            crate::db::models::transactions::TransactionStatus,
            crate::jobs::EmailResult,
            crate::jobs::JobKind,
            crate::jobs::JobStatus,
            crate::jobs::Verdict,
            crate::ledger::BalanceSnapshot,
            crate::ledger::PlanAssignment,
            crate::payment_providers::CheckoutItem,
            crate::servers::ProbeResult,
            crate::types::Role,
        )
    ),
    tags(
        (name = "auth", description = "Registration, login and the current user."),
        (name = "validation", description = "Validate single addresses inline, or upload lists as background jobs.

Bulk jobs reserve one credit per address when submitted. Credits are consumed as addresses are checked, and whatever was not consumed is refunded when the job completes, fails or is cancelled. Poll `GET /validate/jobs/{id}` for progress, or pass a `webhook_url` to be notified once."),
        (name = "api_keys", description = "Create, rename and revoke your API keys. A key's secret is only shown when it is created."),
        (name = "credits", description = "Your credit balance."),
        (name = "billing", description = "Plans, credit packages, coupons and payments.

Checkout prices the purchase and opens a payment session. Credits are added when the session is verified, and each session is applied at most once."),
        (name = "admin_users", description = "User management. Every change is recorded in the activity log."),
        (name = "admin", description = "Cross-user views of jobs, transactions, API keys and the activity log."),
        (name = "admin_pricing", description = "Plan and coupon management."),
        (name = "admin_servers", description = "The pool of validation servers that perform checks."),
    ),
    info(
        title = "mailctl API",
        version = "1.0.0",
        description = "Email validation with credit-based billing.

## Authentication

Every endpoint except registration and login requires an API key:

```
Authorization: Bearer sk-...
```

## Errors

Errors are JSON objects with a `message` field. A `402` response also carries `required` and `available` credit counts.",
    ),
)]
pub struct ApiDoc;
