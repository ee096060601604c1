use axum::{
    extract::{Query, State},
    response::Json,
};
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        billing::{
            CouponValidateRequest, CreditsCheckoutRequest, ListTransactionsQuery, PlanCheckoutRequest, PlanResponse, TransactionResponse,
            VerifyPaymentRequest, VerifyPaymentResponse,
        },
        pagination::Paginated,
        users::CurrentUser,
    },
    billing::Checkout,
    config::CreditPackage,
    coupons::{Evaluation, PurchaseContext},
    db::models::transactions::TransactionFilter,
    errors::{Error, Result},
    types::abbrev_uuid,
};

/// Active subscription plans
#[utoipa::path(
    get,
    path = "/billing/plans",
    tag = "billing",
    summary = "List plans",
    responses(
        (status = 200, description = "Active plans", body = Vec<PlanResponse>),
        (status = 401, description = "Missing or invalid API key"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_plans(State(state): State<AppState>, _current_user: CurrentUser) -> Result<Json<Vec<PlanResponse>>> {
    Ok(Json(state.billing.plans()?.into_iter().map(PlanResponse::from).collect()))
}

/// Add-on credit packages
#[utoipa::path(
    get,
    path = "/billing/packages",
    tag = "billing",
    summary = "List credit packages",
    responses(
        (status = 200, description = "Credit packages", body = Vec<CreditPackage>),
        (status = 401, description = "Missing or invalid API key"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_packages(State(state): State<AppState>, _current_user: CurrentUser) -> Json<Vec<CreditPackage>> {
    Json(state.billing.packages().to_vec())
}

/// Start a plan subscription checkout
#[utoipa::path(
    post,
    path = "/billing/checkout",
    tag = "billing",
    summary = "Plan checkout",
    description = "Prices the plan, applying the coupon if one is given, and opens a payment session. Nothing is credited until the session is verified.",
    request_body = PlanCheckoutRequest,
    responses(
        (status = 200, description = "Checkout session", body = Checkout),
        (status = 400, description = "Coupon not eligible for this purchase"),
        (status = 404, description = "Plan or coupon not found"),
        (status = 502, description = "Payment provider error"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn checkout_plan(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<PlanCheckoutRequest>,
) -> Result<Json<Checkout>> {
    let checkout = state
        .billing
        .checkout(current_user.id, request.plan_id, request.coupon_code.as_deref())
        .await?;
    info!(session_id = %checkout.session_id, amount = %checkout.amount, "Plan checkout created");
    Ok(Json(checkout))
}

/// Start a credit package checkout
#[utoipa::path(
    post,
    path = "/billing/credits",
    tag = "billing",
    summary = "Credit package checkout",
    request_body = CreditsCheckoutRequest,
    responses(
        (status = 200, description = "Checkout session", body = Checkout),
        (status = 400, description = "Coupon not eligible for this purchase"),
        (status = 404, description = "Package or coupon not found"),
        (status = 502, description = "Payment provider error"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn checkout_credits(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<CreditsCheckoutRequest>,
) -> Result<Json<Checkout>> {
    let checkout = state
        .billing
        .buy_credits(current_user.id, &request.package_id, request.coupon_code.as_deref())
        .await?;
    info!(session_id = %checkout.session_id, amount = %checkout.amount, "Credit checkout created");
    Ok(Json(checkout))
}

/// Apply a paid checkout session to the caller's account.
#[utoipa::path(
    post,
    path = "/billing/verify",
    tag = "billing",
    summary = "Verify payment",
    description = "Each session is applied at most once. Verifying again returns the original transaction with `newly_processed` false.",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment applied", body = VerifyPaymentResponse),
        (status = 400, description = "Session not paid"),
        (status = 404, description = "Session not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id), session_id = %request.session_id))]
pub async fn verify_payment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>> {
    let verification = state.billing.verify(current_user.id, &request.session_id).await?;
    let payment = verification.payment;
    Ok(Json(VerifyPaymentResponse {
        session_id: payment.session_id,
        credits_added: payment.credits_added,
        bonus_credits: payment.bonus_credits,
        coupon_code: payment.coupon_code,
        newly_processed: verification.newly_processed,
        transaction: verification.transaction.into(),
    }))
}

/// Check what a coupon would do for a purchase, without redeeming it.
#[utoipa::path(
    post,
    path = "/billing/coupons/validate",
    tag = "billing",
    summary = "Validate coupon",
    request_body = CouponValidateRequest,
    responses(
        (status = 200, description = "Evaluation; `eligible` is false with a `reason` when the coupon cannot be used", body = Evaluation),
        (status = 400, description = "Negative amount"),
        (status = 404, description = "Coupon not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<CouponValidateRequest>,
) -> Result<Json<Evaluation>> {
    if request.amount.is_sign_negative() {
        return Err(Error::BadRequest {
            message: "amount cannot be negative".to_string(),
        });
    }
    let ctx = PurchaseContext {
        amount: request.amount,
        plan: request.plan,
    };
    Ok(Json(state.billing.validate_coupon(current_user.id, &request.code, &ctx)?))
}

/// The caller's transaction history, newest first
#[utoipa::path(
    get,
    path = "/billing/transactions",
    tag = "billing",
    summary = "List transactions",
    params(ListTransactionsQuery),
    responses(
        (status = 200, description = "Page of transactions", body = Paginated<TransactionResponse>),
        (status = 401, description = "Missing or invalid API key"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Paginated<TransactionResponse>>> {
    let filter = TransactionFilter {
        user_id: Some(current_user.id),
        transaction_type: query.transaction_type,
        ..TransactionFilter::new(query.pagination.skip(), query.pagination.limit())
    };
    let (transactions, total) = state.billing.transactions(&filter)?;
    Ok(Json(Paginated::new(
        transactions.into_iter().map(TransactionResponse::from).collect(),
        total,
        &query.pagination,
    )))
}
