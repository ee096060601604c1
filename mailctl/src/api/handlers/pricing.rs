//! Plan and coupon administration under `/admin/pricing`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use crate::{
    AppState,
    admin::activity::record,
    api::models::{
        billing::PlanResponse,
        pricing::{CouponCreate, CouponResponse, CouponUpdate, PlanCreate, PlanUpdate},
    },
    auth::current_user::AdminUser,
    coupons::Coupon,
    db::{
        handlers::{Coupons, Plans, Repository},
        models::{
            activity::{ActivityAction, TargetType},
            coupons::CouponFilter,
            plans::{PlanDBResponse, PlanFilter},
        },
    },
    errors::{Error, Result},
    types::{CouponId, PlanId, abbrev_uuid},
};

fn plan(state: &AppState, id: PlanId) -> Result<PlanDBResponse> {
    Plans::new(&state.db).get_by_id(id)?.ok_or_else(|| Error::NotFound {
        resource: "Plan".to_string(),
        id: id.to_string(),
    })
}

fn coupon(state: &AppState, id: CouponId) -> Result<Coupon> {
    Coupons::new(&state.db).get_by_id(id)?.ok_or_else(|| Error::NotFound {
        resource: "Coupon".to_string(),
        id: id.to_string(),
    })
}

/// Every plan, including inactive ones
#[utoipa::path(
    get,
    path = "/admin/pricing/plans",
    tag = "admin_pricing",
    summary = "List plans",
    responses(
        (status = 200, description = "All plans", body = Vec<PlanResponse>),
        (status = 403, description = "Caller is not an admin"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_plans(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<Vec<PlanResponse>>> {
    let plans = Plans::new(&state.db).list(&PlanFilter::default())?;
    Ok(Json(plans.into_iter().map(PlanResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/admin/pricing/plans",
    tag = "admin_pricing",
    summary = "Create plan",
    request_body = PlanCreate,
    responses(
        (status = 201, description = "Plan created", body = PlanResponse),
        (status = 400, description = "Invalid price, credits or billing period"),
        (status = 409, description = "Plan name already in use"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(name = %request.name))]
pub async fn create_plan(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(request): Json<PlanCreate>,
) -> Result<(StatusCode, Json<PlanResponse>)> {
    let plan = Plans::new(&state.db).create(&request.into())?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::CreatePlan,
        TargetType::Plan,
        Some(plan.id.to_string()),
        &plan.name,
        json!({ "price": plan.price, "credits_limit": plan.credits_limit }),
    );
    Ok((StatusCode::CREATED, Json(plan.into())))
}

/// Update a plan. Existing subscribers keep their current terms until their next renewal.
#[utoipa::path(
    put,
    path = "/admin/pricing/plans/{id}",
    tag = "admin_pricing",
    summary = "Update plan",
    params(("id" = uuid::Uuid, Path, description = "Plan ID")),
    request_body = PlanUpdate,
    responses(
        (status = 200, description = "Updated plan", body = PlanResponse),
        (status = 400, description = "Invalid price, credits or billing period"),
        (status = 404, description = "Plan not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin, request), fields(plan_id = %abbrev_uuid(&id)))]
pub async fn update_plan(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<PlanId>,
    Json(request): Json<PlanUpdate>,
) -> Result<Json<PlanResponse>> {
    plan(&state, id)?;
    let changes = serde_json::to_value(&request).unwrap_or_default();
    let updated = Plans::new(&state.db).update(id, &request.into())?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::UpdatePlan,
        TargetType::Plan,
        Some(id.to_string()),
        &updated.name,
        changes,
    );
    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/admin/pricing/plans/{id}",
    tag = "admin_pricing",
    summary = "Delete plan",
    params(("id" = uuid::Uuid, Path, description = "Plan ID")),
    responses(
        (status = 204, description = "Plan deleted"),
        (status = 404, description = "Plan not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin), fields(plan_id = %abbrev_uuid(&id)))]
pub async fn delete_plan(State(state): State<AppState>, admin: AdminUser, Path(id): Path<PlanId>) -> Result<StatusCode> {
    let existing = plan(&state, id)?;
    Plans::new(&state.db).delete(id)?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::DeletePlan,
        TargetType::Plan,
        Some(id.to_string()),
        &existing.name,
        json!({}),
    );
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/admin/pricing/coupons",
    tag = "admin_pricing",
    summary = "List coupons",
    responses(
        (status = 200, description = "All coupons", body = Vec<CouponResponse>),
        (status = 403, description = "Caller is not an admin"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_coupons(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<Vec<CouponResponse>>> {
    let coupons = Coupons::new(&state.db).list(&CouponFilter::default())?;
    Ok(Json(coupons.into_iter().map(CouponResponse::from).collect()))
}

/// Create a coupon. Codes are stored upper-case and matched case-insensitively.
#[utoipa::path(
    post,
    path = "/admin/pricing/coupons",
    tag = "admin_pricing",
    summary = "Create coupon",
    request_body = CouponCreate,
    responses(
        (status = 201, description = "Coupon created", body = CouponResponse),
        (status = 400, description = "Invalid code or terms"),
        (status = 409, description = "Code already in use"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(code = %request.code))]
pub async fn create_coupon(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(request): Json<CouponCreate>,
) -> Result<(StatusCode, Json<CouponResponse>)> {
    let coupon = Coupons::new(&state.db).create(&request.into_db(Utc::now()))?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::CreateCoupon,
        TargetType::Coupon,
        Some(coupon.id.to_string()),
        &coupon.code,
        json!({ "discount_type": coupon.discount_type, "discount_value": coupon.discount_value }),
    );
    Ok((StatusCode::CREATED, Json(coupon.into())))
}

#[utoipa::path(
    get,
    path = "/admin/pricing/coupons/{id}",
    tag = "admin_pricing",
    summary = "Get coupon",
    params(("id" = uuid::Uuid, Path, description = "Coupon ID")),
    responses(
        (status = 200, description = "Coupon", body = CouponResponse),
        (status = 404, description = "Coupon not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn get_coupon(State(state): State<AppState>, _admin: AdminUser, Path(id): Path<CouponId>) -> Result<Json<CouponResponse>> {
    Ok(Json(coupon(&state, id)?.into()))
}

/// Update a coupon. Send `null` to clear `max_discount`, `max_uses` or `expires_at`.
#[utoipa::path(
    put,
    path = "/admin/pricing/coupons/{id}",
    tag = "admin_pricing",
    summary = "Update coupon",
    params(("id" = uuid::Uuid, Path, description = "Coupon ID")),
    request_body = CouponUpdate,
    responses(
        (status = 200, description = "Updated coupon", body = CouponResponse),
        (status = 400, description = "Invalid terms"),
        (status = 404, description = "Coupon not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin, request), fields(coupon_id = %abbrev_uuid(&id)))]
pub async fn update_coupon(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<CouponId>,
    Json(request): Json<CouponUpdate>,
) -> Result<Json<CouponResponse>> {
    coupon(&state, id)?;
    let changes = serde_json::to_value(&request).unwrap_or_default();
    let updated = Coupons::new(&state.db).update(id, &request.into())?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::UpdateCoupon,
        TargetType::Coupon,
        Some(id.to_string()),
        &updated.code,
        changes,
    );
    Ok(Json(updated.into()))
}

/// Delete a coupon. Redemptions already applied are unaffected.
#[utoipa::path(
    delete,
    path = "/admin/pricing/coupons/{id}",
    tag = "admin_pricing",
    summary = "Delete coupon",
    params(("id" = uuid::Uuid, Path, description = "Coupon ID")),
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 404, description = "Coupon not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin), fields(coupon_id = %abbrev_uuid(&id)))]
pub async fn delete_coupon(State(state): State<AppState>, admin: AdminUser, Path(id): Path<CouponId>) -> Result<StatusCode> {
    let existing = coupon(&state, id)?;
    Coupons::new(&state.db).delete(id)?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::DeleteCoupon,
        TargetType::Coupon,
        Some(id.to_string()),
        &existing.code,
        json!({ "current_uses": existing.current_uses }),
    );
    Ok(StatusCode::NO_CONTENT)
}
