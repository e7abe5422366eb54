//! Customer portal route.
//!
//! Authenticated by an opaque token minted by staff, not by gateway
//! headers. A token grants exactly one customer identity on exactly one
//! work order; unknown tokens are indistinguishable from expired ones.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;

use autoshop_workorder::{
    ApplyDecisions, AuthorizationMethod, WORK_ORDER_AGGREGATE_TYPE, WorkOrder, WorkOrderCommand,
    WorkOrderId,
};

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new().route("/portal/:token/decisions", post(portal_decisions))
}

async fn portal_decisions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(token): Path<String>,
    Json(body): Json<dto::DecisionsRequest>,
) -> Result<Response, Response> {
    let grant = services.resolve_portal_token(&token).ok_or_else(|| {
        errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "unknown or expired portal link",
        )
    })?;

    let decisions = dto::parse_decisions(&body)?;
    let command = WorkOrderCommand::ApplyDecisions(ApplyDecisions {
        shop_id: grant.shop_id,
        work_order_id: grant.work_order_id,
        decisions,
        method: AuthorizationMethod::CustomerPortal,
        authorized_by: body.authorized_by.or(grant.customer_name.clone()),
        occurred_at: Utc::now(),
    });

    services
        .dispatch::<WorkOrder>(
            grant.shop_id,
            grant.work_order_id.0,
            WORK_ORDER_AGGREGATE_TYPE,
            command,
            |_, id| WorkOrder::empty(WorkOrderId::new(id)),
        )
        .map_err(errors::dispatch_error_to_response)?;

    let wo = services
        .load_work_order(grant.shop_id, grant.work_order_id)
        .map_err(errors::dispatch_error_to_response)?;
    Ok(Json(dto::work_order_to_portal_json(&wo)).into_response())
}
