//! Staff-facing work order routes.
//!
//! All writes go through the command dispatcher (optimistic concurrency
//! on the stream). Detail reads rehydrate the aggregate for the
//! authoritative view; the list read comes from the projection.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use autoshop_core::{
    AggregateId, AppointmentId, Cents, CustomerId, Quantity, ServiceId, ShopId, TechnicianId,
    VehicleId,
};
use autoshop_workorder::{
    AddItem, ApplyDecisions, AuthorizationMethod, ChangeStatus, ItemId, ItemType, OpenWorkOrder,
    PaymentId, PaymentMethod, RecordPayment, RemoveItem, SetDiscount, SetNotes, SetTaxRate,
    UpdateItem, WORK_ORDER_AGGREGATE_TYPE, WorkOrder, WorkOrderCommand, WorkOrderId,
    WorkOrderStatus,
};

use crate::app::{
    dto::{self, parse_id},
    errors,
    services::AppServices,
};
use crate::context::{ShopContext, StaffContext};

pub fn router() -> Router {
    Router::new()
        .route("/work-orders", post(create_work_order).get(list_work_orders))
        .route("/work-orders/:id", get(get_work_order))
        .route("/work-orders/:id/status", post(change_status))
        .route("/work-orders/:id/items", post(add_item))
        .route(
            "/work-orders/:id/items/:item_id",
            patch(update_item).delete(remove_item),
        )
        .route("/work-orders/:id/discount", post(set_discount))
        .route("/work-orders/:id/tax-rate", post(set_tax_rate))
        .route("/work-orders/:id/notes", post(set_notes))
        .route("/work-orders/:id/recalculate", post(recalculate))
        .route(
            "/work-orders/:id/payments",
            post(record_payment).get(list_payments),
        )
        .route("/work-orders/:id/decisions", post(apply_decisions))
        .route("/work-orders/:id/portal-link", post(issue_portal_link))
}

fn dispatch(
    services: &AppServices,
    shop_id: ShopId,
    work_order_id: WorkOrderId,
    command: WorkOrderCommand,
) -> Result<(), Response> {
    services
        .dispatch::<WorkOrder>(
            shop_id,
            work_order_id.0,
            WORK_ORDER_AGGREGATE_TYPE,
            command,
            |_, id| WorkOrder::empty(WorkOrderId::new(id)),
        )
        .map(|_| ())
        .map_err(errors::dispatch_error_to_response)
}

fn detail(
    services: &AppServices,
    shop_id: ShopId,
    work_order_id: WorkOrderId,
    status: StatusCode,
) -> Result<Response, Response> {
    let wo = services
        .load_work_order(shop_id, work_order_id)
        .map_err(errors::dispatch_error_to_response)?;
    Ok((status, Json(dto::work_order_to_json(&wo))).into_response())
}

async fn create_work_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Json(body): Json<dto::CreateWorkOrderRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let customer_id: CustomerId = parse_id(&body.customer_id, "customer id")?;
    let vehicle_id: VehicleId = parse_id(&body.vehicle_id, "vehicle id")?;
    let appointment_id: Option<AppointmentId> = match &body.appointment_id {
        Some(s) => Some(parse_id(s, "appointment id")?),
        None => None,
    };
    let tax_rate = match &body.tax_rate {
        Some(s) => Some(dto::parse_tax_rate(s)?),
        None => None,
    };

    let work_order_id = WorkOrderId::new(AggregateId::new());

    // One open work order per appointment; a duplicate claim reports the
    // existing order instead of opening a second one.
    if let Some(appointment_id) = appointment_id {
        if let Err(existing) = services.claim_appointment(shop_id, appointment_id, work_order_id) {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "conflict",
                    "message": "appointment is already linked to a work order",
                    "work_order_id": existing.to_string(),
                })),
            )
                .into_response());
        }
    }

    let command = WorkOrderCommand::OpenWorkOrder(OpenWorkOrder {
        shop_id,
        work_order_id,
        number: services.allocate_number(shop_id),
        customer_id,
        vehicle_id,
        appointment_id,
        tax_rate,
        notes: body.notes,
        occurred_at: Utc::now(),
    });

    if let Err(response) = dispatch(&services, shop_id, work_order_id, command) {
        if let Some(appointment_id) = appointment_id {
            services.release_appointment(shop_id, appointment_id);
        }
        return Err(response);
    }

    detail(&services, shop_id, work_order_id, StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list_work_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Query(query): Query<ListQuery>,
) -> Result<Response, Response> {
    let status: Option<WorkOrderStatus> = match &query.status {
        Some(s) => Some(s.parse().map_err(|e: autoshop_core::DomainError| {
            errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        })?),
        None => None,
    };

    let rows = services.work_orders_list(shop.shop_id(), status);
    let body: Vec<_> = rows.iter().map(dto::read_model_to_json).collect();
    Ok(Json(json!({ "work_orders": body })).into_response())
}

async fn get_work_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);
    detail(&services, shop.shop_id(), work_order_id, StatusCode::OK)
}

async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::StatusRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);
    let to: WorkOrderStatus = body.status.parse().map_err(|e: autoshop_core::DomainError| {
        errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
    })?;

    let command = WorkOrderCommand::ChangeStatus(ChangeStatus {
        shop_id,
        work_order_id,
        to,
        changed_by: staff.display_name().map(str::to_string),
        occurred_at: Utc::now(),
    });
    dispatch(&services, shop_id, work_order_id, command)?;
    detail(&services, shop_id, work_order_id, StatusCode::OK)
}

async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddItemRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);

    let service_id: Option<ServiceId> = match &body.service_id {
        Some(s) => Some(parse_id(s, "service id")?),
        None => None,
    };
    // Explicit fields win over the catalog entry the service id resolves to.
    let entry = service_id.and_then(|sid| services.catalog_lookup(shop_id, sid));

    let item_type: ItemType = match &body.item_type {
        Some(s) => s.parse().map_err(|e: autoshop_core::DomainError| {
            errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        })?,
        None => entry.as_ref().map(|e| e.item_type).ok_or_else(|| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "item_type is required when no catalog service is referenced",
            )
        })?,
    };
    let description = body
        .description
        .or_else(|| entry.as_ref().map(|e| e.description.clone()))
        .ok_or_else(|| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "description is required when no catalog service is referenced",
            )
        })?;
    let unit_price = body
        .unit_price_cents
        .map(Cents::new)
        .or_else(|| entry.as_ref().map(|e| e.unit_price))
        .ok_or_else(|| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "unit_price_cents is required when no catalog service is referenced",
            )
        })?;
    let quantity = match &body.quantity {
        Some(s) => dto::parse_quantity(s)?,
        None => Quantity::new(Decimal::ONE).map_err(|e| {
            errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        })?,
    };
    let technician: Option<TechnicianId> = match &body.technician_id {
        Some(s) => Some(parse_id(s, "technician id")?),
        None => None,
    };

    let command = WorkOrderCommand::AddItem(AddItem {
        shop_id,
        work_order_id,
        item_id: ItemId::new(),
        item_type,
        service_id,
        description,
        quantity,
        unit_price,
        cost: body.cost_cents.map(Cents::new),
        technician,
        occurred_at: Utc::now(),
    });
    dispatch(&services, shop_id, work_order_id, command)?;
    detail(&services, shop_id, work_order_id, StatusCode::CREATED)
}

async fn update_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path((id, item_id)): Path<(String, String)>,
    Json(body): Json<dto::UpdateItemRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);
    let item_id: ItemId = parse_id(&item_id, "item id")?;

    let item_type: Option<ItemType> = match &body.item_type {
        Some(s) => Some(s.parse().map_err(|e: autoshop_core::DomainError| {
            errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        })?),
        None => None,
    };
    let quantity = match &body.quantity {
        Some(s) => Some(dto::parse_quantity(s)?),
        None => None,
    };
    let status = match &body.status {
        Some(s) => Some(dto::parse_item_status(s)?),
        None => None,
    };
    let technician: Option<TechnicianId> = match &body.technician_id {
        Some(s) => Some(parse_id(s, "technician id")?),
        None => None,
    };

    let command = WorkOrderCommand::UpdateItem(UpdateItem {
        shop_id,
        work_order_id,
        item_id,
        item_type,
        description: body.description,
        quantity,
        unit_price: body.unit_price_cents.map(Cents::new),
        cost: body.cost_cents.map(Cents::new),
        status,
        technician,
        occurred_at: Utc::now(),
    });
    dispatch(&services, shop_id, work_order_id, command)?;
    detail(&services, shop_id, work_order_id, StatusCode::OK)
}

async fn remove_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path((id, item_id)): Path<(String, String)>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);
    let item_id: ItemId = parse_id(&item_id, "item id")?;

    let command = WorkOrderCommand::RemoveItem(RemoveItem {
        shop_id,
        work_order_id,
        item_id,
        occurred_at: Utc::now(),
    });
    dispatch(&services, shop_id, work_order_id, command)?;
    detail(&services, shop_id, work_order_id, StatusCode::OK)
}

async fn set_discount(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DiscountRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);

    let command = WorkOrderCommand::SetDiscount(SetDiscount {
        shop_id,
        work_order_id,
        discount: Cents::new(body.discount_cents),
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    dispatch(&services, shop_id, work_order_id, command)?;
    detail(&services, shop_id, work_order_id, StatusCode::OK)
}

async fn set_tax_rate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::TaxRateRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);
    let tax_rate = dto::parse_tax_rate(&body.tax_rate)?;

    let command = WorkOrderCommand::SetTaxRate(SetTaxRate {
        shop_id,
        work_order_id,
        tax_rate,
        occurred_at: Utc::now(),
    });
    dispatch(&services, shop_id, work_order_id, command)?;
    detail(&services, shop_id, work_order_id, StatusCode::OK)
}

async fn set_notes(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::NotesRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);

    let command = WorkOrderCommand::SetNotes(SetNotes {
        shop_id,
        work_order_id,
        notes: body.notes,
        internal_notes: body.internal_notes,
        occurred_at: Utc::now(),
    });
    dispatch(&services, shop_id, work_order_id, command)?;
    detail(&services, shop_id, work_order_id, StatusCode::OK)
}

/// Read-only: totals are derived state, so there is nothing to fix. The
/// route exists so callers can fetch a fresh computation without a write.
async fn recalculate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);
    let wo = services
        .load_work_order(shop.shop_id(), work_order_id)
        .map_err(errors::dispatch_error_to_response)?;

    Ok(Json(json!({
        "id": wo.id_typed().to_string(),
        "totals": dto::totals_to_json(&wo),
    }))
    .into_response())
}

async fn record_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PaymentRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);
    let method: PaymentMethod = body.method.parse().map_err(|e: autoshop_core::DomainError| {
        errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
    })?;

    let command = WorkOrderCommand::RecordPayment(RecordPayment {
        shop_id,
        work_order_id,
        payment_id: PaymentId::new(),
        amount: Cents::new(body.amount_cents),
        method,
        reference_number: body.reference_number,
        notes: body.notes,
        occurred_at: Utc::now(),
    });
    dispatch(&services, shop_id, work_order_id, command)?;
    detail(&services, shop_id, work_order_id, StatusCode::CREATED)
}

async fn list_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);
    let wo = services
        .load_work_order(shop.shop_id(), work_order_id)
        .map_err(errors::dispatch_error_to_response)?;

    let payments: Vec<_> = wo.payments().iter().map(dto::payment_to_json).collect();
    Ok(Json(json!({
        "payments": payments,
        "amount_paid_cents": wo.amount_paid().amount(),
        "balance_due_cents": wo.balance_due().amount(),
    }))
    .into_response())
}

/// Staff records a decision taken out of band (phone, in person).
async fn apply_decisions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DecisionsRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);
    let decisions = dto::parse_decisions(&body)?;

    let command = WorkOrderCommand::ApplyDecisions(ApplyDecisions {
        shop_id,
        work_order_id,
        decisions,
        method: AuthorizationMethod::Staff,
        authorized_by: body
            .authorized_by
            .or_else(|| staff.display_name().map(str::to_string)),
        occurred_at: Utc::now(),
    });
    dispatch(&services, shop_id, work_order_id, command)?;
    detail(&services, shop_id, work_order_id, StatusCode::OK)
}

/// Mint an opaque portal token the customer can use to approve or decline
/// estimate lines without staff credentials.
async fn issue_portal_link(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(shop): Extension<ShopContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PortalLinkRequest>,
) -> Result<Response, Response> {
    let shop_id = shop.shop_id();
    let work_order_id = WorkOrderId::new(parse_id(&id, "work order id")?);

    // The token must point at an existing order in this shop.
    services
        .load_work_order(shop_id, work_order_id)
        .map_err(errors::dispatch_error_to_response)?;

    let token = services.issue_portal_token(shop_id, work_order_id, body.customer_name);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "token": token, "path": format!("/portal/{token}/decisions") })),
    )
        .into_response())
}
