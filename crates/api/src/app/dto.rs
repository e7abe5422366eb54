//! Request DTOs and domain -> JSON mapping helpers.
//!
//! Money crosses the wire as integer cents (`*_cents` fields). Fractional
//! values (quantity, tax rate) cross as decimal strings to avoid float
//! round-tripping.

use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use autoshop_core::{Cents, Quantity, TaxRate};
use autoshop_workorder::{
    Decision, ItemStatus, Payment, WorkOrder, WorkOrderItem,
};
use autoshop_infra::projections::WorkOrderReadModel;

use crate::app::errors;

// -------------------------
// Requests
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateWorkOrderRequest {
    pub customer_id: String,
    pub vehicle_id: String,
    pub appointment_id: Option<String>,
    /// Decimal string, e.g. "0.13". Defaults to the shop standard rate.
    pub tax_rate: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    /// Required unless `service_id` resolves a catalog entry.
    pub item_type: Option<String>,
    pub service_id: Option<String>,
    pub description: Option<String>,
    /// Decimal string, e.g. "2.5". Defaults to 1.
    pub quantity: Option<String>,
    pub unit_price_cents: Option<i64>,
    pub cost_cents: Option<i64>,
    pub technician_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub item_type: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<String>,
    pub unit_price_cents: Option<i64>,
    pub cost_cents: Option<i64>,
    pub status: Option<String>,
    pub technician_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DiscountRequest {
    pub discount_cents: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaxRateRequest {
    pub tax_rate: String,
}

#[derive(Debug, Deserialize)]
pub struct NotesRequest {
    pub notes: Option<String>,
    pub internal_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionItemRequest {
    pub item_id: String,
    /// "approved" or "declined".
    pub decision: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionsRequest {
    #[serde(default)]
    pub approve_all: bool,
    pub decisions: Option<Vec<DecisionItemRequest>>,
    pub authorized_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount_cents: i64,
    pub method: String,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PortalLinkRequest {
    pub customer_name: Option<String>,
}

// -------------------------
// Parse helpers
// -------------------------

/// Parse a path/body id into its newtype, or a 400 response.
pub fn parse_id<T>(s: &str, label: &str) -> Result<T, axum::response::Response>
where
    T: core::str::FromStr,
{
    s.parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid {label}"),
        )
    })
}

pub fn parse_quantity(s: &str) -> Result<Quantity, axum::response::Response> {
    let value: Decimal = s.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "invalid quantity")
    })?;
    Quantity::new(value)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

pub fn parse_tax_rate(s: &str) -> Result<TaxRate, axum::response::Response> {
    let value: Decimal = s.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "invalid tax rate")
    })?;
    TaxRate::new(value)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

pub fn parse_item_status(s: &str) -> Result<ItemStatus, axum::response::Response> {
    match s {
        "approved" => Ok(ItemStatus::Approved),
        "declined" => Ok(ItemStatus::Declined),
        "unspecified" => Ok(ItemStatus::Unspecified),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "status must be one of: approved, declined, unspecified",
        )),
    }
}

pub fn parse_decision(s: &str) -> Result<Decision, axum::response::Response> {
    match s {
        "approved" => Ok(Decision::Approved),
        "declined" => Ok(Decision::Declined),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "decision must be approved or declined",
        )),
    }
}

/// Resolve a decisions body into the domain representation. An empty
/// per-item list is passed through; the aggregate rejects it.
pub fn parse_decisions(
    body: &DecisionsRequest,
) -> Result<autoshop_workorder::ApprovalDecisions, axum::response::Response> {
    use autoshop_workorder::{ApprovalDecisions, ItemDecision};

    if body.approve_all {
        return Ok(ApprovalDecisions::ApproveAll);
    }

    let list = body.decisions.as_deref().unwrap_or(&[]);
    let mut resolved = Vec::with_capacity(list.len());
    for entry in list {
        resolved.push(ItemDecision {
            item_id: parse_id(&entry.item_id, "item id")?,
            decision: parse_decision(&entry.decision)?,
        });
    }
    Ok(ApprovalDecisions::PerItem(resolved))
}

// -------------------------
// Responses
// -------------------------

fn cents(value: Cents) -> i64 {
    value.amount()
}

pub fn totals_to_json(wo: &WorkOrder) -> JsonValue {
    json!({
        "subtotal_cents": cents(wo.totals().subtotal),
        "tax_cents": cents(wo.totals().tax),
        "total_cents": cents(wo.totals().total),
        "amount_paid_cents": cents(wo.amount_paid()),
        "balance_due_cents": cents(wo.balance_due()),
    })
}

pub fn item_to_json(item: &WorkOrderItem) -> JsonValue {
    json!({
        "id": item.id.to_string(),
        "item_type": item.item_type.as_str(),
        "service_id": item.service_id.map(|s| s.to_string()),
        "description": item.description,
        "quantity": item.quantity.to_string(),
        "unit_price_cents": cents(item.unit_price),
        "cost_cents": item.cost.map(cents),
        "total_cents": cents(item.total),
        "status": item.status.as_str(),
        "technician_id": item.technician.map(|t| t.to_string()),
        "sort_order": item.sort_order,
    })
}

pub fn payment_to_json(payment: &Payment) -> JsonValue {
    json!({
        "id": payment.id.to_string(),
        "amount_cents": cents(payment.amount),
        "method": payment.method.as_str(),
        "reference_number": payment.reference_number,
        "notes": payment.notes,
        "created_at": payment.created_at,
    })
}

/// Full staff-facing detail view from the rehydrated aggregate.
pub fn work_order_to_json(wo: &WorkOrder) -> JsonValue {
    json!({
        "id": wo.id_typed().to_string(),
        "display_id": wo.display_id(),
        "number": wo.number(),
        "status": wo.status().as_str(),
        "customer_id": wo.customer_id().map(|c| c.to_string()),
        "vehicle_id": wo.vehicle_id().map(|v| v.to_string()),
        "appointment_id": wo.appointment_id().map(|a| a.to_string()),
        "items": wo.items().iter().map(item_to_json).collect::<Vec<_>>(),
        "discount_cents": cents(wo.discount()),
        "discount_reason": wo.discount_reason(),
        "tax_rate": wo.tax_rate().to_string(),
        "totals": totals_to_json(wo),
        "notes": wo.notes(),
        "internal_notes": wo.internal_notes(),
        "authorization": wo.authorization().map(|a| json!({
            "method": a.method.as_str(),
            "authorized_by": a.authorized_by,
            "authorized_at": a.authorized_at,
        })),
        "history": wo.history().iter().map(|h| json!({
            "status": h.status.as_str(),
            "changed_by": h.changed_by,
            "changed_at": h.changed_at,
        })).collect::<Vec<_>>(),
        "completed_at": wo.completed_at(),
    })
}

/// Customer-facing detail view for the portal: no cost, no internal notes,
/// no staff history.
pub fn work_order_to_portal_json(wo: &WorkOrder) -> JsonValue {
    json!({
        "id": wo.id_typed().to_string(),
        "display_id": wo.display_id(),
        "status": wo.status().as_str(),
        "items": wo.items().iter().map(|item| json!({
            "id": item.id.to_string(),
            "item_type": item.item_type.as_str(),
            "description": item.description,
            "quantity": item.quantity.to_string(),
            "unit_price_cents": cents(item.unit_price),
            "total_cents": cents(item.total),
            "status": item.status.as_str(),
        })).collect::<Vec<_>>(),
        "discount_cents": cents(wo.discount()),
        "tax_rate": wo.tax_rate().to_string(),
        "totals": totals_to_json(wo),
        "notes": wo.notes(),
    })
}

/// Summary row for list responses, from the projection.
pub fn read_model_to_json(rm: &WorkOrderReadModel) -> JsonValue {
    json!({
        "id": rm.work_order_id.to_string(),
        "display_id": rm.display_id(),
        "number": rm.number,
        "status": rm.status.as_str(),
        "customer_id": rm.customer_id.to_string(),
        "vehicle_id": rm.vehicle_id.to_string(),
        "appointment_id": rm.appointment_id.map(|a| a.to_string()),
        "subtotal_cents": cents(rm.totals.subtotal),
        "tax_cents": cents(rm.totals.tax),
        "total_cents": cents(rm.totals.total),
        "amount_paid_cents": cents(rm.amount_paid),
        "balance_due_cents": cents(rm.balance_due()),
        "updated_at": rm.updated_at,
    })
}
