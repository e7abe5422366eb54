//! Shop-context extraction from trusted gateway headers.
//!
//! The deployment fronts this service with an authenticating gateway that
//! forwards `x-shop-id` (required) and `x-staff-name` (optional). Requests
//! without a valid shop id never reach staff routes.

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use autoshop_core::ShopId;

use crate::context::{ShopContext, StaffContext};

pub const SHOP_ID_HEADER: &str = "x-shop-id";
pub const STAFF_NAME_HEADER: &str = "x-staff-name";

pub async fn shop_context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let shop_id = extract_shop_id(req.headers())?;
    let staff_name = req
        .headers()
        .get(STAFF_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    req.extensions_mut().insert(ShopContext::new(shop_id));
    req.extensions_mut().insert(StaffContext::new(staff_name));

    Ok(next.run(req).await)
}

fn extract_shop_id(headers: &HeaderMap) -> Result<ShopId, StatusCode> {
    let header = headers
        .get(SHOP_ID_HEADER)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    header.trim().parse().map_err(|_| StatusCode::UNAUTHORIZED)
}
