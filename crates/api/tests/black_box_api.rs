use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;

use autoshop_api::app::services::{AppServices, build_services};
use autoshop_core::ShopId;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let services = Arc::new(build_services());
        let app = autoshop_api::app::build_app_with_services(Arc::clone(&services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.services.shutdown_workers();
        self.handle.abort();
    }
}

async fn list_eventually(
    client: &reqwest::Client,
    base_url: &str,
    shop_id: ShopId,
    query: &str,
    expected_len: usize,
) -> serde_json::Value {
    // The list view lags the command path (projection over the bus).
    // Poll briefly until it catches up.
    for _ in 0..200 {
        let res = client
            .get(format!("{}/work-orders{}", base_url, query))
            .header("x-shop-id", shop_id.to_string())
            .send()
            .await
            .unwrap();

        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if body["work_orders"].as_array().unwrap().len() == expected_len {
                return body;
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("projection did not reach {expected_len} row(s) for {query} within timeout");
}

async fn create_work_order(
    client: &reqwest::Client,
    srv: &TestServer,
    shop_id: ShopId,
    body: serde_json::Value,
) -> serde_json::Value {
    let res = client
        .post(format!("{}/work-orders", srv.base_url))
        .header("x-shop-id", shop_id.to_string())
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

fn uuid_str() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[tokio::test]
async fn shop_header_required_for_staff_routes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/work-orders", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/work-orders", srv.base_url))
        .header("x-shop-id", "not-a-uuid")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn full_lifecycle_with_portal_approval_and_payment() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let shop_id = ShopId::new();

    let created = create_work_order(
        &client,
        &srv,
        shop_id,
        json!({
            "customer_id": uuid_str(),
            "vehicle_id": uuid_str(),
            "tax_rate": "0.13",
        }),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "draft");
    assert_eq!(created["display_id"], "WO-1001");

    // Labor 1 x 80.00 plus parts 2 x 15.00.
    let res = client
        .post(format!("{}/work-orders/{}/items", srv.base_url, id))
        .header("x-shop-id", shop_id.to_string())
        .json(&json!({
            "item_type": "labor",
            "description": "Front brake service",
            "unit_price_cents": 8000,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .post(format!("{}/work-orders/{}/items", srv.base_url, id))
        .header("x-shop-id", shop_id.to_string())
        .json(&json!({
            "item_type": "part",
            "description": "Brake pads",
            "quantity": "2",
            "unit_price_cents": 1500,
            "cost_cents": 900,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let with_items: serde_json::Value = res.json().await.unwrap();
    assert_eq!(with_items["totals"]["subtotal_cents"], 11_000);
    assert_eq!(with_items["totals"]["tax_cents"], 1_430);
    assert_eq!(with_items["totals"]["total_cents"], 12_430);
    let part_id = with_items["items"][1]["id"].as_str().unwrap().to_string();

    // Walk the estimate out to the customer.
    for status in ["estimated", "sent_to_customer"] {
        let res = client
            .post(format!("{}/work-orders/{}/status", srv.base_url, id))
            .header("x-shop-id", shop_id.to_string())
            .header("x-staff-name", "Priya N.")
            .json(&json!({ "status": status }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    // Customer declines the part through the portal.
    let res = client
        .post(format!("{}/work-orders/{}/portal-link", srv.base_url, id))
        .header("x-shop-id", shop_id.to_string())
        .json(&json!({ "customer_name": "Dana Whitfield" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let link: serde_json::Value = res.json().await.unwrap();
    let token = link["token"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{}/portal/{}/decisions", srv.base_url, token))
        .json(&json!({
            "decisions": [{ "item_id": part_id, "decision": "declined" }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let portal_view: serde_json::Value = res.json().await.unwrap();
    assert_eq!(portal_view["status"], "approved");
    assert_eq!(portal_view["totals"]["subtotal_cents"], 8_000);
    assert_eq!(portal_view["totals"]["total_cents"], 9_040);
    // Internal margin data never reaches the portal.
    assert!(portal_view["items"][1].get("cost_cents").is_none());
    assert!(portal_view.get("internal_notes").is_none());

    for status in ["in_progress", "completed", "invoiced"] {
        let res = client
            .post(format!("{}/work-orders/{}/status", srv.base_url, id))
            .header("x-shop-id", shop_id.to_string())
            .json(&json!({ "status": status }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    // Paying the full balance flips the order to paid in the same commit.
    let res = client
        .post(format!("{}/work-orders/{}/payments", srv.base_url, id))
        .header("x-shop-id", shop_id.to_string())
        .json(&json!({ "amount_cents": 9_040, "method": "card", "reference_number": "txn-4411" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let paid: serde_json::Value = res.json().await.unwrap();
    assert_eq!(paid["status"], "paid");
    assert_eq!(paid["totals"]["balance_due_cents"], 0);

    let res = client
        .get(format!("{}/work-orders/{}/payments", srv.base_url, id))
        .header("x-shop-id", shop_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let payments: serde_json::Value = res.json().await.unwrap();
    assert_eq!(payments["payments"].as_array().unwrap().len(), 1);
    assert_eq!(payments["amount_paid_cents"], 9_040);

    // The list projection catches up to the final state.
    let listed = list_eventually(&client, &srv.base_url, shop_id, "?status=paid", 1).await;
    assert_eq!(listed["work_orders"][0]["id"], id.as_str());
    assert_eq!(listed["work_orders"][0]["balance_due_cents"], 0);
}

#[tokio::test]
async fn duplicate_appointment_conflicts_with_existing_order() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let shop_id = ShopId::new();
    let appointment_id = uuid_str();

    let created = create_work_order(
        &client,
        &srv,
        shop_id,
        json!({
            "customer_id": uuid_str(),
            "vehicle_id": uuid_str(),
            "appointment_id": appointment_id,
        }),
    )
    .await;
    let existing_id = created["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{}/work-orders", srv.base_url))
        .header("x-shop-id", shop_id.to_string())
        .json(&json!({
            "customer_id": uuid_str(),
            "vehicle_id": uuid_str(),
            "appointment_id": appointment_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["work_order_id"], existing_id.as_str());
}

#[tokio::test]
async fn illegal_transition_is_a_conflict() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let shop_id = ShopId::new();

    let created = create_work_order(
        &client,
        &srv,
        shop_id,
        json!({ "customer_id": uuid_str(), "vehicle_id": uuid_str() }),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    // Draft cannot jump straight to completed.
    let res = client
        .post(format!("{}/work-orders/{}/status", srv.base_url, id))
        .header("x-shop-id", shop_id.to_string())
        .json(&json!({ "status": "completed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .get(format!("{}/work-orders/{}", srv.base_url, id))
        .header("x-shop-id", shop_id.to_string())
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "draft");
}

#[tokio::test]
async fn shop_isolation_blocks_cross_shop_reads() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let shop1 = ShopId::new();
    let shop2 = ShopId::new();

    let created = create_work_order(
        &client,
        &srv,
        shop1,
        json!({ "customer_id": uuid_str(), "vehicle_id": uuid_str() }),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    // Shop2 sees neither the detail nor the list row.
    let res = client
        .get(format!("{}/work-orders/{}", srv.base_url, id))
        .header("x-shop-id", shop2.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    list_eventually(&client, &srv.base_url, shop1, "", 1).await;
    let other = client
        .get(format!("{}/work-orders", srv.base_url))
        .header("x-shop-id", shop2.to_string())
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = other.json().await.unwrap();
    assert!(body["work_orders"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_portal_token_is_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/portal/{}/decisions", srv.base_url, "bogus"))
        .json(&json!({ "approve_all": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
