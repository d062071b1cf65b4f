//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::{AppState, LiveSettings};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use domain::{EventEnvelope, EventType, LowStockPolicy, ProductService, SellerId, TOPIC};
use event_bus::{EventBus, InMemoryEventBus, OffsetReset};
use futures_util::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use notifications::{
    AuditEntry, AuditLog, InMemoryAuditLog, NotificationRouter, RouterConfig, SubscriberRegistry,
};
use product_store::{InMemoryProductStore, ProductStore};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(2);

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct Harness {
    app: Router,
    bus: InMemoryEventBus,
    audit: InMemoryAuditLog,
    registry: Arc<SubscriberRegistry>,
}

fn setup() -> Harness {
    let bus = InMemoryEventBus::new(4).unwrap().with_journal();
    let audit = InMemoryAuditLog::new();
    let registry = Arc::new(SubscriberRegistry::new());

    let store: Arc<dyn ProductStore> = Arc::new(InMemoryProductStore::new());
    let shared_bus: Arc<dyn EventBus> = Arc::new(bus.clone());
    let state = Arc::new(AppState {
        products: ProductService::new(store, shared_bus, LowStockPolicy::default()),
        audit: Arc::new(audit.clone()),
        registry: Arc::clone(&registry),
        live: LiveSettings {
            heartbeat: Duration::from_secs(60),
            queue_capacity: 8,
        },
    });

    Harness {
        app: api::create_app(state, get_metrics_handle()),
        bus,
        audit,
        registry,
    }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.send(request).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn create(&self, seller: &str, quantity: u32) -> Value {
        let (status, json) = self
            .send_json(json_request(
                "POST",
                "/products",
                Some(seller),
                json!({ "name": "Widget", "price": 9.5, "quantity": quantity, "category": "tools" }),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        json["data"].clone()
    }

    async fn published_types(&self) -> Vec<EventType> {
        self.bus
            .published(TOPIC)
            .await
            .iter()
            .map(|m| EventEnvelope::from_slice(&m.payload).unwrap().event_type())
            .collect()
    }
}

fn json_request(method: &str, uri: &str, seller: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(seller) = seller {
        builder = builder.header("x-seller-id", seller);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, seller: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(seller) = seller {
        builder = builder.header("x-seller-id", seller);
    }
    builder.body(Body::empty()).unwrap()
}

fn delete(uri: &str, seller: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("x-seller-id", seller)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let h = setup();

    let (status, json) = h.send_json(get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["liveSubscribers"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let h = setup();
    h.create("s1", 1).await;

    let response = h.send(get("/metrics", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn missing_seller_header_is_unauthorized() {
    let h = setup();

    for request in [
        get("/products", None),
        get("/products/export", None),
        get("/events/log", None),
        json_request("POST", "/products", None, json!({})),
    ] {
        let (status, json) = h.send_json(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json, json!({ "success": false, "error": "Missing x-seller-id" }));
    }
    assert!(h.published_types().await.is_empty());
}

mod products {
    use super::*;

    #[tokio::test]
    async fn create_returns_the_product_and_emits_created() {
        let h = setup();

        let (status, json) = h
            .send_json(json_request(
                "POST",
                "/products",
                Some("s1"),
                json!({
                    "name": "Hammer",
                    "description": "steel",
                    "price": 12.5,
                    "quantity": 10,
                    "category": "tools"
                }),
            ))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["name"], "Hammer");
        assert_eq!(json["data"]["sellerId"], "s1");
        assert_eq!(json["data"]["quantity"], 10);
        assert!(json["data"]["id"].is_i64());
        assert_eq!(h.published_types().await, vec![EventType::Created]);
    }

    #[tokio::test]
    async fn low_stock_create_emits_created_then_warning() {
        let h = setup();

        h.create("s1", 2).await;

        assert_eq!(
            h.published_types().await,
            vec![EventType::Created, EventType::LowStockWarning]
        );
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_without_events() {
        let h = setup();

        let (status, json) = h
            .send_json(json_request(
                "POST",
                "/products",
                Some("s1"),
                json!({ "name": "", "price": 1.0, "quantity": 1, "category": "tools" }),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);

        let (status, _) = h
            .send_json(json_request(
                "POST",
                "/products",
                Some("s1"),
                json!({ "name": "Widget", "price": 1.0, "quantity": -1, "category": "tools" }),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(h.published_types().await.is_empty());
    }

    #[tokio::test]
    async fn list_is_scoped_to_the_seller_and_newest_first() {
        let h = setup();
        let first = h.create("s1", 10).await;
        let second = h.create("s1", 20).await;
        h.create("s2", 30).await;

        let (status, json) = h.send_json(get("/products", Some("s1"))).await;

        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&Value> = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| &p["id"])
            .collect();
        assert_eq!(ids, vec![&second["id"], &first["id"]]);
    }

    #[tokio::test]
    async fn update_emits_diff_then_warning() {
        let h = setup();
        let product = h.create("s1", 10).await;
        let uri = format!("/products/{}", product["id"]);

        let (status, json) = h
            .send_json(json_request("PATCH", &uri, Some("s1"), json!({ "quantity": 2 })))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["quantity"], 2);
        assert_eq!(json["data"]["name"], "Widget");
        assert_eq!(
            h.published_types().await,
            vec![
                EventType::Created,
                EventType::Updated,
                EventType::LowStockWarning
            ]
        );
    }

    #[tokio::test]
    async fn put_is_accepted_as_update() {
        let h = setup();
        let product = h.create("s1", 10).await;
        let uri = format!("/products/{}", product["id"]);

        let (status, json) = h
            .send_json(json_request("PUT", &uri, Some("s1"), json!({ "price": 11.0 })))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["price"], 11.0);
        assert_eq!(
            h.published_types().await,
            vec![EventType::Created, EventType::Updated]
        );
    }

    #[tokio::test]
    async fn another_sellers_product_is_not_found() {
        let h = setup();
        let product = h.create("s1", 10).await;
        let uri = format!("/products/{}", product["id"]);

        let (status, json) = h
            .send_json(json_request("PATCH", &uri, Some("s2"), json!({ "quantity": 1 })))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json, json!({ "success": false, "error": "Not found" }));

        let (status, _) = h.send_json(delete(&uri, "s2")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert_eq!(h.published_types().await, vec![EventType::Created]);
    }

    #[tokio::test]
    async fn empty_patch_and_bad_id_are_bad_requests() {
        let h = setup();
        let product = h.create("s1", 10).await;

        let (status, _) = h
            .send_json(json_request(
                "PATCH",
                &format!("/products/{}", product["id"]),
                Some("s1"),
                json!({}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = h
            .send_json(json_request(
                "PATCH",
                "/products/abc",
                Some("s1"),
                json!({ "quantity": 1 }),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn delete_returns_the_id_once() {
        let h = setup();
        let product = h.create("s1", 10).await;
        let uri = format!("/products/{}", product["id"]);

        let (status, json) = h.send_json(delete(&uri, "s1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "success": true, "data": { "id": product["id"] } }));

        let (status, _) = h.send_json(delete(&uri, "s1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert_eq!(
            h.published_types().await,
            vec![EventType::Created, EventType::Deleted]
        );
    }

    #[tokio::test]
    async fn emission_failure_is_a_bad_gateway() {
        let h = setup();
        h.bus.fail_publishes(Some("broker down"), 0).await;

        let (status, json) = h
            .send_json(json_request(
                "POST",
                "/products",
                Some("s1"),
                json!({ "name": "Widget", "price": 1.0, "quantity": 10, "category": "tools" }),
            ))
            .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn export_renders_the_sellers_products_as_csv() {
        let h = setup();
        h.create("s1", 3).await;
        h.create("s2", 4).await;

        let response = h.send(get("/products/export", Some("s1"))).await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/csv"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let csv = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "id,name,price,quantity,category");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(",\"Widget\",9.5,3,\"tools\""));
    }
}

mod events {
    use super::*;

    async fn next_frame(body: &mut axum::body::BodyDataStream) -> String {
        let chunk = tokio::time::timeout(WAIT, body.next())
            .await
            .expect("a frame should arrive")
            .expect("stream should stay open")
            .unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition should hold");
    }

    #[tokio::test]
    async fn stream_requires_a_seller() {
        let h = setup();

        let (status, json) = h.send_json(get("/events/stream", None)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn stream_sends_ready_then_pushed_alerts() {
        let h = setup();
        let seller = SellerId::new("s1");

        let response = h.send(get("/events/stream?sellerId=s1", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let mut body = response.into_body().into_data_stream();

        let ready = next_frame(&mut body).await;
        assert!(ready.contains("event: ready"));
        assert!(ready.contains("data: \"ok\""));
        assert_eq!(h.registry.subscriber_count(&seller), 1);

        h.registry.push(&seller, r#"{"type":"LowStockWarning"}"#);
        let alert = next_frame(&mut body).await;
        assert_eq!(alert, "data: {\"type\":\"LowStockWarning\"}\n\n");

        drop(body);
        assert_eq!(h.registry.subscriber_count(&seller), 0);
    }

    #[tokio::test]
    async fn low_stock_mutation_reaches_the_open_stream() {
        let h = setup();
        let router = NotificationRouter::new(
            h.bus.clone(),
            Arc::new(h.audit.clone()),
            Arc::clone(&h.registry),
            RouterConfig {
                reset: OffsetReset::Earliest,
                audit_enabled: true,
                ..RouterConfig::default()
            },
        );
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(router.run(async move {
            let _ = stopped.await;
        }));

        let response = h.send(get("/events/stream?sellerId=s1", None)).await;
        let mut body = response.into_body().into_data_stream();
        next_frame(&mut body).await;

        let product = h.create("s1", 1).await;

        let alert = next_frame(&mut body).await;
        let json = alert
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap();
        let envelope = EventEnvelope::from_slice(json.as_bytes()).unwrap();
        assert_eq!(envelope.event_type(), EventType::LowStockWarning);
        assert_eq!(
            envelope.product_id.map(|id| id.as_i64()),
            product["id"].as_i64()
        );

        // Created and LowStockWarning both land in the audit log.
        let audit = h.audit.clone();
        tokio::time::timeout(WAIT, async {
            while audit.entry_count().await < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("audit log should fill up");

        let (status, json) = h.send_json(get("/events/log", Some("s1"))).await;
        assert_eq!(status, StatusCode::OK);
        let types: Vec<&str> = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["Created", "LowStockWarning"]);

        let _ = stop.send(());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closing_the_registry_ends_open_streams() {
        let h = setup();

        let response = h.send(get("/events/stream?sellerId=s1", None)).await;
        let mut body = response.into_body().into_data_stream();
        next_frame(&mut body).await;

        h.registry.close_all();

        let end = tokio::time::timeout(WAIT, body.next())
            .await
            .expect("stream should end");
        assert!(end.is_none());
        let registry = Arc::clone(&h.registry);
        wait_until(move || registry.total_subscribers() == 0).await;
    }

    async fn seed_log(audit: &InMemoryAuditLog) {
        for (sk, event_type) in [
            ("2024-01-01T00:00:01.000000000Z#Created", EventType::Created),
            ("2024-01-01T00:00:02.000000000Z#Updated", EventType::Updated),
            (
                "2024-01-01T00:00:03.000000000Z#LowStockWarning",
                EventType::LowStockWarning,
            ),
            ("2024-01-01T00:00:04.000000000Z#Created", EventType::Created),
        ] {
            audit
                .put(AuditEntry {
                    pk: AuditEntry::partition(&SellerId::new("s1")),
                    sk: sk.to_string(),
                    event_type,
                    payload: "{}".to_string(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn log_filters_by_type_and_limits_to_recent() {
        let h = setup();
        seed_log(&h.audit).await;

        let (status, json) = h
            .send_json(get("/events/log?type=Created&limit=1", Some("s1")))
            .await;
        assert_eq!(status, StatusCode::OK);
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["sk"], "2024-01-01T00:00:04.000000000Z#Created");

        let (_, json) = h.send_json(get("/events/log", Some("s2"))).await;
        assert_eq!(json["data"], json!([]));
    }

    #[tokio::test]
    async fn log_rejects_unknown_type() {
        let h = setup();

        let (status, json) = h
            .send_json(get("/events/log?type=Exploded", Some("s1")))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Unknown event type: Exploded");
    }
}
