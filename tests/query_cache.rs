//! End-to-end cache behavior against a mocked admin API.
//!
//! Covers deduplication of concurrent reads, tag invalidation after writes,
//! and eviction of unused entries.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use storekeep::subscription::http::{
    ExecutorConfig, HttpRequest, MutationDispatcher, MutationEndpoint, QueryClient, QueryConfig,
    QueryEndpoint, RequestExecutor, ResourceType, RetryPolicy, StaticToken, Tag,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Order {
    id: u64,
    status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Invoice {
    id: u64,
}

struct GetOrder;

impl QueryEndpoint for GetOrder {
    const NAME: &'static str = "getOrder";
    type Args = u64;
    type Output = Order;

    fn request(id: &u64) -> HttpRequest {
        HttpRequest::get(format!("/orders/{id}"))
    }

    fn provides_tags(order: &Order, _: &u64) -> Vec<Tag> {
        vec![Tag::id(ResourceType::Order, order.id)]
    }
}

struct CancelOrder;

impl MutationEndpoint for CancelOrder {
    const NAME: &'static str = "cancelOrder";
    type Args = u64;
    type Output = Order;

    fn request(id: &u64) -> HttpRequest {
        HttpRequest::post(format!("/orders/{id}/cancel"))
    }

    fn invalidates_tags(_: &Order, id: &u64) -> Vec<Tag> {
        vec![Tag::id(ResourceType::Order, *id)]
    }
}

struct ListInvoices;

impl QueryEndpoint for ListInvoices {
    const NAME: &'static str = "listInvoices";
    type Args = ();
    type Output = Vec<Invoice>;

    fn request(_: &()) -> HttpRequest {
        HttpRequest::get("/invoices")
    }

    fn provides_tags(invoices: &Vec<Invoice>, _: &()) -> Vec<Tag> {
        Tag::list_and_items(ResourceType::Invoice, invoices.iter().map(|i| i.id))
    }
}

struct CreateInvoice;

impl MutationEndpoint for CreateInvoice {
    const NAME: &'static str = "createInvoice";
    type Args = Value;
    type Output = Invoice;

    fn request(body: &Value) -> HttpRequest {
        HttpRequest::post("/invoices").json(body.clone())
    }

    fn invalidates_tags(_: &Invoice, _: &Value) -> Vec<Tag> {
        vec![Tag::list(ResourceType::Invoice)]
    }
}

fn client(server: &MockServer, cache_time: Duration) -> QueryClient {
    let executor = RequestExecutor::new(
        ExecutorConfig::new(server.uri()).with_retry(RetryPolicy::none()),
        Arc::new(StaticToken::new("admin-token")),
    );
    QueryClient::with_config(executor, QueryConfig::new(None, cache_time))
}

async fn hits(server: &MockServer, method: &str, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == method && r.url.path() == url_path)
        .count()
}

#[tokio::test]
async fn test_concurrent_subscribers_share_one_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/5"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 5, "status": "open"}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Duration::from_secs(60));
    let mut handles: Vec<_> = (0..5)
        .map(|_| client.resolve::<GetOrder>(5).expect("valid args"))
        .collect();

    for handle in &mut handles {
        let result = handle.settled().await;
        assert_eq!(result.data().map(|o| o.status.as_str()), Some("open"));
    }
    assert_eq!(client.subscriber_count(handles[0].key()), 5);
}

#[tokio::test]
async fn test_cancel_order_then_read_sees_cancelled() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5, "status": "open"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders/5"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 5, "status": "cancelled"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders/5/cancel"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 5, "status": "cancelled"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Duration::from_secs(60));
    let dispatcher = MutationDispatcher::new(client.clone());

    let mut order = client.resolve::<GetOrder>(5).expect("valid args");
    let before = order.settled().await;
    assert_eq!(before.data().map(|o| o.status.as_str()), Some("open"));

    dispatcher.mutate::<CancelOrder>(5).await.expect("cancel");

    let after = order.settled().await;
    assert_eq!(after.data().map(|o| o.status.as_str()), Some("cancelled"));
    assert_eq!(hits(&server, "GET", "/orders/5").await, 2);
}

#[tokio::test]
async fn test_create_invoice_refreshes_invoice_list() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 2})))
        .mount(&server)
        .await;

    let client = client(&server, Duration::from_secs(60));
    let dispatcher = MutationDispatcher::new(client.clone());

    let mut invoices = client.resolve::<ListInvoices>(()).expect("valid args");
    assert_eq!(invoices.settled().await.data().map(Vec::len), Some(1));

    let created = dispatcher
        .mutate::<CreateInvoice>(json!({"orderId": 5}))
        .await
        .expect("create");
    assert_eq!(created, Invoice { id: 2 });

    let after = invoices.settled().await;
    assert_eq!(
        after.data().cloned(),
        Some(vec![Invoice { id: 1 }, Invoice { id: 2 }])
    );
}

#[tokio::test]
async fn test_unused_entry_is_evicted_and_refetched() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "status": "open"})))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, Duration::from_millis(50));

    let mut order = client.resolve::<GetOrder>(7).expect("valid args");
    order.settled().await;
    let key = order.key().clone();
    order.dispose();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.contains(&key));

    let mut order = client.resolve::<GetOrder>(7).expect("valid args");
    assert!(order.current().is_loading());
    assert!(order.settled().await.is_success());
}
