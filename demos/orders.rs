//! Order administration walkthrough against a live admin API.
//!
//! This example shows:
//! - Loading client settings from a TOML file
//! - Subscribing to an order and to the order list
//! - Cancelling an order and watching both reads refetch
//!
//! Run with:
//! `STOREKEEP_TOKEN=... cargo run --example orders -- --config storekeep.toml 42`
//!
//! Without `--config`, the file named by `STOREKEEP_CONFIG` is used.
//!
//! Set `RUST_LOG=storekeep=debug` to see cache and request activity.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use storekeep::prelude::*;
use storekeep::subscription::http::{ClientSettings, StaticToken};
use tracing_subscriber::EnvFilter;

/// An order as the admin API returns it
#[derive(Debug, Clone, Deserialize)]
struct Order {
    id: u64,
    status: String,
    #[serde(rename = "totalCents")]
    total_cents: u64,
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

struct ListOrders;

impl QueryEndpoint for ListOrders {
    const NAME: &'static str = "listOrders";
    type Args = ();
    type Output = Vec<Order>;

    fn request(_: &()) -> HttpRequest {
        HttpRequest::get("/orders").query("limit", 20)
    }

    fn provides_tags(orders: &Vec<Order>, _: &()) -> Vec<Tag> {
        Tag::list_and_items(ResourceType::Order, orders.iter().map(|o| o.id))
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

/// Command-line arguments: `[--config <path>] [order id]`.
struct Args {
    config: Option<PathBuf>,
    order_id: u64,
}

impl Args {
    fn parse() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = None;
        let mut order_id = 1;
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "--config" {
                config = Some(args.next().ok_or("--config needs a path")?.into());
            } else {
                order_id = arg.parse()?;
            }
        }
        Ok(Self { config, order_id })
    }
}

fn describe(result: &QueryResult<Order>) -> String {
    match (result.data(), result.error()) {
        (Some(order), _) => format!(
            "order {} is {} ({:.2})",
            order.id,
            order.status,
            order.total_cents as f64 / 100.0
        ),
        (None, Some(error)) => format!("failed: {error}"),
        (None, None) => format!("{:?}", result.status),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Args { config, order_id } = Args::parse()?;
    let token = std::env::var("STOREKEEP_TOKEN")?;

    let settings = match config {
        Some(path) => ClientSettings::from_path(&path)?,
        None => ClientSettings::load()?,
    };
    let (executor_config, query_config) = settings.into_parts();
    let executor = RequestExecutor::new(executor_config, Arc::new(StaticToken::new(token)));
    let client = QueryClient::with_config(executor, query_config);
    let dispatcher = MutationDispatcher::new(client.clone());

    let mut order = client.resolve::<GetOrder>(order_id)?;
    let mut orders = client.resolve::<ListOrders>(())?;

    println!("{}", describe(&order.settled().await));
    if let Some(list) = orders.settled().await.data() {
        println!("{} recent orders", list.len());
    }

    match dispatcher.mutate::<CancelOrder>(order_id).await {
        Ok(cancelled) => println!("cancel accepted, server says {}", cancelled.status),
        Err(error) => println!("cancel rejected: {error}"),
    }

    // Both reads carry the order's tag, so both refetch without being asked.
    println!("{}", describe(&order.settled().await));
    if let Some(list) = orders.settled().await.data() {
        let status = list
            .iter()
            .find(|o| o.id == order_id)
            .map_or("not listed", |o| o.status.as_str());
        println!("order list now shows {status}");
    }

    Ok(())
}
