use std::time::Duration;

use nyx_client::{Data, DataFilter, NyxClient, NyxConfig};
use nyx_fake_exchange::{FakeExchange, EMAIL, PASSWORD};
use serde_json::json;

pub const RAINFALL_CSV: &str = "Month,Rain (mm)\njan,80.5\nfeb,61\nmar,oops,extra\napr,40.25\n";

pub async fn connect(exchange: &FakeExchange) -> NyxClient {
    let config = NyxConfig::builder()
        .default_env_file(false)
        .process_env(false)
        .url(exchange.uri())
        .email(EMAIL)
        .password(PASSWORD)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    NyxClient::connect(config).await.unwrap()
}

/// Seeds a rainfall CSV and a cities JSON dataset from another organisation,
/// plus a text report, and subscribes to all three.
pub async fn subscribed_catalogue(exchange: &FakeExchange, client: &NyxClient) -> Vec<Data> {
    exchange.seed(
        "globex",
        "rainfall",
        json!({
            "title": "UK Rainfall 2023",
            "description": "Monthly rainfall",
            "contentType": "text/csv",
        }),
        RAINFALL_CSV,
    );
    exchange.seed(
        "globex",
        "cities",
        json!({
            "title": "Cities",
            "description": "City populations",
            "contentType": "application/json",
        }),
        r#"[{"city": "Leeds", "population": 800000}, {"city": "York", "population": 200000}]"#,
    );
    exchange.seed(
        "globex",
        "report",
        json!({
            "title": "Flood report",
            "description": "Narrative report",
            "contentType": "text/plain",
        }),
        "Heavy rainfall in March caused flooding across the north. Sales were unaffected.",
    );

    let data = client.get_data(&DataFilter::new()).await.unwrap();
    for d in &data {
        client.subscribe(d).await.unwrap();
    }
    data
}
