use std::time::Duration;

use nyx_client::{NyxClient, NyxConfig};
use nyx_fake_exchange::{FakeExchange, EMAIL, PASSWORD};

pub fn config(uri: &str) -> nyx_client::config::NyxConfigBuilder {
    NyxConfig::builder()
        .default_env_file(false)
        .process_env(false)
        .url(uri)
        .timeout(Duration::from_secs(5))
}

pub async fn connect(exchange: &FakeExchange) -> NyxClient {
    let config = config(&exchange.uri())
        .email(EMAIL)
        .password(PASSWORD)
        .build()
        .unwrap();
    NyxClient::connect(config).await.unwrap()
}
