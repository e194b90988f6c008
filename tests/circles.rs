mod common;

use nyx_client::{Circle, NewData, RemoteHost, Visibility};
use nyx_fake_exchange::FakeExchange;
use serde_json::json;

#[tokio::test]
async fn test_circle_lifecycle() {
    let exchange = FakeExchange::start().await;
    let client = common::connect(&exchange).await;

    let draft = Circle::new("partners").with_description("trusted orgs");
    let created = client.create_circle(&draft).await.unwrap();
    assert!(created.did.as_deref().unwrap().starts_with("did:iotics:"));
    assert_eq!(created.name, draft.name);

    let fetched = client.get_circle_by_name("partners").await.unwrap();
    assert_eq!(fetched, created);

    let updated = created.clone().with_organization(RemoteHost {
        did: "did:iotics:globex".into(),
        name: "globex".into(),
    });
    client.update_circle(&updated).await.unwrap();
    let circles = client.get_circles().await.unwrap();
    assert_eq!(circles.len(), 1);
    assert_eq!(circles[0].organizations.len(), 1);
    assert_eq!(circles[0].did, created.did);

    client.delete_circle(&updated).await.unwrap();
    assert!(client
        .get_circle_by_name("partners")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(client.delete_circle_by_name("partners").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_share_data_with_circle() {
    let exchange = FakeExchange::start().await;
    let client = common::connect(&exchange).await;

    assert!(Visibility::shared_with(&[Circle::new("draft")])
        .unwrap_err()
        .is_validation());

    let circle = client.create_circle(&Circle::new("partners")).await.unwrap();
    let visibility = Visibility::shared_with(&[circle.clone()]).unwrap();

    let data = client
        .create_data(
            &NewData::new("shared", "Shared", "text/plain")
                .download_url("http://x/shared.txt")
                .visibility(visibility.clone()),
        )
        .await
        .unwrap();
    assert_eq!(data.visibility, visibility);
    assert_eq!(
        exchange.product("shared").unwrap()["circles"],
        json!([circle.did.unwrap()])
    );
}

#[tokio::test]
async fn test_connections() {
    let exchange = FakeExchange::start().await;
    let client = common::connect(&exchange).await;

    assert_eq!(client.get_connections(None).await.unwrap().len(), 2);

    let uploads = client.get_connections(Some(true)).await.unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].name, "uploads");
    assert!(uploads[0].allow_upload);
}
