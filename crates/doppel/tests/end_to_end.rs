//! End-to-end tests: real sockets, real clients, the full stack.

use doppel::admin::types::{imposter_json, ImposterQueryParams};
use doppel::admin::{AccessPolicy, ManagementServer, ServerOptions};
use doppel::imposter::ImposterRegistry;
use doppel::store::NoOpDataStore;
use serde_json::{json, Value};
use std::sync::Arc;

fn registry() -> Arc<ImposterRegistry> {
    ImposterRegistry::new(Arc::new(NoOpDataStore), true)
}

async fn create(registry: &Arc<ImposterRegistry>, config: Value) -> u16 {
    let config = serde_json::from_value(config).unwrap();
    registry.create(config).await.unwrap().port()
}

#[tokio::test]
async fn test_static_http_imposter() {
    let registry = registry();
    let port = create(
        &registry,
        json!({
            "protocol": "http",
            "host": "127.0.0.1",
            "stubs": [{
                "responses": [{"is": {
                    "statusCode": 200,
                    "headers": {"Content-Type": "application/json"},
                    "body": "{\"message\":\"hi\"}"
                }}]
            }]
        }),
    )
    .await;

    let response = reqwest::get(format!("http://127.0.0.1:{port}/any"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(response.text().await.unwrap(), "{\"message\":\"hi\"}");

    registry.delete(port).unwrap();
}

#[tokio::test]
async fn test_predicate_ordering_over_the_wire() {
    let registry = registry();
    let port = create(
        &registry,
        json!({
            "protocol": "http",
            "host": "127.0.0.1",
            "stubs": [
                {
                    "predicates": [{"equals": {"path": "/test"}}],
                    "responses": [{"is": {"statusCode": 200, "body": "Matched!"}}]
                },
                {
                    "responses": [{"is": {"statusCode": 404, "body": "Not found"}}]
                }
            ]
        }),
    )
    .await;

    let hit = reqwest::get(format!("http://127.0.0.1:{port}/test"))
        .await
        .unwrap();
    assert_eq!(hit.status(), 200);
    assert_eq!(hit.text().await.unwrap(), "Matched!");

    let miss = reqwest::get(format!("http://127.0.0.1:{port}/other"))
        .await
        .unwrap();
    assert_eq!(miss.status(), 404);
    assert_eq!(miss.text().await.unwrap(), "Not found");

    registry.delete(port).unwrap();
}

#[tokio::test]
async fn test_copy_behaviors_fill_tokens() {
    let registry = registry();
    let port = create(
        &registry,
        json!({
            "protocol": "http",
            "host": "127.0.0.1",
            "stubs": [{
                "responses": [{
                    "is": {"statusCode": 200, "body": "Hello ${NAME}, your ID is ${ID}"},
                    "behaviors": [
                        {"copy": [{"from": "query.name", "into": "${NAME}"}]},
                        {"copy": [{"from": "path", "into": "${ID}",
                                   "using": {"method": "regex", "selector": "/users/(\\d+)"}}]}
                    ]
                }]
            }]
        }),
    )
    .await;

    let response = reqwest::get(format!("http://127.0.0.1:{port}/users/123?name=Alice"))
        .await
        .unwrap();
    assert_eq!(
        response.text().await.unwrap(),
        "Hello Alice, your ID is 123"
    );

    registry.delete(port).unwrap();
}

#[tokio::test]
async fn test_recorded_request_body_is_a_json_string() {
    let registry = registry();
    let port = create(
        &registry,
        json!({
            "protocol": "http",
            "host": "127.0.0.1",
            "recordRequests": true,
            "stubs": [{"responses": [{"is": {"statusCode": 200}}]}]
        }),
    )
    .await;

    let client = reqwest::Client::new();
    client
        .post(format!("http://127.0.0.1:{port}/submit"))
        .header("Content-Type", "application/json")
        .body(r#"{"foo":"bar","num":123}"#)
        .send()
        .await
        .unwrap();

    let imposter = registry.get(port).unwrap();
    let detail = imposter_json(
        &imposter,
        "http://localhost:2525",
        ImposterQueryParams::default(),
    );
    let body = detail["requests"][0]["body"]
        .as_str()
        .expect("recorded body must serialize as a string");
    assert_eq!(
        serde_json::from_str::<Value>(body).unwrap(),
        json!({"foo": "bar", "num": 123})
    );

    registry.delete(port).unwrap();
}

#[tokio::test]
async fn test_cors_preflight_short_circuits() {
    let registry = registry();
    let port = create(
        &registry,
        json!({
            "protocol": "http",
            "host": "127.0.0.1",
            "allowCORS": true,
            "stubs": [{"responses": [{"is": {"statusCode": 500, "body": "not this"}}]}]
        }),
    )
    .await;

    let client = reqwest::Client::new();
    let preflight = client
        .request(
            reqwest::Method::OPTIONS,
            format!("http://127.0.0.1:{port}/whatever"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), 200);
    assert_eq!(
        preflight.headers()["access-control-allow-origin"]
            .to_str()
            .unwrap(),
        "*"
    );

    registry.delete(port).unwrap();
}

async fn spawn_management(registry: Arc<ImposterRegistry>) -> (u16, tokio::task::JoinHandle<()>) {
    let options = ServerOptions {
        port: 0,
        host: "127.0.0.1".to_string(),
        allow_injection: true,
        origin: None,
        policy: AccessPolicy::default(),
    };
    let server = ManagementServer::bind(options, registry).await.unwrap();
    let port = server.port();
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (port, handle)
}

#[tokio::test]
async fn test_management_lifecycle_round_trip() {
    let registry = registry();
    let (admin_port, _handle) = spawn_management(Arc::clone(&registry)).await;
    let base = format!("http://127.0.0.1:{admin_port}");
    let client = reqwest::Client::new();

    // Create.
    let created = client
        .post(format!("{base}/imposters"))
        .json(&json!({
            "protocol": "http",
            "host": "127.0.0.1",
            "name": "orders",
            "stubs": [{"responses": [{"is": {"statusCode": 200, "body": "ok"}}]}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let created: Value = created.json().await.unwrap();
    let port = created["port"].as_u64().unwrap() as u16;
    assert_eq!(created["name"], "orders");
    assert!(created["_links"]["self"]["href"].is_string());

    // The imposter serves traffic.
    let served = reqwest::get(format!("http://127.0.0.1:{port}/x"))
        .await
        .unwrap();
    assert_eq!(served.text().await.unwrap(), "ok");

    // List.
    let listed: Value = client
        .get(format!("{base}/imposters"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["imposters"][0]["port"].as_u64().unwrap() as u16, port);

    // Replayable fetch carries no hypermedia or request log.
    let replayable: Value = client
        .get(format!("{base}/imposters/{port}?replayable=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(replayable.get("_links").is_none());
    assert!(replayable.get("requests").is_none());

    // Stub management: add at the front, then delete it.
    let added = client
        .post(format!("{base}/imposters/{port}/stubs?index=0"))
        .json(&json!({"stub": {
            "predicates": [{"equals": {"path": "/added"}}],
            "responses": [{"is": {"statusCode": 201, "body": "added"}}]
        }}))
        .send()
        .await
        .unwrap();
    assert_eq!(added.status(), 200);

    let hit = reqwest::get(format!("http://127.0.0.1:{port}/added"))
        .await
        .unwrap();
    assert_eq!(hit.status(), 201);

    let removed = client
        .delete(format!("{base}/imposters/{port}/stubs/0"))
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 200);

    // Bad index is a 400 with the error envelope.
    let bad = client
        .delete(format!("{base}/imposters/{port}/stubs/99"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
    let envelope: Value = bad.json().await.unwrap();
    assert_eq!(envelope["errors"][0]["code"], "bad data");

    // Delete twice: first returns the imposter, second an empty object.
    let first = client
        .delete(format!("{base}/imposters/{port}"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["port"].as_u64().unwrap() as u16, port);

    let second = client
        .delete(format!("{base}/imposters/{port}"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 200);
    let second: Value = second.json().await.unwrap();
    assert_eq!(second, json!({}));

    // Missing imposter reads are 404 with the envelope.
    let missing = client
        .get(format!("{base}/imposters/{port}"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let envelope: Value = missing.json().await.unwrap();
    assert_eq!(envelope["errors"][0]["code"], "no such resource");
}

#[tokio::test]
async fn test_management_config_and_logs() {
    let registry = registry();
    let (admin_port, _handle) = spawn_management(registry).await;
    let base = format!("http://127.0.0.1:{admin_port}");

    let config: Value = reqwest::get(format!("{base}/config"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["options"]["allowInjection"], true);
    assert!(config["version"].is_string());

    let logs: Value = reqwest::get(format!("{base}/logs?startIndex=0&endIndex=10"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(logs["logs"].is_array());
}

#[tokio::test]
async fn test_put_imposters_replaces_collection() {
    let registry = registry();
    let (admin_port, _handle) = spawn_management(Arc::clone(&registry)).await;
    let base = format!("http://127.0.0.1:{admin_port}");
    let client = reqwest::Client::new();

    create(
        &registry,
        json!({"protocol": "http", "host": "127.0.0.1",
               "stubs": [{"responses": [{"is": {"statusCode": 200}}]}]}),
    )
    .await;

    let replaced = client
        .put(format!("{base}/imposters"))
        .json(&json!({"imposters": [
            {"protocol": "http", "host": "127.0.0.1",
             "stubs": [{"responses": [{"is": {"statusCode": 202, "body": "replacement"}}]}]}
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(replaced.status(), 200);
    let replaced: Value = replaced.json().await.unwrap();
    let imposters = replaced["imposters"].as_array().unwrap();
    assert_eq!(imposters.len(), 1);

    let port = imposters[0]["port"].as_u64().unwrap() as u16;
    let served = reqwest::get(format!("http://127.0.0.1:{port}/y"))
        .await
        .unwrap();
    assert_eq!(served.status(), 202);

    assert_eq!(registry.get_all().len(), 1);
}
