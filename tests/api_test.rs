//! HTTP surface exercised in-process through the router

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use bingohall::{api::ApiServer, config::BingoConfig, factory::EngineFactory};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    assert!(response.headers().contains_key("x-request-id"));
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn test_purchase_flow_over_http() {
    let mut config = BingoConfig::testing();
    config.game.purchase_window_ms = 60_000;
    let engine = EngineFactory::create_engine(config.clone()).await.unwrap();
    let app = ApiServer::new(config.api.clone(), engine.controller.clone()).create_app();

    let (status, health) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["seed_public_key"].as_str().unwrap().len(), 64);

    let (status, created) = call(&app, "POST", "/games", Some(json!({ "is_special": false }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let game_id = created["game_id"].as_str().unwrap().to_string();

    let (status, game) = call(&app, "GET", &format!("/games/{}", game_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(game["status"], "scheduled");
    assert_eq!(game["card_price"], 100);

    // No funds yet
    let purchase = json!({ "user_id": "alice" });
    let (status, error) = call(&app, "POST", &format!("/games/{}/cards", game_id), Some(purchase.clone())).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(error["error"]["code"], "INSUFFICIENT_BALANCE");

    let (status, balance) = call(&app, "POST", "/users/alice/deposits", Some(json!({ "amount": 150 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(balance["balance"], 150);

    let (status, card) = call(&app, "POST", &format!("/games/{}/cards", game_id), Some(purchase)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(card["numbers"].as_array().unwrap().len(), 3);

    let (status, cards) = call(&app, "GET", &format!("/games/{}/cards/alice", game_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cards["cards"][0]["card_id"], card["card_id"]);

    let (status, history) = call(&app, "GET", "/users/alice/transactions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["balance"], 50);
    assert_eq!(history["transactions"].as_array().unwrap().len(), 2);

    // Not started yet, so there is no seed to verify against
    let (status, verdict) = call(&app, "GET", &format!("/games/{}/verify", game_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["valid"], false);

    engine.controller.start_game(&game_id).unwrap();
    let (status, error) = call(&app, "POST", &format!("/games/{}/cards", game_id), Some(json!({ "user_id": "alice" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "GAME_NOT_JOINABLE");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_game_is_not_found() {
    let config = BingoConfig::testing();
    let engine = EngineFactory::create_engine(config.clone()).await.unwrap();
    let app = ApiServer::new(config.api.clone(), engine.controller.clone()).create_app();

    for uri in ["/games/missing", "/games/missing/verify", "/games/missing/cards/bob"] {
        let (status, body) = call(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    let (status, _) = call(&app, "POST", "/users/bob/deposits", Some(json!({ "amount": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    engine.shutdown().await;
}
