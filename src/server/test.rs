use std::sync::Arc;

use actix_web::{
    http::{header::LOCATION, StatusCode},
    middleware::ErrorHandlers,
    test, web, App, HttpRequest, HttpResponse,
};
use serde_json::{json, Value};

use super::{build_cors, cfg_path, ServerState};
use crate::db::pool::{path::MEMORY_URL, StorePool};
use crate::error::ApiError;
use crate::server::metrics::Metrics;
use crate::server::SYNC_DOCS_URL;
use crate::settings::{ServerLimits, Settings, StorageSettings};
use crate::web::{handlers, middleware};

fn test_state() -> ServerState {
    let _ = env_logger::try_init();
    let storage = StorageSettings {
        database_path: MEMORY_URL.to_owned(),
        num_partitions: 2,
        ..StorageSettings::default()
    };
    let pool = StorePool::from_settings(&storage, &Metrics::noop()).expect("Could not build pool");
    let limits = Arc::new(ServerLimits::default());
    let limits_json = serde_json::to_string(&*limits).expect("Could not serialize limits");
    ServerState {
        pool,
        limits,
        limits_json,
        metrics: Arc::new(Metrics::sink()),
        port: 8000,
    }
}

macro_rules! init_app {
    () => {{
        let state = test_state();
        let limits = Arc::clone(&state.limits);
        test::init_service(crate::build_app!(
            state,
            limits,
            build_cors(&Settings::default())
        ))
        .await
    }};
}

fn post_bsos(uri: &str, body: Value) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .insert_header(("Content-Type", "application/json"))
        .set_payload(body.to_string())
}

#[actix_rt::test]
async fn info_collections_empty_user() {
    let app = init_app!();
    let req = test::TestRequest::get()
        .uri("/1.5/42/info/collections")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("X-Last-Modified").unwrap(),
        &"0.00".to_owned()
    );
    assert!(resp.headers().get("X-Weave-Timestamp").is_some());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({}));
}

#[actix_rt::test]
async fn put_get_bso_round_trip() {
    let app = init_app!();

    let req = test::TestRequest::put()
        .uri("/1.5/42/storage/bookmarks/b1")
        .insert_header(("Content-Type", "application/json"))
        .set_payload(json!({"payload": "v1", "sortindex": 1}).to_string())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let modified = resp
        .headers()
        .get("X-Last-Modified")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    let req = test::TestRequest::get()
        .uri("/1.5/42/storage/bookmarks/b1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("X-Last-Modified").unwrap().to_str().unwrap(),
        modified
    );
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["id"], "b1");
    assert_eq!(body["payload"], "v1");
    assert_eq!(body["sortindex"], 1);
}

#[actix_rt::test]
async fn get_missing_bso_is_404() {
    let app = init_app!();
    let req = test::TestRequest::get()
        .uri("/1.5/42/storage/bookmarks/nope")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn get_missing_collection_is_empty_list() {
    let app = init_app!();
    let req = test::TestRequest::get()
        .uri("/1.5/42/storage/bookmarks")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!([]));
}

#[actix_rt::test]
async fn delete_missing_collection_reports_now() {
    let app = init_app!();
    let req = test::TestRequest::delete()
        .uri("/1.5/42/storage/not-created-yet")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert!(body.as_f64().unwrap() > 0.0);
}

#[actix_rt::test]
async fn create_read_update() {
    let app = init_app!();

    let req = post_bsos(
        "/1.5/42/storage/bookmarks",
        json!([{"id": "a", "payload": "v1", "sortindex": 1, "ttl": 2_100_000}]),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let first: Value = test::read_body_json(resp).await;
    assert_eq!(first["success"], json!(["a"]));
    let t1 = first["modified"].as_f64().unwrap();

    let req = post_bsos("/1.5/42/storage/bookmarks", json!([{"id": "a", "sortindex": 2}]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let second: Value = test::read_body_json(resp).await;
    let t2 = second["modified"].as_f64().unwrap();
    assert!(t2 > t1);

    let req = test::TestRequest::get()
        .uri("/1.5/42/storage/bookmarks?ids=a&full=yes")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    // payload survived the sortindex-only update, modified advanced
    assert_eq!(body[0]["payload"], "v1");
    assert_eq!(body[0]["sortindex"], 2);
    assert_eq!(body[0]["modified"].as_f64().unwrap(), t2);
}

#[actix_rt::test]
async fn precondition_failed_leaves_state_alone() {
    let app = init_app!();

    let req = post_bsos(
        "/1.5/42/storage/bookmarks",
        json!([{"id": "a", "payload": "v1"}]),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let t1 = resp
        .headers()
        .get("X-Last-Modified")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    let req = post_bsos(
        "/1.5/42/storage/bookmarks",
        json!([{"id": "a", "payload": "v2"}]),
    )
    .insert_header(("X-If-Unmodified-Since", "0.01"))
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(
        resp.headers().get("X-Last-Modified").unwrap().to_str().unwrap(),
        t1
    );

    let req = test::TestRequest::get()
        .uri("/1.5/42/storage/bookmarks?ids=a&full=yes")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body[0]["payload"], "v1");
}

#[actix_rt::test]
async fn not_modified_on_info_collections() {
    let app = init_app!();

    let req = post_bsos(
        "/1.5/42/storage/bookmarks",
        json!([{"id": "a", "payload": "v1"}]),
    )
    .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get()
        .uri("/1.5/42/info/collections")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let t = resp
        .headers()
        .get("X-Last-Modified")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    let req = test::TestRequest::get()
        .uri("/1.5/42/info/collections")
        .insert_header(("X-If-Modified-Since", t.clone()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(
        resp.headers().get("X-Last-Modified").unwrap().to_str().unwrap(),
        t
    );
}

#[actix_rt::test]
async fn collection_pagination() {
    let app = init_app!();

    let bsos: Vec<Value> = (0..12)
        .map(|i| json!({"id": format!("b{}", i), "payload": "x", "sortindex": i}))
        .collect();
    let req = post_bsos("/1.5/42/storage/bookmarks", Value::Array(bsos)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/1.5/42/storage/bookmarks?sort=index&limit=5")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(
        resp.headers().get("X-Weave-Next-Offset").unwrap(),
        &"5".to_owned()
    );
    assert_eq!(
        resp.headers().get("X-Weave-Records").unwrap(),
        &"5".to_owned()
    );
    let page: Value = test::read_body_json(resp).await;
    assert_eq!(page, json!(["b11", "b10", "b9", "b8", "b7"]));

    let req = test::TestRequest::get()
        .uri("/1.5/42/storage/bookmarks?sort=index&limit=5&offset=5")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(
        resp.headers().get("X-Weave-Next-Offset").unwrap(),
        &"10".to_owned()
    );
    let page: Value = test::read_body_json(resp).await;
    assert_eq!(page, json!(["b6", "b5", "b4", "b3", "b2"]));

    let req = test::TestRequest::get()
        .uri("/1.5/42/storage/bookmarks?sort=index&limit=5&offset=10")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.headers().get("X-Weave-Next-Offset").is_none());
    let page: Value = test::read_body_json(resp).await;
    assert_eq!(page, json!(["b1", "b0"]));
}

#[actix_rt::test]
async fn batch_accumulates_and_commits() {
    let app = init_app!();

    let req = post_bsos(
        "/1.5/42/storage/bookmarks?batch=true",
        json!([{"id": "a", "payload": "x"}, {"id": "b", "payload": "x"}]),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let pre_batch = resp
        .headers()
        .get("X-Last-Modified")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert_eq!(pre_batch, "0.00");
    let body: Value = test::read_body_json(resp).await;
    let batch_id = body["batch"].as_str().unwrap().to_owned();
    assert!(batch_id.starts_with('b'));

    let req = post_bsos(
        &format!("/1.5/42/storage/bookmarks?batch={}", batch_id),
        json!([{"id": "c", "payload": "x"}, {"id": "d", "payload": "x"}]),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    // still nothing visible
    assert_eq!(
        resp.headers().get("X-Last-Modified").unwrap().to_str().unwrap(),
        pre_batch
    );

    let req = post_bsos(
        &format!("/1.5/42/storage/bookmarks?batch={}&commit=true", batch_id),
        json!([{"id": "e", "payload": "x"}, {"id": "f", "payload": "x"}]),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let committed = resp
        .headers()
        .get("X-Last-Modified")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(committed.parse::<f64>().unwrap() > 0.0);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"].as_array().unwrap().len(), 6);

    let req = test::TestRequest::get()
        .uri("/1.5/42/storage/bookmarks")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(
        resp.headers().get("X-Weave-Records").unwrap(),
        &"6".to_owned()
    );
}

#[actix_rt::test]
async fn commit_without_batch_is_rejected() {
    let app = init_app!();
    let req = post_bsos(
        "/1.5/42/storage/bookmarks?commit=true",
        json!([{"id": "a", "payload": "x"}]),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn unknown_batch_id_is_rejected() {
    let app = init_app!();
    let req = post_bsos(
        "/1.5/42/storage/bookmarks?batch=b999",
        json!([{"id": "a", "payload": "x"}]),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn invalid_content_type_is_415() {
    let app = init_app!();
    let req = test::TestRequest::post()
        .uri("/1.5/42/storage/bookmarks")
        .insert_header(("Content-Type", "application/xml"))
        .set_payload("<bsos/>".to_owned())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[actix_rt::test]
async fn oversize_declared_batch_is_413_with_legacy_body() {
    let app = init_app!();
    let req = post_bsos(
        "/1.5/42/storage/bookmarks?batch=true",
        json!([{"id": "a", "payload": "x"}]),
    )
    .insert_header(("X-Weave-Total-Records", "100000"))
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = test::read_body(resp).await;
    assert_eq!(body, "14".as_bytes());
}

#[actix_rt::test]
async fn user_wipe_resets_everything() {
    let app = init_app!();

    let req = post_bsos(
        "/1.5/42/storage/bookmarks",
        json!([{"id": "a", "payload": "v1"}]),
    )
    .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::delete().uri("/1.5/42/storage").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/1.5/42/info/collections")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({}));
}

#[actix_rt::test]
async fn quota_reports_used_kb_and_null() {
    let app = init_app!();
    let req = post_bsos(
        "/1.5/42/storage/bookmarks",
        json!([{"id": "a", "payload": "0123456789"}]),
    )
    .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get().uri("/1.5/42/info/quota").to_request();
    let resp = test::call_service(&app, req).await;
    let body: Value = test::read_body_json(resp).await;
    let arr = body.as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert!(arr[0].as_f64().unwrap() > 0.0);
    assert!(arr[1].is_null());
}

#[actix_rt::test]
async fn configuration_is_static() {
    let app = init_app!();
    let req = test::TestRequest::get()
        .uri("/1.5/42/info/configuration")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("X-Last-Modified").unwrap(),
        &"0.00".to_owned()
    );
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["max_post_records"], 100);
    assert_eq!(body["max_record_payload_bytes"], 262_144);
    assert!(body.get("max_bso_get_limit").is_none());
}

#[actix_rt::test]
async fn put_rejects_known_bad_crypto_payload() {
    let app = init_app!();
    let req = test::TestRequest::put()
        .uri("/1.5/42/storage/crypto/keys")
        .insert_header(("Content-Type", "application/json"))
        .set_payload(
            json!({"payload": r#"{"IV": "AAAAAAAAAAAAAAAAAAAAAA=="}"#}).to_string(),
        )
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    // ...while the same payload is fine outside the crypto collection
    let req = test::TestRequest::put()
        .uri("/1.5/42/storage/bookmarks/keys")
        .insert_header(("Content-Type", "application/json"))
        .set_payload(
            json!({"payload": r#"{"IV": "AAAAAAAAAAAAAAAAAAAAAA=="}"#}).to_string(),
        )
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn heartbeat_reports_storage_health() {
    let app = init_app!();
    let req = test::TestRequest::get().uri("/__heartbeat__").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "Ok");
    assert_eq!(body["storage"], "Ok");
}

#[actix_rt::test]
async fn root_redirects_to_docs() {
    let app = init_app!();
    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers().get(LOCATION).unwrap().to_str().unwrap(),
        SYNC_DOCS_URL
    );
}
