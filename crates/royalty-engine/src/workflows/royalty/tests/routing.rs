use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use super::common::*;
use crate::config::RoyaltyConfig;
use crate::workflows::royalty::router::{
    self, ACTOR_EMAIL_HEADER, ACTOR_ID_HEADER, ACTOR_PERMISSIONS_HEADER,
};
use crate::workflows::royalty::{Actor, ArticleCatalog, MemoryArticleCatalog, RoyaltyService};

fn request(method: &str, uri: &str, actor: Option<&Actor>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        let permissions: Vec<&str> = actor.permissions.iter().map(String::as_str).collect();
        builder = builder
            .header(ACTOR_ID_HEADER, actor.user_id.as_str())
            .header(ACTOR_EMAIL_HEADER, actor.email.as_str())
            .header(ACTOR_PERMISSIONS_HEADER, permissions.join(","));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).expect("serialize body")))
            .expect("request builds"),
        None => builder.body(Body::empty()).expect("request builds"),
    }
}

fn decimal_at(payload: &Value, pointer: &str) -> Decimal {
    let raw = payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("{pointer} missing in {payload}"));
    Decimal::from_str(raw).expect("decimal string")
}

#[tokio::test]
async fn requests_without_an_actor_are_unauthenticated() {
    let harness = harness();

    let response = router_for(&harness)
        .oneshot(request("GET", "/royalty/records", None, None))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn rule_set_route_stores_an_inactive_version() {
    let harness = harness();
    let draft = serde_json::to_value(news_draft("400000")).expect("draft serializes");

    let response = router_for(&harness)
        .oneshot(request("POST", "/royalty/rulesets", Some(&admin()), Some(draft)))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], "INACTIVE");
    assert_eq!(payload["version"], 1);
    assert_eq!(decimal_at(&payload, "/rates/NEWS"), money("400000"));
}

#[tokio::test]
async fn unknown_rule_set_fields_are_invalid() {
    let harness = harness();
    let mut draft = serde_json::to_value(news_draft("400000")).expect("draft serializes");
    draft["roundingMode"] = json!("HALF_UP");

    let response = router_for(&harness)
        .oneshot(request("POST", "/royalty/rulesets", Some(&admin()), Some(draft)))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "INVALID_RULE_SET");
    assert!(harness.service.list_rule_sets().expect("rule sets").is_empty());
}

#[tokio::test]
async fn publish_route_creates_a_calculated_record() {
    let (harness, _) = harness_with(news_draft("400000"));
    let body = serde_json::to_value(published("a-600", "writer-1")).expect("event serializes");

    let response = router_for(&harness)
        .oneshot(request(
            "POST",
            "/royalty/articles/published",
            Some(&admin()),
            Some(body),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], "CALCULATED");
    assert_eq!(payload["articleId"], "a-600");
    assert_eq!(decimal_at(&payload, "/finalAmount"), money("400000"));
    assert_eq!(harness.catalog.published().map(|all| all.len()).ok(), Some(1));
}

#[tokio::test]
async fn transition_routes_report_forbidden_and_conflict() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = calculated(&harness, "a-601", "writer-1");
    let router = router_for(&harness);

    let forbidden = router
        .clone()
        .oneshot(request(
            "POST",
            &format!("/royalty/records/{}/editor-confirm", record.id),
            Some(&manager()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    let payload = read_json_body(forbidden).await;
    assert_eq!(payload["error"]["permission"], "royalties:editor_confirm");

    let skipped = router
        .clone()
        .oneshot(request(
            "POST",
            &format!("/royalty/records/{}/finance-approve", record.id),
            Some(&finance()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(skipped.status(), StatusCode::CONFLICT);
    let payload = read_json_body(skipped).await;
    assert_eq!(payload["error"]["code"], "INVALID_STATE_TRANSITION");

    let confirmed = router
        .oneshot(request(
            "POST",
            &format!("/royalty/records/{}/editor-confirm", record.id),
            Some(&editor()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(confirmed.status(), StatusCode::OK);
    let payload = read_json_body(confirmed).await;
    assert_eq!(payload["status"], "EDITOR_CONFIRMED");
}

#[tokio::test]
async fn override_route_explains_the_policy_cap() {
    let mut draft = news_draft("400000");
    draft.multipliers.push(exclusive("1.5"));
    let (harness, _) = harness_with(draft);
    let mut entry = published("a-602", "writer-1");
    entry.article.flags.push("EXCLUSIVE".to_string());
    let record = harness
        .service
        .record_published(&admin(), entry)
        .expect("record calculates");

    let response = router_for(&harness)
        .oneshot(request(
            "POST",
            &format!("/royalty/records/{}/override", record.id),
            Some(&editor()),
            Some(json!({ "finalAmount": "900000", "note": "market rate" })),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "OVERRIDE_EXCEEDS_POLICY");
    assert_eq!(payload["error"]["role"], "EDITOR");
    assert_eq!(decimal_at(&payload, "/error/maxPercent"), money("10"));
    assert_eq!(decimal_at(&payload, "/error/deltaPercent"), money("50"));
}

#[tokio::test]
async fn reject_route_requires_a_reason() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = calculated(&harness, "a-603", "writer-1");

    let response = router_for(&harness)
        .oneshot(request(
            "POST",
            &format!("/royalty/records/{}/reject", record.id),
            Some(&editor()),
            Some(json!({})),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "MISSING_REASON");
}

#[tokio::test]
async fn records_route_filters_and_pages() {
    let (harness, _) = harness_with(news_draft("400000"));
    calculated(&harness, "a-604", "writer-1");
    calculated(&harness, "a-605", "writer-2");
    calculated(&harness, "a-606", "writer-1");
    let router = router_for(&harness);

    let response = router
        .clone()
        .oneshot(request(
            "GET",
            "/royalty/records?month=2026-02&status=CALCULATED&authorId=writer-1&size=1",
            Some(&reader()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["total"], 2);
    assert_eq!(payload["size"], 1);
    assert_eq!(payload["items"].as_array().map(Vec::len), Some(1));

    let response = router
        .oneshot(request(
            "GET",
            "/royalty/records?month=2026-2",
            Some(&reader()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "INVALID_MONTH_KEY");
}

#[tokio::test]
async fn bulk_route_summarises_the_sweep() {
    let (harness, _) = harness_with(news_draft("400000"));
    harness
        .catalog
        .register(published("a-607", "writer-1"))
        .expect("catalog accepts");

    let response = router_for(&harness)
        .oneshot(request(
            "POST",
            "/royalty/records/bulk-calculate",
            Some(&admin()),
            None,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["skipped"], 0);
    assert_eq!(payload["failed"], 0);
    assert!(payload["message"]
        .as_str()
        .is_some_and(|message| message.starts_with("created 1")));
}

#[tokio::test]
async fn batch_routes_create_and_export() {
    let (harness, _) = harness_with(news_draft("400000"));
    finance_approved(&harness, "a-608", "writer-1");
    let router = router_for(&harness);

    let created = router
        .clone()
        .oneshot(request(
            "POST",
            "/royalty/batches?month=2026-02",
            Some(&finance()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(created.status(), StatusCode::CREATED);
    let payload = read_json_body(created).await;
    assert_eq!(payload["status"], "DRAFT");
    assert_eq!(payload["totalItems"], 1);
    let batch_id = payload["id"].as_str().expect("batch id").to_string();

    let duplicate = router
        .clone()
        .oneshot(request(
            "POST",
            "/royalty/batches?month=2026-02",
            Some(&finance()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let export = router
        .oneshot(request(
            "GET",
            &format!("/royalty/batches/{batch_id}/export.csv"),
            Some(&payer()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(export.status(), StatusCode::OK);
    assert_eq!(
        export.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let disposition = export.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .expect("ascii header")
        .to_string();
    assert_eq!(
        disposition,
        format!("attachment; filename=\"royalty-2026-02-{batch_id}.csv\"")
    );
    let body = axum::body::to_bytes(export.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    let text = String::from_utf8(body.to_vec()).expect("utf8 csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec!["author,email,amount", "writer-1,writer-1@newsroom.test,400000"]
    );
}

#[tokio::test]
async fn unknown_record_is_not_found() {
    let harness = harness();

    let response = router_for(&harness)
        .oneshot(request(
            "GET",
            &format!("/royalty/records/{}", Uuid::new_v4()),
            Some(&reader()),
            None,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "RECORD_NOT_FOUND");
}

#[tokio::test]
async fn record_handler_returns_internal_error_on_store_failure() {
    let service = Arc::new(RoyaltyService::new(
        Arc::new(UnavailableStore),
        Arc::new(MemoryArticleCatalog::default()),
        RoyaltyConfig::default(),
    ));

    let response = router::record_handler::<UnavailableStore, MemoryArticleCatalog>(
        State(service),
        reader(),
        router::IdPath(Uuid::new_v4()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "REPOSITORY_ERROR");
    assert_eq!(payload["error"]["kind"], "internal");
}

#[tokio::test]
async fn paying_a_record_needs_an_explicit_paid_at() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = finance_approved(&harness, "a-960", "writer-1");
    let uri = format!("/royalty/records/{}/mark-paid", record.id);

    let response = router_for(&harness)
        .oneshot(request(
            "POST",
            &uri,
            Some(&payer()),
            Some(json!({ "paymentRef": "TX-77" })),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "MISSING_PAID_AT");
    assert_eq!(payload["error"]["kind"], "validation");
    assert_eq!(
        harness.service.record(record.id).expect("record").status,
        crate::workflows::royalty::domain::RoyaltyStatus::FinanceApproved
    );

    let response = router_for(&harness)
        .oneshot(request(
            "POST",
            &uri,
            Some(&payer()),
            Some(json!({ "paymentRef": "TX-77", "paidAt": "2026-03-01T17:00:00Z" })),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], "PAID");
    assert_eq!(payload["paidAt"], "2026-03-01T17:00:00Z");
}

#[tokio::test]
async fn malformed_ids_get_the_json_error_shape() {
    let harness = harness();

    for uri in [
        "/royalty/records/not-a-uuid",
        "/royalty/records/not-a-uuid/history",
        "/royalty/batches/42",
        "/royalty/rulesets/xyz",
    ] {
        let response = router_for(&harness)
            .oneshot(request("GET", uri, Some(&reader()), None))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        let payload = read_json_body(response).await;
        assert_eq!(payload["error"]["code"], "MALFORMED_REQUEST", "{uri}");
    }

    let response = router_for(&harness)
        .oneshot(request(
            "POST",
            "/royalty/records/123/editor-confirm",
            Some(&editor()),
            None,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
