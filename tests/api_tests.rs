mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::*;
use flashcard_forge::api::{router, AppState};

fn app(h: &Harness) -> Router {
    router(AppState {
        controller: Arc::clone(&h.controller),
        config: Arc::new(test_config()),
    })
}

fn request(method: Method, uri: &str, requester: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(requester) = requester {
        builder = builder.header("x-requester-id", requester);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

/// Submit [`VIDEO`] for `requester` and wait for the pipeline to finish
async fn generate_and_wait(h: &Harness, app: &Router, requester: &str) -> Value {
    let (status, body) = send(
        app,
        request(
            Method::POST,
            "/api/flashcards/generate",
            Some(requester),
            Some(json!({ "videoId": format!("https://www.youtube.com/watch?v={}", VIDEO) })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
    h.controller.join(&key(VIDEO, requester)).await;
    body
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let (status, body) = send(&app(&h), request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_requester_header_required() {
    let h = harness();
    let app = app(&h);

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/flashcards/generate", None, Some(json!({ "videoId": VIDEO }))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, request(Method::GET, "/api/flashcards", Some("   "), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_generate_validation() {
    let h = harness();
    let app = app(&h);

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/flashcards/generate", Some("alice"), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Video ID is required");

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/flashcards/generate",
            Some("alice"),
            Some(json!({ "videoId": "https://vimeo.com/123" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_generate_rejects_malformed_bodies_as_bad_request() {
    let h = harness();
    let app = app(&h);

    let missing = request(Method::POST, "/api/flashcards/generate", Some("alice"), None);
    let plain_text = Request::builder()
        .method(Method::POST)
        .uri("/api/flashcards/generate")
        .header("x-requester-id", "alice")
        .header("content-type", "text/plain")
        .body(Body::from(VIDEO))
        .unwrap();
    let broken_json = Request::builder()
        .method(Method::POST)
        .uri("/api/flashcards/generate")
        .header("x-requester-id", "alice")
        .header("content-type", "application/json")
        .body(Body::from("{\"videoId\": "))
        .unwrap();
    let wrong_type = request(
        Method::POST,
        "/api/flashcards/generate",
        Some("alice"),
        Some(json!({ "videoId": 42 })),
    );

    for req in [missing, plain_text, broken_json, wrong_type] {
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"), "{}", body);
    }
    assert_eq!(h.controller.running_jobs().await, 0);
}

#[tokio::test]
async fn test_generate_poll_and_fetch() {
    let h = harness();
    let app = app(&h);

    let accepted = generate_and_wait(&h, &app, "alice").await;
    assert_eq!(accepted["videoId"], VIDEO);
    assert_eq!(accepted["status"], "queued");
    assert!(accepted["jobId"].is_string());

    // the Job Record is gone but the result reports completion
    let (status, body) = send(&app, request(Method::GET, &format!("/api/jobs/{}", VIDEO), Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100);

    let (status, body) = send(
        &app,
        request(Method::GET, &format!("/api/flashcards/{}", VIDEO), Some("alice"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Rust Ownership Explained");
    let cards = body["flashcards"].as_array().unwrap();
    assert_eq!(cards.len(), 3);
    assert_eq!(cards[2]["endTime"], 720_000);

    // another requester sees nothing
    let (status, _) = send(
        &app,
        request(Method::GET, &format!("/api/flashcards/{}", VIDEO), Some("bob"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn generate_request(requester: &str) -> Request<Body> {
    request(
        Method::POST,
        "/api/flashcards/generate",
        Some(requester),
        Some(json!({ "videoId": VIDEO })),
    )
}

#[tokio::test]
async fn test_duplicate_job_conflict() {
    let (h, _gate) = gated_harness();
    let app = app(&h);

    let (status, first) = send(&app, generate_request("alice")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&app, generate_request("alice")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["jobId"], first["jobId"]);
    assert_eq!(body["videoId"], VIDEO);

    h.controller.cancel(&key(VIDEO, "alice")).await.unwrap();
    h.controller.join(&key(VIDEO, "alice")).await;
}

#[tokio::test]
async fn test_duplicate_result_conflict() {
    let h = harness();
    let app = app(&h);
    generate_and_wait(&h, &app, "alice").await;

    let (status, body) = send(&app, generate_request("alice")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["videoId"], VIDEO);
    assert!(body.get("jobId").is_none());
}

#[tokio::test]
async fn test_job_status_and_cancel_not_found() {
    let h = harness();
    let app = app(&h);
    let uri = format!("/api/jobs/{}", OTHER_VIDEO);

    let (status, _) = send(&app, request(Method::GET, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request(Method::DELETE, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request(Method::GET, "/api/jobs/not!valid", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_active_job() {
    let (h, _gate) = gated_harness();
    let app = app(&h);

    let (status, accepted) = send(&app, generate_request("alice")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let uri = format!("/api/jobs/{}", VIDEO);
    let (status, body) = send(&app, request(Method::GET, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobId"], accepted["jobId"]);

    let (status, body) = send(&app, request(Method::DELETE, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobId"], accepted["jobId"]);
    h.controller.join(&key(VIDEO, "alice")).await;

    let (status, _) = send(&app, request(Method::GET, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_job_reports_error() {
    let h = harness();
    let app = app(&h);

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/flashcards/generate",
            Some("alice"),
            Some(json!({ "videoId": OTHER_VIDEO })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    h.controller.join(&key(OTHER_VIDEO, "alice")).await;

    let (status, body) = send(
        &app,
        request(Method::GET, &format!("/api/jobs/{}", OTHER_VIDEO), Some("alice"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"], "Transcript unavailable: no captions for 9bZkp7q5f0w");
}

#[tokio::test]
async fn test_list_search_and_suggestions() {
    let h = harness();
    let app = app(&h);
    generate_and_wait(&h, &app, "alice").await;

    let (status, body) = send(&app, request(Method::GET, "/api/flashcards", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&app, request(Method::GET, "/api/flashcards", Some("bob"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/flashcards/search?query=OWNERSHIP", Some("alice"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["videoId"], VIDEO);

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/flashcards/search?query=python", Some("alice"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/flashcards/search?query=", Some("alice"), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/flashcards/suggestions?query=rust", Some("alice"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{
        "videoId": VIDEO,
        "title": "Rust Ownership Explained",
        "thumbnail": format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", VIDEO),
    }]));

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/flashcards/suggestions?query=python", Some("alice"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = send(&app, request(Method::GET, "/api/flashcards/suggestions", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_flashcards() {
    let h = harness();
    let app = app(&h);
    generate_and_wait(&h, &app, "alice").await;
    let uri = format!("/api/flashcards/{}", VIDEO);

    let (status, _) = send(&app, request(Method::DELETE, &uri, Some("bob"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request(Method::DELETE, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, request(Method::GET, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // the video can be generated again once its set is gone
    generate_and_wait(&h, &app, "alice").await;
}
