//! Integration tests for the dashboard API

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use mentorboard_core::testing::SourceFixture;
use mentorboard_core::{CacheLayer, DashboardService, RefreshConfig, SystemClock};
use mentorboard_types::SubjectKey;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const TOKEN: &str = "operator-secret";

fn setup() -> (Router, Arc<DashboardService>, SourceFixture) {
    let config = RefreshConfig {
        operator_token: Some(TOKEN.to_string()),
        ..Default::default()
    };
    let clock = Arc::new(SystemClock);
    let fixture = SourceFixture::in_memory(Utc::now()).unwrap();
    let cache = CacheLayer::in_memory(clock.clone(), &config).unwrap();
    let service = Arc::new(DashboardService::new(
        Arc::new(fixture.sources.clone()),
        cache,
        clock,
        config,
    ));
    (mentorboard_web::create_router(service.clone()), service, fixture)
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

fn as_student(builder: axum::http::request::Builder, id: &str) -> axum::http::request::Builder {
    builder
        .header("x-subject-type", "student")
        .header("x-subject-id", id)
}

fn as_operator(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder.header("authorization", format!("Bearer {}", TOKEN))
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let (router, _, _) = setup();
    let (status, body) = send(router, get("/api/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "starting");
    assert_eq!(body["pending_queue"], 0);
}

#[tokio::test]
async fn test_dashboard_not_ready_is_404() {
    let (router, _, fixture) = setup();
    fixture.student("student_42").unwrap();

    let request = as_student(get("/api/dashboards/student/student_42"), "student_42")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "dashboard not ready yet");
}

#[tokio::test]
async fn test_principal_reads_own_dashboard() {
    let (router, service, fixture) = setup();
    fixture.student("student_42").unwrap();
    service
        .refresh_now(&SubjectKey::student("student_42"))
        .await
        .unwrap();

    let request = as_student(get("/api/dashboards/student/student_42"), "student_42")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record"]["key"]["subject_id"], "student_42");
    assert_eq!(body["stale"], false);

    let request = as_student(get("/api/dashboards/student/student_42"), "student_43")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router.clone(), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = get("/api/dashboards/student/student_42")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_operator_refresh() {
    let (router, _, fixture) = setup();
    fixture.director("director_7").unwrap();

    let request = as_operator(
        Request::builder()
            .method("POST")
            .uri("/api/dashboards/director/director_7/refresh"),
    )
    .body(Body::empty())
    .unwrap();
    let (status, body) = send(router.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "refreshed");

    let request = as_operator(
        Request::builder()
            .method("POST")
            .uri("/api/dashboards/director/nobody/refresh"),
    )
    .body(Body::empty())
    .unwrap();
    let (status, _) = send(router.clone(), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = as_student(
        Request::builder()
            .method("POST")
            .uri("/api/dashboards/director/director_7/refresh"),
        "student_42",
    )
    .body(Body::empty())
    .unwrap();
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_refresh_all_and_queue() {
    let (router, service, fixture) = setup();
    fixture.sponsor("org1").unwrap();
    fixture.sponsor("org2").unwrap();
    service
        .enqueue(&SubjectKey::sponsor("org1"), mentorboard_types::RefreshReason::Manual)
        .unwrap();

    let request = as_operator(Request::builder().method("POST").uri("/api/refresh/sponsor"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["refreshed"], 2);

    let request = as_operator(get("/api/queue?limit=10"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pending"], 1);
    assert_eq!(body["entries"][0]["key"]["subject_id"], "org1");

    let request = as_operator(Request::builder().method("POST").uri("/api/refresh/mentor"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_subject_is_400() {
    let (router, _, _) = setup();
    let request = as_operator(get("/api/dashboards/mentor/m1"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
