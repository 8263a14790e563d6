//! HTTP surface tests
//!
//! Drive the router with `oneshot` against a temporary database.

mod common;

use axum::http::{header, StatusCode};
use chorus_api::rate_limit::{RateLimitConfig, RateLimitPolicies};
use chorus_api::safety::SafetyVerdict;
use common::{
    empty_request, extract_json, json_request, HarnessOptions, SafetyMode, TestHarness,
    GOOD_CONTENT, INTERNAL_SECRET,
};
use serde_json::json;
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot` method

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let h = TestHarness::new().await;

    let response = h.app().oneshot(empty_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "chorus-api");
    assert!(body["version"].is_string());
}

// =============================================================================
// POST /api/contribute
// =============================================================================

#[tokio::test]
async fn test_contribute_requires_session() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let problem = h.problem(owner, 5).await;

    let request = json_request(
        "POST",
        "/api/contribute",
        None,
        json!({ "problem_id": problem.id, "content": GOOD_CONTENT }),
    );
    let response = h.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"], "Unauthorized");

    // An unknown token is no better
    let request = json_request(
        "POST",
        "/api/contribute",
        Some("not-a-real-token"),
        json!({ "problem_id": problem.id, "content": GOOD_CONTENT }),
    );
    let response = h.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_contribute_success_and_duplicate() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let user = h.user().await;
    let token = h.token(user).await;
    let problem = h.problem(owner, 5).await;
    let body = json!({ "problem_id": problem.id, "content": GOOD_CONTENT });

    let response = h
        .app()
        .oneshot(json_request("POST", "/api/contribute", Some(&token), body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["flagged"], false);
    assert!(json.get("flagReason").is_none());

    let response = h
        .app()
        .oneshot(json_request("POST", "/api/contribute", Some(&token), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["error"], "You have already contributed to this problem");
}

#[tokio::test]
async fn test_contribute_flagged_reports_reason() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let user = h.user().await;
    let token = h.token(user).await;
    let problem = h.problem(owner, 5).await;
    h.safety
        .set_mode(SafetyMode::Verdict(SafetyVerdict::unsafe_because("Personal attack")));

    let response = h
        .app()
        .oneshot(json_request(
            "POST",
            "/api/contribute",
            Some(&token),
            json!({ "problem_id": problem.id, "content": GOOD_CONTENT }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["flagged"], true);
    assert_eq!(json["flagReason"], "Personal attack");
}

#[tokio::test]
async fn test_contribute_malformed_body_is_bad_request() {
    let h = TestHarness::new().await;
    let user = h.user().await;
    let token = h.token(user).await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/contribute")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = h.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["error"], "Missing required fields");
}

#[tokio::test]
async fn test_contribute_rate_limit_sets_retry_after() {
    let h = TestHarness::with_options(HarnessOptions {
        policies: RateLimitPolicies {
            contribute: RateLimitConfig::new(1, Duration::from_secs(60)),
            ..RateLimitPolicies::default()
        },
        ..HarnessOptions::default()
    })
    .await;
    let user = h.user().await;
    let token = h.token(user).await;

    let first = h
        .app()
        .oneshot(json_request("POST", "/api/contribute", Some(&token), json!({})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::BAD_REQUEST);

    let second = h
        .app()
        .oneshot(json_request("POST", "/api/contribute", Some(&token), json!({})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers()[header::RETRY_AFTER], "60");
}

#[tokio::test]
async fn test_contribute_safety_outage_is_503() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let user = h.user().await;
    let token = h.token(user).await;
    let problem = h.problem(owner, 5).await;
    h.safety.set_mode(SafetyMode::Unavailable);

    let response = h
        .app()
        .oneshot(json_request(
            "POST",
            "/api/contribute",
            Some(&token),
            json!({ "problem_id": problem.id, "content": GOOD_CONTENT }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    let json = extract_json(response.into_body()).await;
    // Upstream detail is not leaked
    assert!(!json["error"].as_str().unwrap().contains("connection refused"));
}

// =============================================================================
// POST /api/synthesise/:problem_id
// =============================================================================

#[tokio::test]
async fn test_synthesise_requires_identity() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let problem = h.problem(owner, 5).await;
    let uri = format!("/api/synthesise/{}", problem.id);

    let response = h.app().oneshot(empty_request("POST", &uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri(&uri)
        .header("x-internal-secret", "wrong-secret")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = h.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_synthesise_with_internal_secret() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let problem = h.problem(owner, 5).await;
    let uri = format!("/api/synthesise/{}", problem.id);

    let internal = || {
        axum::http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("x-internal-secret", INTERNAL_SECRET)
            .body(axum::body::Body::empty())
            .unwrap()
    };

    let response = h.app().oneshot(internal()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["error"], "No contributions to synthesise");

    let contributor = h.user().await;
    h.state
        .intake
        .submit(Some(contributor), common::submission(problem.id, GOOD_CONTENT))
        .await
        .unwrap();

    let response = h.app().oneshot(internal()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["success"], true);
}

#[tokio::test]
async fn test_synthesise_forbidden_for_non_owner() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let stranger = h.user().await;
    let token = h.token(stranger).await;
    let problem = h.problem(owner, 5).await;

    let response = h
        .app()
        .oneshot(json_request(
            "POST",
            &format!("/api/synthesise/{}", problem.id),
            Some(&token),
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_synthesis_failure_is_500_with_generic_message() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let token = h.token(owner).await;
    let problem = h.problem(owner, 5).await;
    let contributor = h.user().await;
    h.state
        .intake
        .submit(Some(contributor), common::submission(problem.id, GOOD_CONTENT))
        .await
        .unwrap();
    h.generator.set_mode(common::GeneratorMode::Fail);

    let response = h
        .app()
        .oneshot(json_request(
            "POST",
            &format!("/api/synthesise/{}", problem.id),
            Some(&token),
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["error"], "Failed to synthesise contributions");
}

// =============================================================================
// Problems
// =============================================================================

#[tokio::test]
async fn test_create_problem_validation() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let token = h.token(owner).await;

    let response = h
        .app()
        .oneshot(json_request(
            "POST",
            "/api/problems",
            None,
            json!({ "title": "Help", "situation": "context" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = h
        .app()
        .oneshot(json_request(
            "POST",
            "/api/problems",
            Some(&token),
            json!({ "situation": "context" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["error"], "Title is required");
}

#[tokio::test]
async fn test_unknown_problem_and_missing_synthesis_are_404() {
    let h = TestHarness::new().await;
    let owner = h.user().await;
    let problem = h.problem(owner, 5).await;

    let response = h
        .app()
        .oneshot(empty_request("GET", &format!("/api/problems/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h
        .app()
        .oneshot(empty_request("GET", &format!("/api/problems/{}/synthesis", problem.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["error"], "Synthesis not found");
}

#[tokio::test]
async fn test_event_stream_is_sse() {
    let h = TestHarness::new().await;

    let response = h.app().oneshot(empty_request("GET", "/api/events")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

// =============================================================================
// End to end
// =============================================================================

/// Owner posts a problem with threshold 2; two contributors answer; the
/// second answer triggers synthesis in the background.
#[tokio::test]
async fn test_problem_lifecycle_to_synthesis() {
    let h = TestHarness::with_options(HarnessOptions {
        default_threshold: 2,
        ..HarnessOptions::default()
    })
    .await;
    let owner = h.user().await;
    let owner_token = h.token(owner).await;

    let response = h
        .app()
        .oneshot(json_request(
            "POST",
            "/api/problems",
            Some(&owner_token),
            json!({
                "problem_type": "advice",
                "title": "Should I take the job offer?",
                "situation": "Higher pay but a longer commute.",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = extract_json(response.into_body()).await;
    assert_eq!(created["status"], "gathering");
    assert_eq!(created["contribution_threshold"], 2);
    let problem_id = created["id"].as_str().unwrap().to_string();

    for content in [
        "Take it if the commute is under an hour each way.",
        "Negotiate remote days before you accept anything.",
    ] {
        let user = h.user().await;
        let token = h.token(user).await;
        let response = h
            .app()
            .oneshot(json_request(
                "POST",
                "/api/contribute",
                Some(&token),
                json!({ "problem_id": problem_id, "content": content }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Synthesis runs on a detached task
    let mut synthesis = None;
    for _ in 0..100 {
        let response = h
            .app()
            .oneshot(empty_request("GET", &format!("/api/problems/{}/synthesis", problem_id)))
            .await
            .unwrap();
        if response.status() == StatusCode::OK {
            synthesis = Some(extract_json(response.into_body()).await);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let synthesis = synthesis.expect("synthesis stored");
    assert_eq!(synthesis["contribution_count"], 2);
    assert!(synthesis["summary"].as_str().unwrap().contains("2 contributors"));

    let response = h
        .app()
        .oneshot(empty_request("GET", &format!("/api/problems/{}", problem_id)))
        .await
        .unwrap();
    let problem = extract_json(response.into_body()).await;
    assert_eq!(problem["status"], "complete");
    assert_eq!(problem["contribution_count"], 2);
    assert!(problem.get("user_id").is_none());

    let profile = chorus_api::db::profiles::get_profile(&h.db, owner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.problems_submitted, 1);
}
