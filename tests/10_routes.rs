use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

// Router-level tests that exercise routing and the auth middleware without a
// live database: every protected route must reject unauthenticated calls
// before any query runs.

async fn body_json(response: axum::response::Response) -> Result<serde_json::Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn root_describes_the_api() -> Result<()> {
    let app = rampart::app();
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["success"], serde_json::json!(true));
    assert!(body["data"]["endpoints"].is_object());
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() -> Result<()> {
    for (method, uri) in [
        ("GET", "/api/users/profile"),
        ("GET", "/api/users/dashboard"),
        ("GET", "/api/campaigns"),
        ("GET", "/api/courses"),
        ("GET", "/api/employee/dashboard"),
        ("GET", "/api/phishing/templates"),
        ("PATCH", "/api/campaigns/6b1f7d86-12f7-4f52-a7a4-000000000000/cancel"),
    ] {
        let app = rampart::app();
        let response = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty())?)
            .await?;
        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "{} {} should require auth",
            method,
            uri
        );
        let body = body_json(response).await?;
        assert_eq!(body["success"], serde_json::json!(false));
        assert_eq!(body["code"], serde_json::json!("UNAUTHORIZED"));
    }
    Ok(())
}

#[tokio::test]
async fn malformed_tokens_are_rejected() -> Result<()> {
    let app = rampart::app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/users/profile")
                .header("authorization", "Bearer not-a-jwt")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn non_bearer_auth_headers_are_rejected() -> Result<()> {
    let app = rampart::app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/users/profile")
                .header("authorization", "Basic dXNlcjpwYXNz")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn employee_tokens_cannot_reach_organization_endpoints() -> Result<()> {
    // Role checks run before any database access
    let tokens = rampart::auth::issue_token_pair(
        uuid::Uuid::new_v4(),
        "employee@example.com",
        rampart::models::Role::Employee,
    )?;

    let app = rampart::app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/users/dashboard")
                .header("authorization", format!("Bearer {}", tokens.access))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn refresh_tokens_are_not_accepted_as_access_tokens() -> Result<()> {
    let tokens = rampart::auth::issue_token_pair(
        uuid::Uuid::new_v4(),
        "org@example.com",
        rampart::models::Role::Organization,
    )?;

    let app = rampart::app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/users/dashboard")
                .header("authorization", format!("Bearer {}", tokens.refresh))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn unknown_routes_are_404() -> Result<()> {
    let app = rampart::app();
    let response = app
        .oneshot(Request::builder().uri("/api/nope").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
