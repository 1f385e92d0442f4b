//! HTTP-level tests for the management API, run against the in-memory store.
//!
//! Every route is exercised with a valid admin token, with an unknown token,
//! and with no token at all.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use creds::issuer::bootstrap_admin;
use creds::models::{NewUser, Token, User};
use creds::store::{MemoryStore, Store};
use creds::{api, AppState};

const ADMIN_SCOPE: &str = "admin";

struct Setup {
    app: Router,
    store: Arc<MemoryStore>,
    admin_id: Uuid,
    admin_token: Uuid,
}

async fn setup() -> Setup {
    let store = Arc::new(MemoryStore::new());
    let admin = NewUser {
        name: "Admin".into(),
        username: "Admin".into(),
    };
    let (admin_id, admin_token) = bootstrap_admin(store.as_ref(), &admin, ADMIN_SCOPE)
        .await
        .unwrap();

    let state = Arc::new(AppState::new(store.clone(), ADMIN_SCOPE));
    Setup {
        app: api::router(state, Duration::from_secs(5)),
        store,
        admin_id,
        admin_token,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

async fn run_bad_token_tests(app: &Router, method: &str, uri: &str, body: Option<Value>) {
    let (status, _) = send(app, method, uri, Some(Uuid::new_v4()), body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "unknown token on {} {}", method, uri);

    let (status, body) = send(app, method, uri, None, body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "no token on {} {}", method, uri);
    assert_eq!(body["error"]["code"], "unauthorized");
}

fn as_uuid(v: &Value) -> Uuid {
    Uuid::parse_str(v.as_str().expect("expected a JSON string id")).unwrap()
}

#[tokio::test]
async fn test_index_and_health_need_no_token() {
    let s = setup().await;

    let (status, body) = send(&s.app, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("hello!".into()));

    let (status, _) = send(&s.app, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_get_users() {
    let s = setup().await;

    let (status, body) = send(&s.app, "GET", "/users", Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let users: Vec<User> = serde_json::from_value(body).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, s.admin_id);
    assert_eq!(users[0].tokens[0].id, s.admin_token);

    run_bad_token_tests(&s.app, "GET", "/users", None).await;
}

#[tokio::test]
async fn test_get_tokens() {
    let s = setup().await;

    let (status, body) = send(&s.app, "GET", "/tokens", Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let tokens: Vec<Token> = serde_json::from_value(body).unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].id, s.admin_token);
    assert_eq!(tokens[0].scope, ADMIN_SCOPE);

    run_bad_token_tests(&s.app, "GET", "/tokens", None).await;
}

#[tokio::test]
async fn test_get_user() {
    let s = setup().await;
    let existing = format!("/users/{}", s.admin_id);

    let (status, body) = send(&s.app, "GET", &existing, Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let user: User = serde_json::from_value(body).unwrap();
    assert_eq!(user.username, "Admin");

    let missing = format!("/users/{}", Uuid::new_v4());
    let (status, _) = send(&s.app, "GET", &missing, Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&s.app, "GET", "/users/not-a-uuid", Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    run_bad_token_tests(&s.app, "GET", &existing, None).await;
}

#[tokio::test]
async fn test_get_token() {
    let s = setup().await;
    let uri = format!("/tokens/{}", s.admin_token);

    let (status, body) = send(&s.app, "GET", &uri, Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], s.admin_id.to_string());

    let missing = format!("/tokens/{}", Uuid::new_v4());
    let (status, _) = send(&s.app, "GET", &missing, Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_add_user() {
    let s = setup().await;
    let params = json!({"username": "DJ Testo", "name": "Test Testersson"});

    let (status, body) = send(&s.app, "POST", "/users", Some(s.admin_token), Some(params.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let id = as_uuid(&body);

    let user = s.store.get_user(id).await.unwrap().unwrap();
    assert_eq!(user.name, "Test Testersson");
    assert!(user.tokens.is_empty());

    run_bad_token_tests(&s.app, "POST", "/users", Some(params)).await;
}

#[tokio::test]
async fn test_add_user_validation_and_duplicates() {
    let s = setup().await;

    let (status, body) = send(&s.app, "POST", "/users", Some(s.admin_token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "'username' missing, 'name' missing");

    let (status, body) = send(&s.app, "POST", "/users", Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "malformed_request");

    let (status, body) = send(
        &s.app,
        "POST",
        "/users",
        Some(s.admin_token),
        Some(json!({"name": "Impostor", "username": "Admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "duplicate_username");
}

#[tokio::test]
async fn test_add_token() {
    let s = setup().await;
    let params = json!({"userId": s.admin_id, "scope": "testing-scope"});

    let (status, body) = send(&s.app, "POST", "/tokens", Some(s.admin_token), Some(params.clone())).await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    let id = as_uuid(&body);
    assert!(s.store.token_has_scope(id, "testing-scope").await);

    let before = s.store.list_tokens().await.unwrap();
    let no_such_user = json!({"userId": Uuid::new_v4(), "scope": ADMIN_SCOPE});
    let (status, body) = send(&s.app, "POST", "/tokens", Some(s.admin_token), Some(no_such_user)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "no_such_user");
    assert_eq!(s.store.list_tokens().await.unwrap(), before);

    let (status, body) = send(&s.app, "POST", "/tokens", Some(s.admin_token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "'userId' missing, 'scope' missing");

    run_bad_token_tests(&s.app, "POST", "/tokens", Some(params)).await;
}

#[tokio::test]
async fn test_issued_token_only_grants_its_scope() {
    let s = setup().await;
    let (_, body) = send(
        &s.app,
        "POST",
        "/tokens",
        Some(s.admin_token),
        Some(json!({"userId": s.admin_id, "scope": "read"})),
    )
    .await;
    let reader = as_uuid(&body);

    let (status, _) = send(&s.app, "GET", "/users", Some(reader), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &s.app,
        "POST",
        "/tokens",
        Some(reader),
        Some(json!({"userId": s.admin_id, "scope": ADMIN_SCOPE})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_admin_token_is_rejected() {
    let s = setup().await;
    let (_, body) = send(
        &s.app,
        "POST",
        "/tokens",
        Some(s.admin_token),
        Some(json!({"userId": s.admin_id, "scope": ADMIN_SCOPE, "validUntil": "2000-01-01T00:00:00Z"})),
    )
    .await;
    let expired = as_uuid(&body);

    let (status, _) = send(&s.app, "GET", "/users", Some(expired), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_delete_user_cascades_to_tokens() {
    let s = setup().await;
    let (_, body) = send(
        &s.app,
        "POST",
        "/users",
        Some(s.admin_token),
        Some(json!({"name": "Ada", "username": "ada99"})),
    )
    .await;
    let user = as_uuid(&body);
    let (_, body) = send(
        &s.app,
        "POST",
        "/tokens",
        Some(s.admin_token),
        Some(json!({"userId": user, "scope": "read"})),
    )
    .await;
    let token = as_uuid(&body);

    let uri = format!("/users/{}", user);
    run_bad_token_tests(&s.app, "DELETE", &uri, None).await;

    let (status, _) = send(&s.app, "DELETE", &uri, Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&s.app, "GET", &uri, Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&s.app, "GET", &format!("/tokens/{}", token), Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_token() {
    let s = setup().await;
    let (_, body) = send(
        &s.app,
        "POST",
        "/tokens",
        Some(s.admin_token),
        Some(json!({"userId": s.admin_id, "scope": ADMIN_SCOPE})),
    )
    .await;
    let second_admin = as_uuid(&body);

    let uri = format!("/tokens/{}", second_admin);
    let (status, _) = send(&s.app, "DELETE", &uri, Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);

    // Revoked: the deleted admin token no longer opens anything.
    let (status, _) = send(&s.app, "GET", "/users", Some(second_admin), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Deleting again is not an error.
    let (status, _) = send(&s.app, "DELETE", &uri, Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_responses_carry_security_headers() {
    let s = setup().await;
    let req = Request::builder().uri("/users").body(Body::empty()).unwrap();
    let resp = s.app.clone().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers()["cache-control"], "no-store");
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert!(resp.headers().contains_key("x-request-id"));
}

/// Admin token A (scope "admin"), required scope "admin": create Ada, give her
/// a "read" token, read her back, then fail to issue for a random user id.
#[tokio::test]
async fn test_example_scenario() {
    let s = setup().await;

    let (status, body) = send(
        &s.app,
        "POST",
        "/users",
        Some(s.admin_token),
        Some(json!({"name": "Ada", "username": "ada99"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let u = as_uuid(&body);

    let (status, body) = send(
        &s.app,
        "POST",
        "/tokens",
        Some(s.admin_token),
        Some(json!({"userId": u, "scope": "read"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let t = as_uuid(&body);

    let (status, body) = send(&s.app, "GET", &format!("/users/{}", u), Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "id": u,
            "name": "Ada",
            "username": "ada99",
            "tokens": [{"id": t, "scope": "read", "userId": u}],
        })
    );

    let (status, _) = send(
        &s.app,
        "POST",
        "/tokens",
        Some(s.admin_token),
        Some(json!({"userId": Uuid::new_v4(), "scope": "read"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_add_user() {
    let s = setup().await;

    let distinct = futures::future::join_all((0..8).map(|i| {
        let app = s.app.clone();
        let token = s.admin_token;
        async move {
            send(
                &app,
                "POST",
                "/users",
                Some(token),
                Some(json!({"name": "Parallel", "username": format!("parallel-{}", i)})),
            )
            .await
        }
    }))
    .await;

    let mut ids: Vec<Uuid> = distinct
        .iter()
        .map(|(status, body)| {
            assert_eq!(*status, StatusCode::OK);
            as_uuid(body)
        })
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    let same = json!({"name": "Twin", "username": "twin"});
    let (a, b) = tokio::join!(
        send(&s.app, "POST", "/users", Some(s.admin_token), Some(same.clone())),
        send(&s.app, "POST", "/users", Some(s.admin_token), Some(same)),
    );
    let mut statuses = vec![a.0.as_u16(), b.0.as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 400]);

    let twins = s
        .store
        .list_users()
        .await
        .unwrap()
        .into_iter()
        .filter(|u| u.username == "twin")
        .count();
    assert_eq!(twins, 1);
}

#[tokio::test]
async fn test_revocation_racing_mutations_is_consistent() {
    let s = setup().await;

    let revoke_uri = format!("/tokens/{}", s.admin_token);
    let creates = (0..16).map(|i| {
        let app = s.app.clone();
        let token = s.admin_token;
        async move {
            send(
                &app,
                "POST",
                "/users",
                Some(token),
                Some(json!({"name": "Racer", "username": format!("racer-{}", i)})),
            )
            .await
        }
    });
    let (results, (revoke_status, _)) = tokio::join!(
        futures::future::join_all(creates),
        send(&s.app, "DELETE", &revoke_uri, Some(s.admin_token), None),
    );
    assert_eq!(revoke_status, StatusCode::OK);

    // Every request either wrote or was denied; nothing in between.
    let created = results.iter().filter(|(status, _)| *status == StatusCode::OK).count();
    assert!(results
        .iter()
        .all(|(status, _)| *status == StatusCode::OK || *status == StatusCode::UNAUTHORIZED));

    let racers = s
        .store
        .list_users()
        .await
        .unwrap()
        .into_iter()
        .filter(|u| u.username.starts_with("racer-"))
        .count();
    assert_eq!(racers, created);

    let (status, _) = send(&s.app, "GET", "/users", Some(s.admin_token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
