mod common;

use common::{spawn_app, TestApp, PASSWORD};
use pulse::auth::api_key::hash_token;
use pulse::auth::password::hash_password;
use serde_json::{json, Value};

#[tokio::test]
async fn test_root_and_health_are_public() {
    let app = spawn_app().await;

    let resp = app.client.get(app.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "API is running...");

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_ok"], true);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = spawn_app().await;
    let resp = app.client.get(app.url("/api/nope")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

// ── Auth ──

#[tokio::test]
async fn test_register_returns_token_and_lowercases_email() {
    let app = spawn_app().await;
    let body = app.register("Ada", "Ada@Example.com", false).await;

    assert_eq!(body["name"], "Ada");
    assert_eq!(body["email"], "ada@example.com");
    assert_eq!(body["role"], "user");
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(body.get("password").is_none());
}

#[tokio::test]
async fn test_register_duplicate_email_rejected() {
    let app = spawn_app().await;
    app.register("Ada", "ada@example.com", false).await;

    let resp = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({ "name": "Other", "email": "ADA@example.com", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "User already exists");
}

#[tokio::test]
async fn test_register_validation_messages() {
    let app = spawn_app().await;

    let resp = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({ "name": "Ada", "email": "ada@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Please add all fields");

    let resp = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({ "name": "Ada", "email": "not-an-email", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Invalid email address");
}

#[tokio::test]
async fn test_admin_code_grants_admin_and_wrong_code_rejected() {
    let app = spawn_app().await;

    let body = app.register("Root", "root@example.com", true).await;
    assert_eq!(body["role"], "admin");

    let resp = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "name": "Mallory",
            "email": "mallory@example.com",
            "password": PASSWORD,
            "adminCode": "guess"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = spawn_app().await;
    app.register("Ada", "ada@example.com", false).await;

    let wrong_password = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": "ada@example.com", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    let unknown_email = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": "ghost@example.com", "password": PASSWORD }))
        .send()
        .await
        .unwrap();

    assert_eq!(wrong_password.status(), 400);
    assert_eq!(unknown_email.status(), 400);
    let a: Value = wrong_password.json().await.unwrap();
    let b: Value = unknown_email.json().await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a["message"], "Invalid credentials");
}

#[tokio::test]
async fn test_login_then_me() {
    let app = spawn_app().await;
    app.register("Ada", "ada@example.com", false).await;

    let resp = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": "ADA@example.com", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let login: Value = resp.json().await.unwrap();
    let token = login["token"].as_str().unwrap();

    let resp = app.get("/api/auth/me", token).await;
    assert_eq!(resp.status(), 200);
    let me: Value = resp.json().await.unwrap();
    assert_eq!(me["email"], "ada@example.com");
    assert_eq!(me["id"], login["id"]);
    assert!(me.get("passwordHash").is_none());
}

#[tokio::test]
async fn test_me_requires_valid_token() {
    let app = spawn_app().await;

    let resp = app.client.get(app.url("/api/auth/me")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Not authorized, no token");

    let resp = app.get("/api/auth/me", "not.a.jwt").await;
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Not authorized, token failed");
}

// ── API keys ──

#[tokio::test]
async fn test_bogus_api_key_rejected() {
    let app = spawn_app().await;
    let resp = app
        .client
        .post(app.url("/api/usage"))
        .header("x-api-key", "bogus")
        .json(&json!({ "productId": "web", "eventType": "click" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Invalid API key" }));
}

#[tokio::test]
async fn test_api_key_lifecycle() {
    let app = spawn_app().await;
    let admin = app.token_for("Root", "root@example.com", true).await;
    let user = app.register("Ada", "ada@example.com", false).await;
    let user_id = user["id"].as_str().unwrap();

    let (key, created) = app.create_key(&admin, &["ingest"]).await;
    let (key_id, secret) = key.split_once('.').unwrap();
    assert!(!key_id.is_empty() && !secret.is_empty());
    assert_eq!(created["name"], "test-key");
    assert_eq!(created["scopes"], json!(["ingest"]));

    // Key attributes the event to the userId in the body
    let resp = app
        .client
        .post(app.url("/api/usage"))
        .header("x-api-key", &key)
        .json(&json!({ "userId": user_id, "productId": "web", "eventType": "click" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let event: Value = resp.json().await.unwrap();
    assert_eq!(event["userId"], user_id);
    assert_eq!(event["value"], 1.0);

    // Listing never exposes the secret or its hash
    let resp = app.get("/api/apikeys", &admin).await;
    assert_eq!(resp.status(), 200);
    let keys: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["keyId"], key_id);
    assert_eq!(keys[0]["disabled"], false);
    assert!(keys[0].get("hash").is_none());
    assert!(!keys[0].to_string().contains(secret));

    let id = created["id"].as_str().unwrap();
    let resp = app
        .client
        .patch(app.url(&format!("/api/apikeys/{id}/disable")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Key disabled");

    // Disabled keys stop working immediately
    let resp = app
        .client
        .post(app.url("/api/usage"))
        .header("x-ingest-api-key", &key)
        .json(&json!({ "userId": user_id, "productId": "web", "eventType": "click" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = app
        .client
        .patch(app.url("/api/apikeys/does-not-exist/disable"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_key_management_requires_admin() {
    let app = spawn_app().await;
    let user = app.token_for("Ada", "ada@example.com", false).await;

    let resp = app.get("/api/apikeys", &user).await;
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Not authorized as an admin");
}

#[tokio::test]
async fn test_unknown_scope_rejected() {
    let app = spawn_app().await;
    let admin = app.token_for("Root", "root@example.com", true).await;

    let resp = app
        .client
        .post(app.url("/api/apikeys"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "bad", "scopes": ["root"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "invalid scope: root");
}

/// Store a key row the way older deployments did, bypassing the API.
async fn insert_stored_key(app: &TestApp, key_id: &str, stored_hash: String, disabled: bool) {
    let conn = app.pool.get().await.unwrap();
    let key_id = key_id.to_string();
    conn.interact(move |conn| {
        conn.execute(
            "INSERT INTO api_keys (id, name, key_id, hash, scopes, owner, disabled, created_at)
             VALUES (?1, 'legacy', ?2, ?3, '[\"read:metrics\"]', NULL, ?4, 0)",
            rusqlite::params![format!("row-{key_id}"), key_id, stored_hash, disabled],
        )
    })
    .await
    .unwrap()
    .unwrap();
}

async fn dau_with_key(app: &TestApp, key: &str) -> reqwest::StatusCode {
    app.client
        .get(app.url("/api/metrics/dau"))
        .header("x-api-key", key)
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_bare_key_matches_sha256_hash() {
    let app = spawn_app().await;
    insert_stored_key(&app, "sha1", hash_token("rawsha"), false).await;

    assert_eq!(dau_with_key(&app, "rawsha").await, 200);
    assert_eq!(dau_with_key(&app, "rawsha-typo").await, 401);
}

#[tokio::test]
async fn test_bare_key_matches_legacy_argon2_hash() {
    let app = spawn_app().await;
    insert_stored_key(&app, "legacy1", hash_password("rawlegacy").unwrap(), false).await;

    assert_eq!(dau_with_key(&app, "rawlegacy").await, 200);
    assert_eq!(dau_with_key(&app, "rawlegacy-typo").await, 401);
}

#[tokio::test]
async fn test_disabled_legacy_key_rejected_in_every_form() {
    let app = spawn_app().await;
    insert_stored_key(&app, "dis1", hash_password("rawdis").unwrap(), true).await;

    assert_eq!(dau_with_key(&app, "rawdis").await, 401);
    assert_eq!(dau_with_key(&app, "dis1.rawdis").await, 401);
}

#[tokio::test]
async fn test_blank_api_key_header_falls_back_to_bearer() {
    let app = spawn_app().await;
    let token = app.token_for("Ada", "ada@example.com", false).await;

    let resp = app
        .client
        .get(app.url("/api/metrics/dau"))
        .header("x-api-key", "")
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

// ── Ingest ──

#[tokio::test]
async fn test_ingest_as_user_updates_stats() {
    let app = spawn_app().await;
    let user = app.register("Ada", "ada@example.com", false).await;
    let token = user["token"].as_str().unwrap();

    for value in [2.0, 3.0] {
        let resp = app
            .client
            .post(app.url("/api/usage"))
            .bearer_auth(token)
            .json(&json!({
                "userId": "someone-else",
                "productId": "web",
                "eventType": "export",
                "value": value,
                "metadata": { "format": "csv" }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let event: Value = resp.json().await.unwrap();
        assert_eq!(event["userId"], user["id"]);
        assert_eq!(event["metadata"]["format"], "csv");
    }

    let resp = app.get("/api/user/dashboard", token).await;
    assert_eq!(resp.status(), 200);
    let dash: Value = resp.json().await.unwrap();
    assert_eq!(dash["stats"]["apiCalls"], 2);
    assert!(dash["subscription"].is_null());

    let resp = app.get("/api/usage/user", token).await;
    assert_eq!(resp.status(), 200);
    let usage: Value = resp.json().await.unwrap();
    assert_eq!(usage["usageByProduct"][0]["productId"], "web");
    assert_eq!(usage["usageByProduct"][0]["totalValue"], 5.0);
    assert_eq!(usage["usageByProduct"][0]["count"], 2);
}

#[tokio::test]
async fn test_ingest_validation() {
    let app = spawn_app().await;
    let admin = app.token_for("Root", "root@example.com", true).await;
    let (key, _) = app.create_key(&admin, &["ingest"]).await;

    let resp = app
        .client
        .post(app.url("/api/usage"))
        .header("x-api-key", &key)
        .json(&json!({ "productId": "web" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "productId and eventType are required");

    let resp = app
        .client
        .post(app.url("/api/usage"))
        .header("x-api-key", &key)
        .json(&json!({ "userId": "ghost", "productId": "web", "eventType": "click" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Unknown userId");

    // Anonymous events are accepted with a key
    let resp = app
        .client
        .post(app.url("/api/usage"))
        .header("x-api-key", &key)
        .json(&json!({ "productId": "web", "eventType": "pageview" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = app
        .client
        .post(app.url("/api/usage"))
        .json(&json!({ "productId": "web", "eventType": "pageview" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_global_usage_and_debug_stats() {
    let app = spawn_app().await;
    let admin = app.token_for("Root", "root@example.com", true).await;
    let user = app.token_for("Ada", "ada@example.com", false).await;

    for product in ["web", "web", "mobile"] {
        let resp = app
            .client
            .post(app.url("/api/usage"))
            .bearer_auth(&user)
            .json(&json!({ "productId": product, "eventType": "click" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let resp = app.get("/api/usage/admin/global", &user).await;
    assert_eq!(resp.status(), 403);

    let resp = app.get("/api/usage/admin/global", &admin).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["totals"]["eventsCount"], 3);
    assert_eq!(body["uniqueUsers"], 1);
    assert_eq!(body["topProducts"][0]["productId"], "web");

    let resp = app.get("/api/debug/stats", &user).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "users": 2, "events": 3, "apikeys": 0 }));
}

// ── Account ──

#[tokio::test]
async fn test_profile_update() {
    let app = spawn_app().await;
    app.register("Bob", "bob@example.com", false).await;
    let token = app.token_for("Ada", "ada@example.com", false).await;

    let resp = app
        .client
        .patch(app.url("/api/user/profile"))
        .bearer_auth(&token)
        .json(&json!({ "email": "bob@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Email already in use");

    let resp = app
        .client
        .patch(app.url("/api/user/profile"))
        .bearer_auth(&token)
        .json(&json!({ "name": "Ada Lovelace", "email": "", "password": "n3w-Passw0rd" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "Ada Lovelace");
    assert_eq!(body["email"], "ada@example.com");

    let resp = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": "ada@example.com", "password": "n3w-Passw0rd" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_concurrent_email_change_yields_one_winner() {
    let app = spawn_app().await;
    let ada = app.token_for("Ada", "ada@example.com", false).await;
    let bob = app.token_for("Bob", "bob@example.com", false).await;

    let change = |token: String| {
        let req = app
            .client
            .patch(app.url("/api/user/profile"))
            .bearer_auth(token)
            .json(&json!({ "email": "shared@example.com" }));
        async move { req.send().await.unwrap() }
    };
    let (a, b) = tokio::join!(change(ada), change(bob));

    let mut statuses = vec![a.status().as_u16(), b.status().as_u16()];
    statuses.sort_unstable();
    assert_eq!(statuses, vec![200, 400]);

    let loser = if a.status() == 400 { a } else { b };
    let body: Value = loser.json().await.unwrap();
    assert_eq!(body["message"], "Email already in use");
}

// ── Admin ──

#[tokio::test]
async fn test_admin_routes_forbidden_for_users() {
    let app = spawn_app().await;
    let user = app.token_for("Ada", "ada@example.com", false).await;

    for path in ["/api/admin/users", "/api/admin/stats/global"] {
        let resp = app.get(path, &user).await;
        assert_eq!(resp.status(), 403, "{path} should require admin");
    }
}

#[tokio::test]
async fn test_admin_manages_users() {
    let app = spawn_app().await;
    let admin = app.token_for("Root", "root@example.com", true).await;
    let user = app.register("Ada", "ada@example.com", false).await;
    let user_id = user["id"].as_str().unwrap();
    let user_token = user["token"].as_str().unwrap();

    let resp = app
        .client
        .post(app.url("/api/usage"))
        .bearer_auth(user_token)
        .json(&json!({ "productId": "web", "eventType": "click" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = app.get("/api/admin/users", &admin).await;
    let users: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(users.len(), 2);

    let resp = app
        .client
        .patch(app.url(&format!("/api/admin/users/{user_id}/plan")))
        .bearer_auth(&admin)
        .json(&json!({ "plan": "pro" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["plan"], "pro");

    let resp = app.get("/api/user/subscription", user_token).await;
    let sub: Value = resp.json().await.unwrap();
    assert_eq!(sub["plan"], "pro");

    let resp = app
        .client
        .patch(app.url(&format!("/api/admin/users/{user_id}/role")))
        .bearer_auth(&admin)
        .json(&json!({ "role": "superuser" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = app.get("/api/admin/stats/global", &admin).await;
    assert_eq!(resp.status(), 200);
    let stats: Value = resp.json().await.unwrap();
    assert_eq!(stats["totalUsers"], 2);
    let growth = stats["growth"].as_array().unwrap();
    assert_eq!(growth.len(), 6);
    assert_eq!(growth[5]["users"], 2);

    let resp = app
        .client
        .delete(app.url(&format!("/api/admin/users/{user_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "User removed");

    let resp = app.get(&format!("/api/admin/users/{user_id}"), &admin).await;
    assert_eq!(resp.status(), 404);

    // Their events survive, detached
    let resp = app.get("/api/debug/stats", &admin).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["users"], 1);
    assert_eq!(body["events"], 1);

    // Their token no longer authenticates
    let resp = app.get("/api/auth/me", user_token).await;
    assert_eq!(resp.status(), 401);
}
