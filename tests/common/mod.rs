#![allow(dead_code)]

use pulse::config::{
    AppConfig, AuthConfig, CorsConfig, DatabaseConfig, MetricsConfig, RateLimitConfig,
    ServerConfig,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub const ADMIN_CODE: &str = "integration-admin-code";
pub const PASSWORD: &str = "Secur3P@ssw0rd!";

pub struct TestApp {
    pub addr: SocketAddr,
    pub pool: deadpool_sqlite::Pool,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Register an account and return the response body (includes `token`).
    pub async fn register(&self, name: &str, email: &str, admin: bool) -> Value {
        let mut body = json!({ "name": name, "email": email, "password": PASSWORD });
        if admin {
            body["adminCode"] = json!(ADMIN_CODE);
        }
        let resp = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201, "registration of {email} should succeed");
        resp.json().await.unwrap()
    }

    pub async fn token_for(&self, name: &str, email: &str, admin: bool) -> String {
        self.register(name, email, admin).await["token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    /// Create an API key as `admin_token`, returning the plaintext `keyId.secret`.
    pub async fn create_key(&self, admin_token: &str, scopes: &[&str]) -> (String, Value) {
        let resp = self
            .client
            .post(self.url("/api/apikeys"))
            .bearer_auth(admin_token)
            .json(&json!({ "name": "test-key", "scopes": scopes }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        (body["key"].as_str().unwrap().to_string(), body)
    }
}

pub fn test_config(db_path: std::path::PathBuf) -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        database: DatabaseConfig {
            path: db_path,
            pool_size: 4,
        },
        auth: AuthConfig {
            jwt_secret: "integration-test-secret-0123456789abcdef".to_string(),
            token_ttl_days: 30,
            admin_registration_code: Some(ADMIN_CODE.to_string()),
            key_cache_ttl_secs: 300,
        },
        rate_limit: RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        },
        metrics: MetricsConfig::default(),
        cors: CorsConfig::default(),
    }
}

/// Spawn the server on a random port backed by a fresh temp database.
pub async fn spawn_app() -> TestApp {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let db_path = tmp.path().to_path_buf();
    // Keep tmp alive by leaking it (test only)
    std::mem::forget(tmp);

    let config = test_config(db_path);
    let pool = pulse::storage::sqlite::create_pool(&config.database).unwrap();
    pulse::storage::sqlite::init_pool(&pool).await.unwrap();

    let app = pulse::routes::build_router(&config, pool.clone()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestApp {
        addr,
        pool,
        client: reqwest::Client::new(),
    }
}
