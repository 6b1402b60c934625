use deadpool_sqlite::Pool;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::auth::api_key::{generate_key, hash_token};
use crate::auth::password::spawn_hash_password;
use crate::error::{pooled, AppResult};
use crate::types::{now_millis, Plan, Role};

const PRODUCTS: &[&str] = &[
    "featureA", "featureB", "featureC", "featureD", "featureE", "featureF",
];
const EVENT_TYPES: &[&str] = &["open", "click", "purchase", "signup", "upgrade"];
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Password shared by every demo account.
pub const DEMO_PASSWORD: &str = "password";

#[derive(Debug, Clone, Copy)]
pub struct SeedOptions {
    pub users: usize,
    pub days: i64,
}

#[derive(Debug)]
pub struct SeedSummary {
    pub users: usize,
    pub events: usize,
    /// Plaintext `keyId.secret` of the seeded key, shown once.
    pub api_key: String,
}

/// Roughly 30% pro, 40% starter, the rest free, by signup order.
fn plan_for(index: usize, total: usize) -> Plan {
    let share = (index + 1) as f64 / total.max(1) as f64;
    if share <= 0.3 {
        Plan::Pro
    } else if share <= 0.7 {
        Plan::Starter
    } else {
        Plan::Free
    }
}

/// Daily chance of activity: paid plans engage more, older accounts less.
fn activity_probability(plan: Plan, days_since_signup: i64, jitter: f64) -> f64 {
    let base = match plan {
        Plan::Pro => 0.7,
        Plan::Starter => 0.45,
        Plan::Free => 0.25,
    };
    let age = days_since_signup.max(1) as f64;
    (base - (age + 1.0).log10() * 0.08 + jitter * 0.1).max(0.05)
}

struct DemoUser {
    id: String,
    plan: Plan,
    created_at: i64,
}

/// Replace users, events and keys with generated demo data.
pub async fn seed_demo(pool: &Pool, opts: SeedOptions) -> AppResult<SeedSummary> {
    let password_hash = spawn_hash_password(DEMO_PASSWORD.to_string()).await?;
    let (key_id, secret) = generate_key();
    let key_hash = hash_token(&secret);
    let row_key_id = key_id.clone();

    let conn = pooled(pool).await?;
    let (users, events) = conn
        .interact(move |conn| {
            let mut rng = rand::thread_rng();
            let now = now_millis();
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

            tx.execute("DELETE FROM usage_events", [])?;
            tx.execute("DELETE FROM api_keys", [])?;
            tx.execute("DELETE FROM subscriptions", [])?;
            tx.execute("DELETE FROM user_stats", [])?;
            tx.execute("DELETE FROM users", [])?;

            let mut demo_users = Vec::with_capacity(opts.users);
            {
                let mut insert_user = tx.prepare(
                    "INSERT INTO users (id, name, email, password_hash, role, plan, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for i in 0..opts.users {
                    let user = DemoUser {
                        id: uuid::Uuid::new_v4().to_string(),
                        plan: plan_for(i, opts.users),
                        created_at: now - rng.gen_range(5..=120) * DAY_MS,
                    };
                    let role = if i == 0 { Role::Admin } else { Role::User };
                    insert_user.execute(rusqlite::params![
                        user.id,
                        format!("Demo User {}", i + 1),
                        format!("demo{}@example.com", i + 1),
                        password_hash,
                        role.as_str(),
                        user.plan.as_str(),
                        user.created_at,
                    ])?;
                    demo_users.push(user);
                }
            }

            let mut events = 0usize;
            {
                let mut insert_event = tx.prepare(
                    "INSERT INTO usage_events (id, user_id, product_id, event_type, value, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
                )?;
                for day in 0..opts.days {
                    let day_start = now - day * DAY_MS;
                    for user in &demo_users {
                        let age_days = (day_start - user.created_at) / DAY_MS;
                        if age_days < 0 {
                            continue;
                        }
                        let jitter = rng.gen::<f64>() - 0.4;
                        if rng.gen::<f64>() >= activity_probability(user.plan, age_days, jitter) {
                            continue;
                        }
                        let ceiling = rng.gen_range(1..=5);
                        let burst = rng.gen_range(1..=ceiling);
                        for _ in 0..burst {
                            let product = PRODUCTS.choose(&mut rng).copied().unwrap_or("featureA");
                            let event_type =
                                EVENT_TYPES.choose(&mut rng).copied().unwrap_or("open");
                            let created_at = (day_start + rng.gen_range(0..DAY_MS)).min(now);
                            insert_event.execute(rusqlite::params![
                                uuid::Uuid::new_v4().to_string(),
                                user.id,
                                product,
                                event_type,
                                rng.gen_range(1..=5) as f64,
                                created_at,
                            ])?;
                            events += 1;
                        }
                    }
                }
            }

            tx.execute(
                "INSERT INTO api_keys (id, name, key_id, hash, scopes, owner, disabled, created_at)
                 VALUES (?1, 'seeded-demo-key', ?2, ?3, ?4, NULL, 0, ?5)",
                rusqlite::params![
                    uuid::Uuid::new_v4().to_string(),
                    row_key_id,
                    key_hash,
                    r#"["ingest","read:metrics"]"#,
                    now
                ],
            )?;

            tx.commit()?;
            Ok::<_, rusqlite::Error>((demo_users.len(), events))
        })
        .await??;

    tracing::info!(users, events, "demo data seeded");

    Ok(SeedSummary {
        users,
        events,
        api_key: format!("{key_id}.{secret}"),
    })
}
