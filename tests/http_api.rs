use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use referral_ledger::repositories::MemoryLedgerStore;
use referral_ledger::services::{http, spawn_services};
use referral_ledger::settings::Settings;

const ADMIN: &str = "100";

async fn start_app() -> SocketAddr {
    let settings = Settings::from_toml(
        r#"
            admins = [100]

            [postgres]
            url = "postgres://unused"

            [ledger]
            referral_percent = "2.5"

            [bot]
            username = "ledger_bot"
        "#,
    )
    .unwrap();

    let channels = spawn_services(Arc::new(MemoryLedgerStore::new()), &settings).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::serve(listener, channels.ledger, settings.admins.clone()));

    addr
}

#[tokio::test]
async fn health_check() {
    let addr = start_app().await;
    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn referral_flow_over_http() {
    let addr = start_app().await;
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let alice: Value = client
        .post(format!("{}/users", base))
        .json(&json!({"id": 1, "username": "alice"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alice["referred_by"], Value::Null);

    let bob: Value = client
        .post(format!("{}/users", base))
        .json(&json!({"id": 2, "first_name": "Bob", "referral_arg": "1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bob["referred_by"], json!(1));

    let unauthorized = client
        .post(format!("{}/admin/deposits", base))
        .json(&json!({"user_id": 2, "amount": "200.00"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), StatusCode::FORBIDDEN);

    let deposit = client
        .post(format!("{}/admin/deposits", base))
        .header(http::ACTOR_HEADER, ADMIN)
        .json(&json!({"user_id": 2, "amount": "200.00"}))
        .send()
        .await
        .unwrap();
    assert_eq!(deposit.status(), StatusCode::CREATED);
    let outcome: Value = deposit.json().await.unwrap();
    assert_eq!(outcome["deposit"]["amount"], "200.00");
    assert_eq!(outcome["deposit"]["currency"], "USDT");
    assert_eq!(outcome["earning"]["amount"], "5.00");
    assert_eq!(outcome["earning"]["referrer_id"], 1);

    let income: Value = client
        .get(format!("{}/users/1/income", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(income["total_earned"], "5.00");
    assert_eq!(income["earned_today"], "5.00");
    assert_eq!(income["withdrawable"], "5.00");

    let earnings: Value = client
        .get(format!("{}/users/1/earnings", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(earnings["earned"], "5.00");

    let before_any: Value = client
        .get(format!("{}/users/1/earnings?end=2020-01-01T00:00:00Z", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before_any["earned"], "0.00");

    let since_then: Value = client
        .get(format!("{}/users/1/earnings?start=2020-01-01T00:00:00Z", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(since_then["earned"], "5.00");

    let balance: Value = client
        .get(format!("{}/users/1/balance", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(balance["withdrawable"], "5.00");

    let referrals: Value = client
        .get(format!("{}/users/1/referrals", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(referrals[0]["id"], 2);
    assert_eq!(referrals[0]["display_name"], "Bob");

    let profile: Value = client
        .get(format!("{}/users/1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile["referral_count"], 1);
    assert_eq!(profile["referral_link"], "https://t.me/ledger_bot?start=1");

    let requested = client
        .post(format!("{}/users/1/withdrawals", base))
        .send()
        .await
        .unwrap();
    assert_eq!(requested.status(), StatusCode::CREATED);
    let receipt: Value = requested.json().await.unwrap();
    assert_eq!(receipt["withdrawal"]["amount"], "5.00");
    assert_eq!(receipt["withdrawal"]["status"], "pending");
    assert_eq!(receipt["requester"], "alice");
    let withdrawal_id = receipt["withdrawal"]["id"].as_str().unwrap().to_string();

    let paid = client
        .post(format!("{}/admin/withdrawals/{}/paid", base, withdrawal_id))
        .header(http::ACTOR_HEADER, ADMIN)
        .send()
        .await
        .unwrap();
    assert_eq!(paid.status(), StatusCode::OK);
    let paid: Value = paid.json().await.unwrap();
    assert_eq!(paid["status"], "paid");

    let again = client
        .post(format!("{}/admin/withdrawals/{}/rejected", base, withdrawal_id))
        .header(http::ACTOR_HEADER, ADMIN)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);
    let error: Value = again.json().await.unwrap();
    assert_eq!(error["error"], "invalid_transition");

    let income: Value = client
        .get(format!("{}/users/1/income", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(income["withdrawable"], "0.00");

    let withdrawals: Value = client
        .get(format!("{}/users/1/withdrawals", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(withdrawals.as_array().map(Vec::len), Some(1));

    let stats: Value = client
        .get(format!("{}/admin/stats", base))
        .header(http::ACTOR_HEADER, ADMIN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_users"], 2);
    assert_eq!(stats["referred_users"], 1);
    assert_eq!(stats["total_deposits"], "200.00");
    assert_eq!(stats["total_earnings"], "5.00");
    assert_eq!(stats["total_paid_withdrawals"], "5.00");
    assert_eq!(stats["pending_withdrawals"], 0);
}

#[tokio::test]
async fn errors_carry_kind_and_status() {
    let addr = start_app().await;
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{}/users/999", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let nothing = client
        .post(format!("{}/users/5/withdrawals", base))
        .send()
        .await
        .unwrap();
    assert_eq!(nothing.status(), StatusCode::CONFLICT);
    let body: Value = nothing.json().await.unwrap();
    assert_eq!(body["error"], "nothing_to_withdraw");

    for bad in ["abc", "0", "-1.00", "1000000000000000000", "99999999999999999999999999999"] {
        let response = client
            .post(format!("{}/admin/deposits", base))
            .header(http::ACTOR_HEADER, ADMIN)
            .json(&json!({"user_id": 2, "amount": bad}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "amount {}", bad);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "invalid_amount");
    }

    let not_admin = client
        .get(format!("{}/admin/stats", base))
        .header(http::ACTOR_HEADER, "2")
        .send()
        .await
        .unwrap();
    assert_eq!(not_admin.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn resent_deposit_is_credited_once() {
    let addr = start_app().await;
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    client
        .post(format!("{}/users", base))
        .json(&json!({"id": 1, "username": "alice"}))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{}/users", base))
        .json(&json!({"id": 2, "username": "bob", "referral_arg": "1"}))
        .send()
        .await
        .unwrap();

    let body = json!({
        "deposit_id": "6f1c2a52-4a8e-4a55-9d7e-0c6b1f7f2b11",
        "user_id": 2,
        "amount": "200.00",
    });
    let mut statuses = Vec::new();
    for _ in 0..2 {
        let response = client
            .post(format!("{}/admin/deposits", base))
            .header(http::ACTOR_HEADER, ADMIN)
            .json(&body)
            .send()
            .await
            .unwrap();
        statuses.push(response.status());
        let outcome: Value = response.json().await.unwrap();
        assert_eq!(outcome["deposit"]["id"], body["deposit_id"]);
        assert_eq!(outcome["earning"]["amount"], "5.00");
    }
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::OK]);

    let stats: Value = client
        .get(format!("{}/admin/stats", base))
        .header(http::ACTOR_HEADER, ADMIN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_deposits"], "200.00");
    assert_eq!(stats["total_earnings"], "5.00");

    let altered = client
        .post(format!("{}/admin/deposits", base))
        .header(http::ACTOR_HEADER, ADMIN)
        .json(&json!({
            "deposit_id": body["deposit_id"],
            "user_id": 2,
            "amount": "300.00",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(altered.status(), StatusCode::CONFLICT);
    let error: Value = altered.json().await.unwrap();
    assert_eq!(error["error"], "conflict");
    assert_eq!(error.get("retry"), None);
}
