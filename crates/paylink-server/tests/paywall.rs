mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use actix_web::{test, App};
use paylink_server::db::{now_ms, ResourcePayload};
use paylink_server::ledger::{SettlementFilter, SettlementStatus};
use paylink_server::routes;

use common::*;

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state.clone()).configure(routes::configure)).await
    };
}

#[actix_rt::test]
async fn download_challenges_then_delivers_after_payment() {
    let (state, fake) = state();
    let resource = seed_resource(&state, "Rep0rt01", file_payload(), None, None);
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/paywall/download?fileId=Rep0rt01")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["x402Version"], 1);
    assert_eq!(body["accepts"][0]["maxAmountRequired"], "500000");
    assert_eq!(body["accepts"][0]["price"], "$0.50");
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);

    let before = now_ms();
    let req = test::TestRequest::get()
        .uri("/paywall/download?fileId=Rep0rt01")
        .insert_header(("X-PAYMENT", proof("500000")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-payment-response"));
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["fileName"], "report.pdf");
    assert_eq!(body["fileSize"], 2048);
    assert_eq!(body["mimeType"], "application/pdf");
    let url = body["downloadUrl"].as_str().unwrap();
    assert!(url.starts_with("https://files.example.com/report.pdf?token="));

    let expires = chrono::DateTime::parse_from_rfc3339(body["expiresAt"].as_str().unwrap())
        .unwrap()
        .timestamp_millis();
    let ttl = expires - before;
    assert!((900_000..=905_000).contains(&ttl), "ttl was {ttl}");

    let settlements = state
        .ledger
        .list(&SettlementFilter::Resource(resource.id), 10)
        .unwrap();
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].status, SettlementStatus::Completed);
    assert_eq!(settlements[0].amount, "$0.50");
    assert_eq!(settlements[0].payer, format!("{PAYER:#x}"));

    let stored = state.db.get_resource("Rep0rt01").unwrap().unwrap();
    assert_eq!(stored.download_count, 1);
}

#[actix_rt::test]
async fn underpayment_is_challenged_without_settling() {
    let (state, fake) = state();
    seed_resource(&state, "Rep0rt01", file_payload(), None, None);
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/paywall/download?fileId=Rep0rt01")
        .insert_header(("X-PAYMENT", proof("100000")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "insufficient_amount");
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    assert!(state.ledger.list(&SettlementFilter::All, 10).unwrap().is_empty());
}

#[actix_rt::test]
async fn facilitator_rejection_is_not_a_sale() {
    let fake = Arc::new(FakeFacilitator {
        reject: true,
        ..Default::default()
    });
    let state = state_with(fake.clone());
    seed_resource(&state, "Rep0rt01", file_payload(), None, None);
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/paywall/download?fileId=Rep0rt01")
        .insert_header(("X-PAYMENT", proof("500000")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        state.db.get_resource("Rep0rt01").unwrap().unwrap().download_count,
        0
    );
}

#[actix_rt::test]
async fn missing_and_unknown_ids() {
    let (state, fake) = state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/paywall/download").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "File ID is required");

    let req = test::TestRequest::post()
        .uri("/paywall/content")
        .set_json(serde_json::json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Content ID is required");

    let req = test::TestRequest::get()
        .uri("/paywall/content?contentId=Nope0000")
        .insert_header(("X-PAYMENT", proof("100000")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Content not found");

    // Nobody is charged for an id that does not exist.
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn expired_resource_is_denied_before_payment() {
    let (state, fake) = state();
    seed_resource(&state, "Old00001", file_payload(), Some(an_hour_ago()), None);
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/paywall/download?fileId=Old00001")
        .insert_header(("X-PAYMENT", proof("500000")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Content not found");
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn download_quota_admits_exactly_max_downloads() {
    let (state, _fake) = state();
    seed_resource(&state, "Quota002", file_payload(), None, Some(2));
    let app = app!(state);

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let req = test::TestRequest::get()
            .uri("/paywall/download?fileId=Quota002")
            .insert_header(("X-PAYMENT", proof("500000")))
            .to_request();
        statuses.push(test::call_service(&app, req).await.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 404]);
    assert_eq!(
        state.db.get_resource("Quota002").unwrap().unwrap().download_count,
        2
    );
    assert_eq!(state.ledger.list(&SettlementFilter::All, 10).unwrap().len(), 2);
}

#[actix_rt::test]
async fn concurrent_downloads_share_a_single_slot() {
    let (state, fake) = state();
    seed_resource(&state, "OneSlot1", file_payload(), None, Some(1));
    let app = app!(state);

    let call = || {
        let req = test::TestRequest::get()
            .uri("/paywall/download?fileId=OneSlot1")
            .insert_header(("X-PAYMENT", proof("500000")))
            .to_request();
        test::call_service(&app, req)
    };
    let (a, b, c) = tokio::join!(call(), call(), call());

    let ok = [a.status(), b.status(), c.status()]
        .iter()
        .filter(|s| s.as_u16() == 200)
        .count();
    assert_eq!(ok, 1);
    assert_eq!(
        state.db.get_resource("OneSlot1").unwrap().unwrap().download_count,
        1
    );

    // Every settled payment leaves a row; only the winner is completed.
    let settled = fake.calls.load(Ordering::SeqCst);
    let rows = state.ledger.list(&SettlementFilter::All, 10).unwrap();
    assert_eq!(rows.len(), settled);
    let completed = rows
        .iter()
        .filter(|s| s.status == SettlementStatus::Completed)
        .count();
    assert_eq!(completed, 1);
    for lost in rows.iter().filter(|s| s.status == SettlementStatus::Failed) {
        assert_eq!(lost.failure_reason.as_deref(), Some("quota_exceeded"));
    }
    assert_eq!(
        state.ledger.stats(&SettlementFilter::All).unwrap().total_transactions,
        1
    );
}

#[actix_rt::test]
async fn replayed_transaction_spends_no_quota() {
    let fake = Arc::new(FakeFacilitator {
        fixed_transaction: Some(
            "0x00000000000000000000000000000000000000000000000000000000000000aa",
        ),
        ..Default::default()
    });
    let state = state_with(fake.clone());
    seed_resource(&state, "Replay01", file_payload(), None, Some(2));
    let app = app!(state);

    let header = proof("500000");
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let req = test::TestRequest::get()
            .uri("/paywall/download?fileId=Replay01")
            .insert_header(("X-PAYMENT", header.clone()))
            .to_request();
        statuses.push(test::call_service(&app, req).await.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 409, 409]);
    assert_eq!(
        state.db.get_resource("Replay01").unwrap().unwrap().download_count,
        1
    );
    assert_eq!(state.ledger.list(&SettlementFilter::All, 10).unwrap().len(), 1);
}

#[actix_rt::test]
async fn document_content_and_single_use_grant() {
    let (state, _fake) = state();
    seed_resource(
        &state,
        "Doc00001",
        ResourcePayload::Document {
            document_content: "The full text.".to_string(),
        },
        None,
        None,
    );
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/paywall/content")
        .insert_header(("X-PAYMENT", proof("100000")))
        .set_json(serde_json::json!({ "contentId": "Doc00001" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["content"]["id"], "Doc00001");
    assert_eq!(body["content"]["type"], "document");
    assert_eq!(body["content"]["data"], "The full text.");
    assert_eq!(body["content"]["creator"], OWNER);
    let token = body["accessToken"].as_str().unwrap().to_string();

    let stored = state.db.get_resource("Doc00001").unwrap().unwrap();
    assert_eq!(stored.view_count, 1);

    let redeem = |token: String| {
        test::TestRequest::post()
            .uri("/paywall/grants/redeem")
            .set_json(serde_json::json!({ "token": token }))
            .to_request()
    };
    let resp = test::call_service(&app, redeem(token.clone())).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["resource"], "Doc00001");
    assert_eq!(body["scope"], "read");

    let resp = test::call_service(&app, redeem(token.clone())).await;
    assert_eq!(resp.status(), 410);

    let mut forged = token;
    forged.push('0');
    let resp = test::call_service(&app, redeem(forged)).await;
    assert_eq!(resp.status(), 401);
}

#[actix_rt::test]
async fn read_scope_on_a_file_returns_only_the_preview() {
    let (state, _fake) = state();
    seed_resource(&state, "Rep0rt01", file_payload(), None, None);
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/paywall/content?contentId=Rep0rt01")
        .insert_header(("X-PAYMENT", proof("100000")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["content"]["type"], "file");
    assert_eq!(body["content"]["data"], "Revenue grew.");
    assert!(!body.to_string().contains("files.example.com"));
}

#[actix_rt::test]
async fn download_of_a_link_is_not_found() {
    let (state, fake) = state();
    seed_resource(
        &state,
        "Link0001",
        ResourcePayload::Link {
            link: "https://example.com/article".to_string(),
        },
        None,
        None,
    );
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/paywall/download?fileId=Link0001")
        .insert_header(("X-PAYMENT", proof("500000")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
}
