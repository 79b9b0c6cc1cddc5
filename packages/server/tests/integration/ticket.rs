use serde_json::json;

use crate::common::{QR_SECRET, TestApp, routes};

const EVENT: &str = "gala-2026";

fn general_admission(quantity: &str) -> Vec<(&'static str, String)> {
    vec![
        ("name", "General".to_string()),
        ("price", "25.5".to_string()),
        ("currency", "usd".to_string()),
        ("quantity", quantity.to_string()),
        ("color", "#ff0000".to_string()),
    ]
}

fn as_fields<'a>(fields: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

async fn ticket_with_quantity(app: &TestApp, token: &str, quantity: &str) -> String {
    let fields = general_admission(quantity);
    app.create_ticket(token, EVENT, &as_fields(&fields)).await
}

mod management {
    use super::*;

    #[tokio::test]
    async fn create_and_list() {
        let app = TestApp::spawn().await;
        let org = app.token("org");
        let id = ticket_with_quantity(&app, &org, "3").await;

        let res = app.get_without_token(&routes::tickets(EVENT)).await;
        assert_eq!(res.status, 200);
        let tickets = res.data().as_array().unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0]["id"], id.as_str());
        assert_eq!(tickets[0]["currency"], "USD");
        assert_eq!(tickets[0]["available"], 3);
        assert_eq!(tickets[0]["total"], 3);
        assert_eq!(tickets[0]["sold"], 0);

        let event = app.events.wait_for("ticket-created").await;
        assert_eq!(event.payload["entity_id"], EVENT);
        assert_eq!(event.payload["item_id"], id.as_str());
    }

    #[tokio::test]
    async fn invalid_forms_are_rejected() {
        let app = TestApp::spawn().await;
        let org = app.token("org");

        let res = app
            .post_form_with_token(
                &routes::tickets(EVENT),
                &[("name", "X"), ("price", "1"), ("currency", "USD")],
                &org,
            )
            .await;
        assert_eq!(res.status, 400, "missing quantity: {}", res.text);

        let res = app
            .post_form_with_token(
                &routes::tickets(EVENT),
                &[
                    ("name", "Seated"),
                    ("price", "10"),
                    ("currency", "EUR"),
                    ("quantity", "3"),
                    ("seatStart", "1"),
                    ("seatEnd", "5"),
                ],
                &org,
            )
            .await;
        assert_eq!(res.status, 400, "range/quantity mismatch: {}", res.text);

        let res = app
            .post_form_with_token(
                "/api/v1/ticket/event/bad%20id",
                &[("name", "X"), ("price", "1"), ("currency", "USD"), ("quantity", "1")],
                &org,
            )
            .await;
        assert_eq!(res.status, 400, "bad event id: {}", res.text);
    }

    #[tokio::test]
    async fn only_the_creator_can_edit() {
        let app = TestApp::spawn().await;
        let org = app.token("org");
        let id = ticket_with_quantity(&app, &org, "5").await;

        let res = app
            .patch_form_with_token(&routes::ticket(EVENT, &id), &[("name", "VIP")], &app.token("eve"))
            .await;
        assert_eq!(res.status, 403);

        let res = app
            .patch_form_with_token(
                &routes::ticket(EVENT, &id),
                &[("name", "VIP"), ("quantity", "8")],
                &org,
            )
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.data()["name"], "VIP");
        assert_eq!(res.data()["quantity"], 8);
        assert_eq!(res.data()["available"], 8);
        app.events.wait_for("ticket-edited").await;
    }

    #[tokio::test]
    async fn quantity_edit_keeps_sold_entries() {
        let app = TestApp::spawn().await;
        let org = app.token("org");
        let id = ticket_with_quantity(&app, &org, "5").await;
        let buyer = app.token("buyer");
        let res = app
            .post_with_token(&routes::buy(EVENT, &id), &json!({"quantity": 3}), &buyer)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);

        let res = app
            .patch_form_with_token(&routes::ticket(EVENT, &id), &[("quantity", "2")], &org)
            .await;
        assert_eq!(res.status, 400, "{}", res.text);

        let res = app
            .patch_form_with_token(&routes::ticket(EVENT, &id), &[("quantity", "6")], &org)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.data()["sold"], 3);
        assert_eq!(res.data()["available"], 3);
    }

    #[tokio::test]
    async fn delete_is_refused_after_a_sale() {
        let app = TestApp::spawn().await;
        let org = app.token("org");
        let sold = ticket_with_quantity(&app, &org, "2").await;
        let unsold = ticket_with_quantity(&app, &org, "2").await;
        let res = app
            .post_with_token(&routes::buy(EVENT, &sold), &json!({"quantity": 1}), &app.token("b"))
            .await;
        assert_eq!(res.status, 200);

        let res = app.delete_with_token(&routes::ticket(EVENT, &sold), &org).await;
        assert_eq!(res.status, 409);

        let res = app.delete_with_token(&routes::ticket(EVENT, &unsold), &org).await;
        assert_eq!(res.status, 204);
        let list = app.get_without_token(&routes::tickets(EVENT)).await;
        assert_eq!(list.data().as_array().unwrap().len(), 1);
        app.events.wait_for("ticket-deleted").await;
    }
}

mod purchase {
    use super::*;

    #[tokio::test]
    async fn buy_issues_codes_and_updates_listing() {
        let app = TestApp::spawn().await;
        let id = ticket_with_quantity(&app, &app.token("org"), "4").await;
        // Warm the cache so the purchase has to invalidate it.
        let before = app.get_without_token(&routes::tickets(EVENT)).await;
        assert_eq!(before.data()[0]["available"], 4);

        let res = app
            .post_with_token(&routes::buy(EVENT, &id), &json!({"quantity": 2}), &app.token("buyer"))
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["success"], true);
        let tickets = res.body["tickets"].as_array().unwrap();
        assert_eq!(tickets.len(), 2);
        assert_ne!(tickets[0]["uniqueCode"], tickets[1]["uniqueCode"]);
        assert!(tickets[0]["qr"].is_string());
        assert!(tickets[0].get("seatId").is_none());

        let after = app.get_without_token(&routes::tickets(EVENT)).await;
        assert_eq!(after.data()[0]["available"], 2);
        assert_eq!(after.data()[0]["sold"], 2);
    }

    #[tokio::test]
    async fn quantity_bounds_are_enforced() {
        let app = TestApp::spawn().await;
        let id = ticket_with_quantity(&app, &app.token("org"), "50").await;
        let buyer = app.token("buyer");

        for quantity in [0, 11] {
            let res = app
                .post_with_token(&routes::buy(EVENT, &id), &json!({"quantity": quantity}), &buyer)
                .await;
            assert_eq!(res.status, 400, "quantity {quantity}: {}", res.text);
        }
    }

    #[tokio::test]
    async fn unknown_ticket_is_not_found() {
        let app = TestApp::spawn().await;
        let res = app
            .post_with_token(&routes::buy(EVENT, "nope"), &json!({"quantity": 1}), &app.token("b"))
            .await;
        assert_eq!(res.status, 404);
    }

    async fn race_twelve_buyers_for_five(app: &TestApp) {
        let id = ticket_with_quantity(&app, &app.token("org"), "5").await;

        let mut handles = Vec::new();
        for i in 0..12 {
            let client = app.client.clone();
            let url = app.url(&routes::buy(EVENT, &id));
            let token = app.token(&format!("buyer{i}"));
            handles.push(tokio::spawn(async move {
                client
                    .post(url)
                    .header("Authorization", format!("Bearer {token}"))
                    .json(&json!({"quantity": 1}))
                    .send()
                    .await
                    .unwrap()
                    .status()
                    .as_u16()
            }));
        }

        let mut ok = 0;
        let mut sold_out = 0;
        for handle in handles {
            match handle.await.unwrap() {
                200 => ok += 1,
                409 => sold_out += 1,
                other => panic!("unexpected status {other}"),
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(sold_out, 7);

        let res = app.get_without_token(&routes::tickets(EVENT)).await;
        assert_eq!(res.data()[0]["available"], 0);
        assert_eq!(res.data()[0]["sold"], 5);
    }

    #[tokio::test]
    async fn concurrent_buyers_never_oversell() {
        race_twelve_buyers_for_five(&TestApp::spawn().await).await;
    }

    #[tokio::test]
    async fn concurrent_buyers_never_oversell_across_pooled_connections() {
        race_twelve_buyers_for_five(&TestApp::spawn_with_pool(4).await).await;
    }

    #[tokio::test]
    async fn sold_out_reports_insufficient_inventory() {
        let app = TestApp::spawn().await;
        let id = ticket_with_quantity(&app, &app.token("org"), "1").await;
        let buyer = app.token("buyer");
        let res = app
            .post_with_token(&routes::buy(EVENT, &id), &json!({"quantity": 2}), &buyer)
            .await;
        assert_eq!(res.status, 409);
        assert_eq!(res.error_kind(), "insufficient_inventory");
    }
}

mod verification {
    use super::*;

    async fn bought(app: &TestApp) -> (String, String, String) {
        let id = ticket_with_quantity(app, &app.token("org"), "3").await;
        let res = app
            .post_with_token(&routes::buy(EVENT, &id), &json!({"quantity": 1}), &app.token("buyer"))
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        let t = &res.body["tickets"][0];
        (
            id,
            t["uniqueCode"].as_str().unwrap().to_string(),
            t["qr"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn code_and_payload_both_verify() {
        let app = TestApp::spawn().await;
        let (_, code, qr) = bought(&app).await;

        let res = app
            .get_query(&routes::verify(EVENT), &[("uniqueCode", code.as_str())])
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["isValid"], true);

        let res = app.get_query(&routes::verify(EVENT), &[("payload", qr.as_str())]).await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["isValid"], true);

        let res = app
            .get_query(&routes::verify("other-event"), &[("uniqueCode", code.as_str())])
            .await;
        assert_eq!(res.body["isValid"], false);

        let res = app
            .get_query(&routes::verify(EVENT), &[("uniqueCode", "made-up")])
            .await;
        assert_eq!(res.body["isValid"], false);
    }

    #[tokio::test]
    async fn forged_payload_is_rejected() {
        let app = TestApp::spawn().await;
        let (id, code, _) = bought(&app).await;
        let now = chrono::Utc::now().timestamp();

        let forged = plaza::reservation::qr::sign(b"not-the-key", EVENT, &id, &code, now).unwrap();
        let res = app
            .get_query(&routes::verify(EVENT), &[("payload", forged.as_str())])
            .await;
        assert_eq!(res.status, 400);
        assert_eq!(res.error_kind(), "signature_invalid");
    }

    #[tokio::test]
    async fn stale_payload_is_expired() {
        let app = TestApp::spawn().await;
        let (id, code, _) = bought(&app).await;
        let old = chrono::Utc::now().timestamp() - 3600;

        let stale = plaza::reservation::qr::sign(QR_SECRET.as_bytes(), EVENT, &id, &code, old).unwrap();
        let res = app
            .get_query(&routes::verify(EVENT), &[("payload", stale.as_str())])
            .await;
        assert_eq!(res.status, 410);
        assert_eq!(res.error_kind(), "expired_payload");
    }

    #[tokio::test]
    async fn missing_input_is_invalid() {
        let app = TestApp::spawn().await;
        let res = app.get_query(&routes::verify(EVENT), &[]).await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn fresh_qr_is_buyer_only() {
        let app = TestApp::spawn().await;
        let (id, code, _) = bought(&app).await;

        let res = app
            .get_with_token(&routes::qr(EVENT, &id, &code), &app.token("someone-else"))
            .await;
        assert_eq!(res.status, 403);

        let res = app
            .get_with_token(&routes::qr(EVENT, &id, &code), &app.token("buyer"))
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        let payload = res.data()["payload"].as_str().unwrap().to_string();

        let res = app
            .get_query(&routes::verify(EVENT), &[("payload", payload.as_str())])
            .await;
        assert_eq!(res.body["isValid"], true);
    }
}
