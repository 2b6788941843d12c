//! HTTP surface driven through `actix_web::test`.
//!
//! Run: cargo test --test http_api_test

mod test_harness;

use actix_web::{http::StatusCode, test, web, App};
use chat_service::routes;
use serde_json::{json, Value};
use test_harness::Harness;
use uuid::Uuid;

fn bearer(h: &Harness, user: Uuid) -> (&'static str, String) {
    let token = h.state.jwt.issue(user, 3600).expect("token");
    ("Authorization", format!("Bearer {token}"))
}

macro_rules! app {
    ($h:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($h.state.clone()))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health_and_metrics_are_public() {
    let h = Harness::new();
    let app = app!(h);

    let res = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let h = Harness::new();
    let app = app!(h);

    let res = test::call_service(
        &app,
        test::TestRequest::get().uri("/conversations").to_request(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/conversations")
            .insert_header(("Authorization", "Bearer not-a-jwt"))
            .to_request(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["code"], "TOKEN_INVALID");
}

#[actix_web::test]
async fn test_direct_send_history_and_edit_flow() {
    let h = Harness::new();
    let (a, b) = (h.user().await, h.user().await);
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/conversations/direct")
        .insert_header(bearer(&h, a))
        .set_json(json!({ "user_id": b }))
        .to_request();
    let conversation: Value = test::call_and_read_body_json(&app, req).await;
    let conversation_id = conversation["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/messages/send")
        .insert_header(bearer(&h, a))
        .set_json(json!({
            "conversation_id": conversation_id,
            "message_type": "text",
            "content": { "kind": "text", "text": "hello over http" }
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let message: Value = test::read_body_json(res).await;
    let message_id = message["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/messages/{conversation_id}?limit=10"))
        .insert_header(bearer(&h, b))
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 1);
    assert_eq!(page["messages"][0]["id"], message_id.as_str());

    let req = test::TestRequest::put()
        .uri(&format!("/messages/{message_id}"))
        .insert_header(bearer(&h, b))
        .set_json(json!({ "text": "hijack" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/messages/search?q=HTTP")
        .insert_header(bearer(&h, b))
        .to_request();
    let hits: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(hits["messages"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn test_error_bodies_carry_status_and_code() {
    let h = Harness::new();
    let a = h.user().await;
    let app = app!(h);

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{}", Uuid::new_v4()))
        .insert_header(bearer(&h, a))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["status"], 404);
    assert_eq!(body["code"], "CONVERSATION_NOT_FOUND");

    let req = test::TestRequest::delete()
        .uri(&format!("/messages/{}?scope=everyone", Uuid::new_v4()))
        .insert_header(bearer(&h, a))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["code"], "MESSAGE_NOT_FOUND");
}

#[actix_web::test]
async fn test_group_admin_routes() {
    let h = Harness::new();
    let (admin, member, newcomer) = (h.user().await, h.user().await, h.user().await);
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/conversations")
        .insert_header(bearer(&h, admin))
        .set_json(json!({
            "kind": "group",
            "name": "ops",
            "participant_ids": [member]
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let group: Value = test::read_body_json(res).await;
    let group_id = group["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{group_id}/add"))
        .insert_header(bearer(&h, member))
        .set_json(json!({ "user_id": newcomer }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{group_id}/join-requests/{newcomer}/approve"))
        .insert_header(bearer(&h, admin))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let req = test::TestRequest::patch()
        .uri(&format!("/conversations/{group_id}/members/{admin}/role"))
        .insert_header(bearer(&h, admin))
        .set_json(json!({ "role": "member" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let req = test::TestRequest::patch()
        .uri(&format!("/conversations/{group_id}/members/{member}/role"))
        .insert_header(bearer(&h, admin))
        .set_json(json!({ "role": "owner" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/conversations")
        .insert_header(bearer(&h, newcomer))
        .to_request();
    let list: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list["total"], 1);
}

#[actix_web::test]
async fn test_history_cursor_follows_next_before_id() {
    let h = Harness::new();
    let (a, b) = (h.user().await, h.user().await);
    let direct = h.state.conversations.get_or_create_direct(a, b).await.unwrap();
    for i in 0..3 {
        h.send_text(a, direct.id, &format!("same instant {i}")).await.unwrap();
    }
    let app = app!(h);

    let req = test::TestRequest::get()
        .uri(&format!("/messages/{}?limit=2", direct.id))
        .insert_header(bearer(&h, b))
        .to_request();
    let first: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(first["messages"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::get()
        .uri(&format!(
            "/messages/{}?limit=2&before={}&before_id={}",
            direct.id,
            first["next_before"].as_str().unwrap(),
            first["next_before_id"].as_str().unwrap(),
        ))
        .insert_header(bearer(&h, b))
        .to_request();
    let second: Value = test::call_and_read_body_json(&app, req).await;
    let rest = second["messages"].as_array().unwrap();
    assert_eq!(rest.len(), 1);
    let earlier: Vec<&Value> = first["messages"].as_array().unwrap().iter().map(|m| &m["id"]).collect();
    assert!(!earlier.contains(&&rest[0]["id"]));
}
