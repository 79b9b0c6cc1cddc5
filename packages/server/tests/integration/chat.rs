use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::multipart::Form;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use plaza::hub::Registration;

use crate::common::{TestApp, file_part, png_bytes, routes};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Every file below `dir`; empty when it does not exist.
fn walkdir(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .flat_map(|e| {
            let path = e.path();
            if path.is_dir() { walkdir(&path) } else { vec![path] }
        })
        .collect()
}

async fn connect(app: &TestApp, room: &str, token: &str) -> Socket {
    let url = format!("{}?token={token}", app.ws_url(&routes::ws(room)));
    let (socket, _) = connect_async(url).await.expect("WebSocket handshake failed");
    socket
}

/// Next text frame as JSON, skipping control frames.
async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Socket closed")
            .expect("Socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("Frame is not JSON");
        }
    }
}

async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::text(frame.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Wait until the presence set lists every user in `users`.
async fn wait_online(app: &TestApp, room: &str, token: &str, users: &[&str]) {
    for _ in 0..100 {
        let res = app.get_with_token(&routes::chat_presence(room), token).await;
        let online: Vec<String> =
            serde_json::from_value(res.data()["online"].clone()).unwrap_or_default();
        if users.iter().all(|u| online.iter().any(|o| o == u)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("users {users:?} never came online in {room}");
}

mod direct_chats {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let bob = app.token("bob");

        let first = app
            .post_with_token(routes::DIRECT_CHAT, &json!({"user_id": "bob"}), &alice)
            .await;
        assert_eq!(first.status, 201, "{}", first.text);
        assert_eq!(first.data()["created"], true);
        assert_eq!(first.data()["chat"]["counterpart"], "bob");

        let second = app
            .post_with_token(routes::DIRECT_CHAT, &json!({"user_id": "alice"}), &bob)
            .await;
        assert_eq!(second.status, 200, "{}", second.text);
        assert_eq!(second.data()["created"], false);
        assert_eq!(second.data()["chat"]["id"], first.data()["chat"]["id"]);

        let list = app.get_with_token(routes::CHATS, &alice).await;
        assert_eq!(list.status, 200);
        assert_eq!(list.data().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_with_self_is_rejected() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let res = app
            .post_with_token(routes::DIRECT_CHAT, &json!({"user_id": "alice"}), &alice)
            .await;
        assert_eq!(res.status, 400);
        assert_eq!(res.error_kind(), "invalid_input");
    }

    #[tokio::test]
    async fn outsiders_cannot_read_history() {
        let app = TestApp::spawn().await;
        let room = app.direct_chat(&app.token("alice"), "bob").await;

        let res = app
            .get_with_token(&routes::chat_history(&room), &app.token("mallory"))
            .await;
        assert_eq!(res.status, 403);
        assert_eq!(res.error_kind(), "forbidden");
    }

    #[tokio::test]
    async fn requests_without_token_are_unauthorized() {
        let app = TestApp::spawn().await;
        let res = app.get_without_token(routes::CHATS).await;
        assert_eq!(res.status, 401);
        assert_eq!(res.error_kind(), "unauthorized");
    }
}

mod websocket {
    use super::*;

    #[tokio::test]
    async fn messages_fan_out_to_the_room() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let bob = app.token("bob");
        let room = app.direct_chat(&alice, "bob").await;

        let mut a = connect(&app, &room, &alice).await;
        let mut b = connect(&app, &room, &bob).await;
        wait_online(&app, &room, &alice, &["alice", "bob"]).await;

        send(&mut b, json!({"action": "chat", "content": "hi alice"})).await;

        let got_a = next_frame(&mut a).await;
        let got_b = next_frame(&mut b).await;
        assert_eq!(got_a["action"], "chat");
        assert_eq!(got_a["content"], "hi alice");
        assert_eq!(got_a["sender_id"], "bob");
        assert_eq!(got_a["room"], room.as_str());
        assert_eq!(got_a["id"], got_b["id"]);

        let history = app.get_with_token(&routes::chat_history(&room), &alice).await;
        assert_eq!(history.status, 200);
        assert_eq!(history.data()["pagination"]["total"], 1);
        assert_eq!(history.data()["messages"][0]["action"], "history");

        let list = app.get_with_token(routes::CHATS, &alice).await;
        let summary = &list.data()[0];
        assert_eq!(summary["last_text"], "hi alice");
        assert_eq!(summary["last_sender"], "bob");
        assert_eq!(summary["read"], false);
    }

    #[tokio::test]
    async fn edit_is_broadcast_and_foreign_delete_is_refused() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let bob = app.token("bob");
        let room = app.direct_chat(&alice, "bob").await;

        let mut a = connect(&app, &room, &alice).await;
        let mut b = connect(&app, &room, &bob).await;
        wait_online(&app, &room, &alice, &["alice", "bob"]).await;

        send(&mut b, json!({"action": "chat", "content": "typo"})).await;
        let original = next_frame(&mut a).await;
        let _ = next_frame(&mut b).await;
        let id = original["id"].as_str().unwrap().to_string();

        send(&mut b, json!({"action": "edit", "id": id, "content": "fixed"})).await;
        let edited = next_frame(&mut a).await;
        assert_eq!(edited["action"], "edit");
        assert_eq!(edited["id"], id.as_str());
        assert_eq!(edited["content"], "fixed");
        assert!(edited["edited_at"].is_string());
        let _ = next_frame(&mut b).await;

        send(&mut a, json!({"action": "delete", "id": id})).await;
        let err = next_frame(&mut a).await;
        assert_eq!(err["action"], "error");
        assert_eq!(err["error"], "forbidden");

        send(&mut b, json!({"action": "delete", "id": id})).await;
        let deleted = next_frame(&mut a).await;
        assert_eq!(deleted["action"], "delete");
        assert_eq!(deleted["id"], id.as_str());

        for topic in ["chat-created", "chat-edited", "chat-deleted"] {
            let event = app.events.wait_for(topic).await;
            assert_eq!(event.payload["entity_id"], room.as_str());
            assert_eq!(event.payload["item_id"], id.as_str());
        }
        let deletes = app.events.topics().iter().filter(|t| *t == "chat-deleted").count();
        assert_eq!(deletes, 1, "refused delete must not emit");
    }

    #[tokio::test]
    async fn new_session_replays_history_oldest_first() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let bob = app.token("bob");
        let room = app.direct_chat(&alice, "bob").await;

        let mut b = connect(&app, &room, &bob).await;
        wait_online(&app, &room, &bob, &["bob"]).await;
        for text in ["one", "two", "three"] {
            send(&mut b, json!({"action": "chat", "content": text})).await;
            let _ = next_frame(&mut b).await;
        }

        let mut a = connect(&app, &room, &alice).await;
        let mut replayed = Vec::new();
        for _ in 0..3 {
            let frame = next_frame(&mut a).await;
            assert_eq!(frame["action"], "history");
            replayed.push(frame["content"].as_str().unwrap().to_string());
        }
        assert_eq!(replayed, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn history_is_delivered_before_live_messages() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let bob = app.token("bob");
        let room = app.direct_chat(&alice, "bob").await;

        let mut b = connect(&app, &room, &bob).await;
        wait_online(&app, &room, &bob, &["bob"]).await;
        send(&mut b, json!({"action": "chat", "content": "old"})).await;
        let _ = next_frame(&mut b).await;

        // Live traffic racing the join must queue behind the replay.
        let mut a = connect(&app, &room, &alice).await;
        send(&mut b, json!({"action": "chat", "content": "new"})).await;
        let _ = next_frame(&mut b).await;

        let first = next_frame(&mut a).await;
        assert_eq!(first["action"], "history");
        assert_eq!(first["content"], "old");
        let second = next_frame(&mut a).await;
        assert_eq!(second["content"], "new");
    }

    #[tokio::test]
    async fn stalled_session_is_evicted_without_blocking_the_room() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let bob = app.token("bob");
        let room = app.direct_chat(&alice, "bob").await;

        let mut a = connect(&app, &room, &alice).await;
        let mut b = connect(&app, &room, &bob).await;
        wait_online(&app, &room, &alice, &["alice", "bob"]).await;

        // A session whose buffer nobody drains.
        let (tx, _stalled_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        app.hub
            .register(Registration {
                room: room.clone(),
                session_id: Uuid::now_v7(),
                user_id: "carol".into(),
                tx,
                cancel: cancel.clone(),
            })
            .unwrap();

        for i in 0..5 {
            send(&mut a, json!({"action": "chat", "content": format!("m{i}")})).await;
        }
        for socket in [&mut a, &mut b] {
            for i in 0..5 {
                assert_eq!(next_frame(socket).await["content"], format!("m{i}"));
            }
        }

        tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
            .await
            .expect("stalled session was not evicted");

        send(&mut b, json!({"action": "chat", "content": "after"})).await;
        assert_eq!(next_frame(&mut a).await["content"], "after");
    }

    #[tokio::test]
    async fn malformed_frame_gets_an_error_and_session_survives() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let room = app.direct_chat(&alice, "bob").await;

        let mut a = connect(&app, &room, &alice).await;
        wait_online(&app, &room, &alice, &["alice"]).await;
        a.send(Message::text("not json")).await.unwrap();
        let err = next_frame(&mut a).await;
        assert_eq!(err["action"], "error");
        assert_eq!(err["error"], "invalid_input");

        send(&mut a, json!({"action": "chat", "content": "still here"})).await;
        assert_eq!(next_frame(&mut a).await["content"], "still here");
    }

    #[tokio::test]
    async fn disallowed_origin_is_refused() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let room = app.direct_chat(&alice, "bob").await;

        let url = format!("{}?token={alice}", app.ws_url(&routes::ws(&room)));
        let mut request = url.clone().into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Origin", "http://evil.test".parse().unwrap());
        assert!(connect_async(request).await.is_err());

        let mut request = url.into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Origin", "http://allowed.test".parse().unwrap());
        assert!(connect_async(request).await.is_ok());
    }

    #[tokio::test]
    async fn outsiders_cannot_join() {
        let app = TestApp::spawn().await;
        let room = app.direct_chat(&app.token("alice"), "bob").await;
        let url = format!(
            "{}?token={}",
            app.ws_url(&routes::ws(&room)),
            app.token("mallory")
        );
        assert!(connect_async(url).await.is_err());
    }

    #[tokio::test]
    async fn hub_stop_closes_sessions() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let room = app.direct_chat(&alice, "bob").await;
        let mut a = connect(&app, &room, &alice).await;
        wait_online(&app, &room, &alice, &["alice"]).await;

        app.hub.stop();
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match a.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "session was not closed after hub stop");
    }
}

mod uploads {
    use super::*;

    #[tokio::test]
    async fn attachment_is_stored_and_broadcast() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let room = app.direct_chat(&alice, "bob").await;
        let mut b = connect(&app, &room, &app.token("bob")).await;
        wait_online(&app, &room, &alice, &["bob"]).await;

        let form = Form::new()
            .text("chat", room.clone())
            .text("content", "look")
            .part("file[]", file_part("cat.png", png_bytes(8, 8, 1), "image/png"));
        let res = app
            .multipart_with_token(routes::CHAT_UPLOAD, form, &alice)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);

        let files = res.data()["files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["filename"], "cat.png");
        let path = files[0]["path"].as_str().unwrap();
        assert!(path.starts_with("uploads/chat/photo/"), "{path}");
        assert!(path.ends_with(".png"));
        assert!(app.exists(path));

        let frame = next_frame(&mut b).await;
        assert_eq!(frame["content"], "look");
        assert_eq!(frame["files"][0]["path"], path);

        let served = app.client.get(app.url(&format!("/static/{path}"))).send().await.unwrap();
        assert_eq!(served.status().as_u16(), 200);

        let created = app.events.wait_for("chat-created").await;
        assert_eq!(created.payload["entity_id"], room.as_str());
        assert_eq!(created.payload["item_id"], frame["id"]);
    }

    #[tokio::test]
    async fn rejected_later_file_stores_nothing() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let room = app.direct_chat(&alice, "bob").await;

        let eicar = br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*".to_vec();
        let form = Form::new()
            .text("chat", room.clone())
            .part("file[]", file_part("ok.png", png_bytes(8, 8, 4), "image/png"))
            .part("file[]", file_part("notes.txt", eicar, "text/plain"));
        let res = app
            .multipart_with_token(routes::CHAT_UPLOAD, form, &alice)
            .await;
        assert_eq!(res.status, 422, "{}", res.text);

        let stored = walkdir(&app.static_root.join("uploads/chat"));
        assert!(stored.is_empty(), "orphaned attachments: {stored:?}");
        let history = app.get_with_token(&routes::chat_history(&room), &alice).await;
        assert_eq!(history.data()["pagination"]["total"], 0);
        assert!(!app.events.topics().iter().any(|t| t == "chat-created"));
    }

    #[tokio::test]
    async fn eicar_attachment_is_rejected() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let room = app.direct_chat(&alice, "bob").await;

        let eicar = br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*".to_vec();
        let form = Form::new()
            .text("chat", room.clone())
            .part("file[]", file_part("notes.txt", eicar, "text/plain"));
        let res = app
            .multipart_with_token(routes::CHAT_UPLOAD, form, &alice)
            .await;
        assert_eq!(res.status, 422, "{}", res.text);
        assert_eq!(res.error_kind(), "virus_signature_matched");

        let history = app.get_with_token(&routes::chat_history(&room), &alice).await;
        assert_eq!(history.data()["pagination"]["total"], 0);
    }

    #[tokio::test]
    async fn oversized_attachment_is_rejected() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let room = app.direct_chat(&alice, "bob").await;

        let form = Form::new()
            .text("chat", room)
            .part("file", file_part("big.png", vec![0u8; 300 * 1024], "image/png"));
        let res = app
            .multipart_with_token(routes::CHAT_UPLOAD, form, &alice)
            .await;
        assert_eq!(res.status, 413, "{}", res.text);
        assert_eq!(res.error_kind(), "file_too_large");
    }

    #[tokio::test]
    async fn upload_without_files_is_invalid() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let room = app.direct_chat(&alice, "bob").await;

        let form = Form::new().text("chat", room).text("content", "no file");
        let res = app
            .multipart_with_token(routes::CHAT_UPLOAD, form, &alice)
            .await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn mark_read_clears_unread_flag() {
        let app = TestApp::spawn().await;
        let alice = app.token("alice");
        let room = app.direct_chat(&alice, "bob").await;
        let form = Form::new()
            .text("chat", room.clone())
            .part("file", file_part("a.png", png_bytes(4, 4, 2), "image/png"));
        let res = app
            .multipart_with_token(routes::CHAT_UPLOAD, form, &alice)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);

        let bob = app.token("bob");
        let list = app.get_with_token(routes::CHATS, &bob).await;
        assert_eq!(list.data()[0]["read"], false);

        let res = app.post_with_token(&routes::chat_read(&room), &json!({}), &bob).await;
        assert_eq!(res.status, 204);
        let list = app.get_with_token(routes::CHATS, &bob).await;
        assert_eq!(list.data()[0]["read"], true);
    }
}
