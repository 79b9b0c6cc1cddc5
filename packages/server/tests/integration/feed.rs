use reqwest::multipart::Form;
use sea_orm::{EntityTrait, PaginatorTrait, TransactionTrait};
use serde_json::json;

use plaza::entity::{file_record, file_record_ref};
use plaza::feed::dedup;

use crate::common::{TestApp, file_part, png_bytes, routes};

/// Enough of an MP4 header to sniff as `video/mp4`.
fn mp4_bytes(seed: u8) -> Vec<u8> {
    let mut bytes = vec![0, 0, 0, 0x18];
    bytes.extend_from_slice(b"ftypisom");
    bytes.extend_from_slice(&[0, 0, 2, 0]);
    bytes.extend_from_slice(&[seed; 64]);
    bytes
}

fn video_form(bytes: Vec<u8>) -> Form {
    Form::new()
        .text("type", "video")
        .text("text", "clip")
        .part("video", file_part("clip.mp4", bytes, "video/mp4"))
}

mod creation {
    use super::*;

    #[tokio::test]
    async fn image_post_gets_variants_and_thumbnail() {
        let app = TestApp::spawn().await;
        let token = app.token("poster");

        let form = Form::new()
            .text("type", "image")
            .text("text", "sunset")
            .text("tags", r##"["#Sunset", "beach!", "sunset"]"##)
            .part("images[]", file_part("a.png", png_bytes(40, 30, 1), "image/png"))
            .part("images[]", file_part("b.png", png_bytes(20, 10, 2), "image/png"));
        let res = app.multipart_with_token(routes::FEED_POST, form, &token).await;
        assert_eq!(res.status, 201, "{}", res.text);

        let post = res.data();
        assert_eq!(post["post_type"], "image");
        assert_eq!(post["tags"], json!(["sunset", "beach"]));
        let media = post["media"].as_array().unwrap();
        assert_eq!(media.len(), 2);
        for path in media {
            let path = path.as_str().unwrap();
            assert!(path.starts_with("uploads/feed/photo/"), "{path}");
            assert!(app.exists(path), "{path} missing");
        }
        let thumbnail = post["thumbnail"].as_str().unwrap();
        assert!(thumbnail.contains("/thumb/"));
        assert!(app.exists(thumbnail));

        let hashtags = app.events.wait_for("hashtags").await;
        assert_eq!(hashtags.payload["tags"], json!(["sunset", "beach"]));
        let created = app.events.wait_for("post-created").await;
        assert_eq!(created.payload["item_id"], post["id"]);
    }

    #[tokio::test]
    async fn audio_post_gets_aac_and_subtitle_stub() {
        let app = TestApp::spawn().await;
        let token = app.token("poster");

        let mut mp3 = b"ID3".to_vec();
        mp3.extend_from_slice(&[7u8; 64]);
        let form = Form::new()
            .text("type", "audio")
            .part("audio", file_part("song.mp3", mp3, "audio/mpeg"));
        let res = app.multipart_with_token(routes::FEED_POST, form, &token).await;
        assert_eq!(res.status, 201, "{}", res.text);

        let post = res.data();
        let media = post["media"][0].as_str().unwrap();
        assert!(media.ends_with(".m4a"), "{media}");
        assert_eq!(post["resolutions"], json!(["192k"]));
        let vtt = post["subtitles"]["en"].as_str().unwrap();
        assert!(app.exists(vtt));
    }

    #[tokio::test]
    async fn text_post_needs_no_media() {
        let app = TestApp::spawn().await;
        let form = Form::new().text("type", "text").text("text", "hello world");
        let res = app
            .multipart_with_token(routes::FEED_POST, form, &app.token("poster"))
            .await;
        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.data()["media"], json!([]));
    }

    #[tokio::test]
    async fn media_types_require_a_file() {
        let app = TestApp::spawn().await;
        let form = Form::new().text("type", "video").text("text", "where is it");
        let res = app
            .multipart_with_token(routes::FEED_POST, form, &app.token("poster"))
            .await;
        assert_eq!(res.status, 400);
        assert_eq!(res.error_kind(), "no_media_uploaded");
    }

    #[tokio::test]
    async fn mismatched_files_are_rejected_before_processing() {
        let app = TestApp::spawn().await;
        let token = app.token("poster");

        let form = Form::new()
            .text("type", "image")
            .part("images", file_part("clip.mp4", mp4_bytes(1), "video/mp4"));
        let res = app.multipart_with_token(routes::FEED_POST, form, &token).await;
        assert_eq!(res.status, 400, "{}", res.text);
        assert_eq!(res.error_kind(), "invalid_extension");

        let form = Form::new()
            .text("type", "text")
            .part("images", file_part("a.png", png_bytes(4, 4, 1), "image/png"));
        let res = app.multipart_with_token(routes::FEED_POST, form, &token).await;
        assert_eq!(res.status, 400, "{}", res.text);

        let form = Form::new()
            .text("type", "video")
            .part("video", file_part("clip.mp4", b"just some text".to_vec(), "video/mp4"));
        let res = app.multipart_with_token(routes::FEED_POST, form, &token).await;
        assert_eq!(res.status, 415, "{}", res.text);
        assert_eq!(res.error_kind(), "invalid_mime");

        assert_eq!(app.transcoder.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_type_is_invalid() {
        let app = TestApp::spawn().await;
        let form = Form::new().text("type", "reel");
        let res = app
            .multipart_with_token(routes::FEED_POST, form, &app.token("poster"))
            .await;
        assert_eq!(res.status, 400);
    }
}

mod deduplication {
    use super::*;

    #[tokio::test]
    async fn identical_uploads_share_assets_until_last_delete() {
        let app = TestApp::spawn().await;
        let token = app.token("poster");
        let bytes = mp4_bytes(9);

        let first = app
            .multipart_with_token(routes::FEED_POST, video_form(bytes.clone()), &token)
            .await;
        assert_eq!(first.status, 201, "{}", first.text);
        assert_eq!(app.transcoder.calls(), 1);

        let first_media = first.data()["media"].clone();
        assert_eq!(first.data()["resolutions"], json!(["360", "240", "144"]));
        let primary = first_media[0].as_str().unwrap().to_string();
        assert!(primary.starts_with("uploads/feed/video/"));
        assert!(app.exists(&primary));
        assert!(app.exists(first.data()["thumbnail"].as_str().unwrap()));

        let second = app
            .multipart_with_token(routes::FEED_POST, video_form(bytes), &token)
            .await;
        assert_eq!(second.status, 201, "{}", second.text);
        assert_eq!(app.transcoder.calls(), 1, "second upload must not transcode");
        assert_eq!(second.data()["media"], first_media);
        assert_ne!(second.data()["id"], first.data()["id"]);

        assert_eq!(file_record::Entity::find().count(&app.db).await.unwrap(), 1);
        assert_eq!(file_record_ref::Entity::find().count(&app.db).await.unwrap(), 2);

        let first_id = first.data()["id"].as_str().unwrap().to_string();
        let second_id = second.data()["id"].as_str().unwrap().to_string();

        let res = app.delete_with_token(&routes::feed_post(&first_id), &token).await;
        assert_eq!(res.status, 204);
        assert!(app.exists(&primary), "asset removed while still referenced");

        let res = app.delete_with_token(&routes::feed_post(&second_id), &token).await;
        assert_eq!(res.status, 204);
        assert!(!app.exists(&primary), "asset kept after last reference");
        assert_eq!(file_record::Entity::find().count(&app.db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn asset_released_after_lookup_is_seen_before_attach() {
        let app = TestApp::spawn().await;
        let token = app.token("poster");
        let bytes = mp4_bytes(4);

        let first = app
            .multipart_with_token(routes::FEED_POST, video_form(bytes.clone()), &token)
            .await;
        assert_eq!(first.status, 201, "{}", first.text);
        let hash = file_record::Entity::find()
            .one(&app.db)
            .await
            .unwrap()
            .unwrap()
            .content_hash;

        // A second upload saw the record, then the only post using it goes away.
        assert!(dedup::lookup(&app.db, &hash).await.unwrap().is_some());
        let id = first.data()["id"].as_str().unwrap().to_string();
        let res = app.delete_with_token(&routes::feed_post(&id), &token).await;
        assert_eq!(res.status, 204);

        let txn = app.db.begin().await.unwrap();
        assert!(!dedup::lock_record(&txn, &hash).await.unwrap());
        txn.rollback().await.unwrap();

        let again = app
            .multipart_with_token(routes::FEED_POST, video_form(bytes), &token)
            .await;
        assert_eq!(again.status, 201, "{}", again.text);
        assert_eq!(app.transcoder.calls(), 2, "missing record must be rebuilt");
        assert!(app.exists(again.data()["media"][0].as_str().unwrap()));
    }

    /// Valid PNG header and IHDR followed by garbage.
    fn corrupt_png() -> Vec<u8> {
        let mut bytes = png_bytes(8, 8, 3)[..33].to_vec();
        bytes.extend_from_slice(&[0xAB; 128]);
        bytes
    }

    fn photo_dirs(app: &TestApp) -> usize {
        std::fs::read_dir(app.static_root.join("uploads/feed/photo"))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn failed_file_releases_assets_processed_earlier_in_the_post() {
        let app = TestApp::spawn().await;
        let token = app.token("poster");

        let form = Form::new()
            .text("type", "image")
            .part("images[]", file_part("ok.png", png_bytes(30, 20, 5), "image/png"))
            .part("images[]", file_part("bad.png", corrupt_png(), "image/png"));
        let res = app.multipart_with_token(routes::FEED_POST, form, &token).await;
        assert_eq!(res.status, 422, "{}", res.text);
        assert_eq!(res.error_kind(), "decode_failed");

        assert_eq!(file_record::Entity::find().count(&app.db).await.unwrap(), 0);
        assert_eq!(file_record_ref::Entity::find().count(&app.db).await.unwrap(), 0);
        assert_eq!(photo_dirs(&app), 0, "orphaned asset directory left behind");
    }

    #[tokio::test]
    async fn failed_post_keeps_assets_other_posts_reference() {
        let app = TestApp::spawn().await;
        let token = app.token("poster");
        let shared = png_bytes(30, 20, 6);

        let form = Form::new()
            .text("type", "image")
            .part("images[]", file_part("a.png", shared.clone(), "image/png"));
        let first = app.multipart_with_token(routes::FEED_POST, form, &token).await;
        assert_eq!(first.status, 201, "{}", first.text);
        let media = first.data()["media"][0].as_str().unwrap().to_string();

        let form = Form::new()
            .text("type", "image")
            .part("images[]", file_part("a.png", shared, "image/png"))
            .part("images[]", file_part("bad.png", corrupt_png(), "image/png"));
        let res = app.multipart_with_token(routes::FEED_POST, form, &token).await;
        assert_eq!(res.status, 422, "{}", res.text);

        assert!(app.exists(&media), "shared asset removed by a failed post");
        assert_eq!(file_record::Entity::find().count(&app.db).await.unwrap(), 1);
        assert_eq!(file_record_ref::Entity::find().count(&app.db).await.unwrap(), 1);
        assert_eq!(photo_dirs(&app), 1);
    }

    #[tokio::test]
    async fn different_bytes_are_processed_separately() {
        let app = TestApp::spawn().await;
        let token = app.token("poster");

        for seed in [1, 2] {
            let res = app
                .multipart_with_token(routes::FEED_POST, video_form(mp4_bytes(seed)), &token)
                .await;
            assert_eq!(res.status, 201, "{}", res.text);
        }
        assert_eq!(app.transcoder.calls(), 2);
        assert_eq!(file_record::Entity::find().count(&app.db).await.unwrap(), 2);
    }
}

mod editing {
    use super::*;

    async fn text_post(app: &TestApp, token: &str) -> String {
        let form = Form::new().text("type", "blog").text("title", "Draft").text("text", "body");
        let res = app.multipart_with_token(routes::FEED_POST, form, token).await;
        assert_eq!(res.status, 201, "{}", res.text);
        res.data()["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn author_can_edit_and_others_cannot() {
        let app = TestApp::spawn().await;
        let token = app.token("author");
        let id = text_post(&app, &token).await;

        let res = app
            .patch_with_token(&routes::feed_post(&id), &json!({"title": "Hijacked"}), &app.token("eve"))
            .await;
        assert_eq!(res.status, 403);

        let res = app
            .patch_with_token(
                &routes::feed_post(&id),
                &json!({"title": "Final", "tags": ["Rust", "#news"]}),
                &token,
            )
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.data()["title"], "Final");
        assert_eq!(res.data()["text"], "body");
        assert_eq!(res.data()["tags"], json!(["rust", "news"]));
        app.events.wait_for("post-edited").await;

        let res = app.get_without_token(&routes::feed_post(&id)).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.data()["title"], "Final");
    }

    #[tokio::test]
    async fn missing_post_is_not_found() {
        let app = TestApp::spawn().await;
        let token = app.token("author");
        let res = app
            .patch_with_token(&routes::feed_post("nope"), &json!({"text": "x"}), &token)
            .await;
        assert_eq!(res.status, 404);
        let res = app.get_without_token(&routes::feed_post("nope")).await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn delete_removes_the_post() {
        let app = TestApp::spawn().await;
        let token = app.token("author");
        let id = text_post(&app, &token).await;

        let res = app.delete_with_token(&routes::feed_post(&id), &app.token("eve")).await;
        assert_eq!(res.status, 403);

        let res = app.delete_with_token(&routes::feed_post(&id), &token).await;
        assert_eq!(res.status, 204);
        let res = app.get_without_token(&routes::feed_post(&id)).await;
        assert_eq!(res.status, 404);
        app.events.wait_for("post-deleted").await;
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::spawn().await;
    let res = app.get_without_token(routes::HEALTH).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body["status"], "ok");
    assert_eq!(res.body["database"], true);
}
