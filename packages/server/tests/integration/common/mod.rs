use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::storage::FilesystemUploadStore;
use common::{EventPublisher, GenericEvent, PublishError};
use media::{MediaConfig, MediaError, ProbeInfo, Transcoder};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::Value;
use tempfile::TempDir;

use plaza::cache::Cache;
use plaza::config::{
    AppConfig, AuthConfig, CacheConfig, ChatConfig, CorsConfig, DatabaseConfig, EventBusConfig,
    ServerConfig, StorageConfig, TicketConfig,
};
use plaza::events::EventEmitter;
use plaza::hub::Hub;
use plaza::state::AppState;

pub const JWT_SECRET: &str = "test-secret-for-integration-tests";
pub const QR_SECRET: &str = "test-qr-secret";

pub mod routes {
    pub const CHATS: &str = "/api/v1/newchat";
    pub const DIRECT_CHAT: &str = "/api/v1/newchat/direct";
    pub const CHAT_UPLOAD: &str = "/newchat/upload";
    pub const FEED_POST: &str = "/api/v1/feed/post";
    pub const HEALTH: &str = "/health";

    pub fn ws(room: &str) -> String {
        format!("/ws/{room}")
    }

    pub fn chat_history(room: &str) -> String {
        format!("/api/v1/newchat/{room}")
    }

    pub fn chat_read(room: &str) -> String {
        format!("/api/v1/newchat/{room}/read")
    }

    pub fn chat_presence(room: &str) -> String {
        format!("/api/v1/newchat/{room}/presence")
    }

    pub fn tickets(event: &str) -> String {
        format!("/api/v1/ticket/event/{event}")
    }

    pub fn ticket(event: &str, ticket: &str) -> String {
        format!("/api/v1/ticket/event/{event}/{ticket}")
    }

    pub fn buy(event: &str, ticket: &str) -> String {
        format!("/api/v1/ticket/event/{event}/{ticket}/buy")
    }

    pub fn regenerate(event: &str, ticket: &str) -> String {
        format!("/api/v1/ticket/event/{event}/{ticket}/seats/regenerate")
    }

    pub fn qr(event: &str, ticket: &str, code: &str) -> String {
        format!("/api/v1/ticket/event/{event}/{ticket}/qr/{code}")
    }

    pub fn verify(event: &str) -> String {
        format!("/api/v1/ticket/verify/{event}")
    }

    pub fn seats(event: &str) -> String {
        format!("/api/v1/seats/{event}")
    }

    pub fn lock_seats(event: &str) -> String {
        format!("/api/v1/seats/{event}/lock-seats")
    }

    pub fn unlock_seats(event: &str) -> String {
        format!("/api/v1/seats/{event}/unlock-seats")
    }

    pub fn confirm_purchase(event: &str, ticket: &str) -> String {
        format!("/api/v1/seats/{event}/ticket/{ticket}/confirm-purchase")
    }

    pub fn feed_post(id: &str) -> String {
        format!("/api/v1/feed/post/{id}")
    }
}

/// Transcoder that writes placeholder files instead of running ffmpeg.
pub struct StubTranscoder {
    pub probe: ProbeInfo,
    pub calls: Mutex<usize>,
}

impl StubTranscoder {
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn count(&self) {
        *self.calls.lock().unwrap() += 1;
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn probe(&self, _: &Path) -> Result<ProbeInfo, MediaError> {
        self.count();
        Ok(self.probe)
    }

    async fn encode_video(
        &self,
        _: &Path,
        output: &Path,
        _: u32,
        _: u32,
    ) -> Result<(), MediaError> {
        tokio::fs::write(output, b"mp4").await?;
        Ok(())
    }

    async fn extract_poster(&self, _: &Path, output: &Path, _: f64) -> Result<(), MediaError> {
        tokio::fs::write(output, b"jpg").await?;
        Ok(())
    }

    async fn encode_audio(&self, _: &Path, output: &Path, _: u32) -> Result<(), MediaError> {
        self.count();
        tokio::fs::write(output, b"m4a").await?;
        Ok(())
    }
}

/// Publisher that keeps every event in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<GenericEvent>>,
}

impl RecordingPublisher {
    pub fn topics(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.topic.clone())
            .collect()
    }

    /// Wait for `topic` to show up; publishing runs on a spawned task.
    pub async fn wait_for(&self, topic: &str) -> GenericEvent {
        for _ in 0..100 {
            let found = self
                .events
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.topic == topic)
                .cloned();
            if let Some(event) = found {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("event '{topic}' was not published; got {:?}", self.topics());
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: GenericEvent) -> Result<(), PublishError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// A running test server backed by SQLite and a temp static root.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub static_root: PathBuf,
    pub transcoder: Arc<StubTranscoder>,
    pub events: Arc<RecordingPublisher>,
    pub hub: Hub,
    _dir: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

pub fn test_config(static_root: PathBuf, db_url: String) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors: CorsConfig {
                allow_origins: vec![],
                max_age: 3600,
            },
            allowed_origins: vec!["http://allowed.test".to_string()],
        },
        database: DatabaseConfig { url: db_url },
        auth: AuthConfig {
            jwt_secret: JWT_SECRET.to_string(),
        },
        ticket: TicketConfig {
            qr_secret: QR_SECRET.to_string(),
            qr_drift_secs: 300,
            seat_lock_ttl_secs: 600,
            max_per_order: 10,
        },
        storage: StorageConfig {
            static_root,
            max_upload_size: 1024 * 1024,
            chat_max_upload_size: 256 * 1024,
        },
        chat: ChatConfig::default(),
        media: MediaConfig::default(),
        mq: EventBusConfig::default(),
        cache: CacheConfig::default(),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        // One connection serializes writers the way row locks do on Postgres.
        Self::spawn_with(1, |_| {}).await
    }

    /// Spawn with `connections` pooled SQLite connections so transactions interleave.
    pub async fn spawn_with_pool(connections: u32) -> Self {
        Self::spawn_with(connections, |_| {}).await
    }

    pub async fn spawn_with(connections: u32, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let static_root = dir.path().join("static");
        let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("plaza.db").display());

        let mut opts = ConnectOptions::new(&db_url);
        opts.max_connections(connections)
            .acquire_timeout(Duration::from_secs(30))
            .sqlx_logging(false);
        let db = Database::connect(opts)
            .await
            .expect("Failed to connect to test database");
        plaza::database::sync_schema(&db)
            .await
            .expect("Failed to sync schema");
        plaza::seed::ensure_indexes(&db)
            .await
            .expect("Failed to create indexes");

        let mut config = test_config(static_root.clone(), db_url);
        tweak(&mut config);
        let store = FilesystemUploadStore::new(static_root.clone(), config.storage.max_upload_size)
            .await
            .expect("Failed to create upload store");

        let transcoder = Arc::new(StubTranscoder {
            probe: ProbeInfo {
                width: 640,
                height: 360,
                duration: Some(3.0),
            },
            calls: Mutex::new(0),
        });
        let events = Arc::new(RecordingPublisher::default());

        let cache = Arc::new(Cache::new(Duration::from_secs(config.cache.ttl_secs)));
        let (hub, scheduler) = Hub::new(cache.clone());
        tokio::spawn(scheduler.run());

        let state = AppState {
            db: db.clone(),
            config: Arc::new(config),
            hub: hub.clone(),
            cache,
            store: Arc::new(store),
            transcoder: transcoder.clone(),
            events: EventEmitter::new(events.clone()),
        };
        let app = plaza::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            static_root,
            transcoder,
            events,
            hub,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Mint a token the way the identity service would.
    pub fn token(&self, user_id: &str) -> String {
        plaza::utils::jwt::sign(JWT_SECRET, user_id, &format!("{user_id}-name"), &[])
            .expect("Failed to sign token")
    }

    pub async fn post_with_token(&self, path: &str, body: &Value, token: &str) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn post_form_with_token(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        token: &str,
    ) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .form(fields)
            .send()
            .await
            .expect("Failed to send form request");

        TestResponse::from_response(res).await
    }

    pub async fn patch_form_with_token(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        token: &str,
    ) -> TestResponse {
        let res = self
            .client
            .patch(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .form(fields)
            .send()
            .await
            .expect("Failed to send form request");

        TestResponse::from_response(res).await
    }

    pub async fn multipart_with_token(&self, path: &str, form: Form, token: &str) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart request");

        TestResponse::from_response(res).await
    }

    pub async fn get_with_token(&self, path: &str, token: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_without_token(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_query(&self, path: &str, query: &[(&str, &str)]) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn patch_with_token(&self, path: &str, body: &Value, token: &str) -> TestResponse {
        let res = self
            .client
            .patch(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .expect("Failed to send PATCH request");

        TestResponse::from_response(res).await
    }

    pub async fn delete_with_token(&self, path: &str, token: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .expect("Failed to send DELETE request");

        TestResponse::from_response(res).await
    }

    /// Open a direct chat between two users and return its id.
    pub async fn direct_chat(&self, token: &str, other: &str) -> String {
        let res = self
            .post_with_token(
                routes::DIRECT_CHAT,
                &serde_json::json!({ "user_id": other }),
                token,
            )
            .await;
        assert!(
            res.status == 200 || res.status == 201,
            "direct_chat failed: {}",
            res.text
        );
        res.body["data"]["chat"]["id"]
            .as_str()
            .expect("chat id")
            .to_string()
    }

    /// Create a ticket type and return its id.
    pub async fn create_ticket(&self, token: &str, event: &str, fields: &[(&str, &str)]) -> String {
        let res = self
            .post_form_with_token(&routes::tickets(event), fields, token)
            .await;
        assert_eq!(res.status, 201, "create_ticket failed: {}", res.text);
        res.body["data"]["id"].as_str().expect("ticket id").to_string()
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.static_root.join(relative).exists()
    }
}

/// A multipart file part with an explicit content type.
pub fn file_part(name: &str, bytes: Vec<u8>, mime: &str) -> Part {
    Part::bytes(bytes)
        .file_name(name.to_string())
        .mime_str(mime)
        .expect("Failed to set MIME type")
}

/// A small valid PNG.
pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([seed, (x % 256) as u8, (y % 256) as u8])
    });
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    buf.into_inner()
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self { status, text, body }
    }

    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn error_kind(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}
