//! Helpers shared by the integration tests: an in-memory client, a fake
//! media host and subscription assertions.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use uuid::Uuid;

use sharebook_api::{Config, MediaConfig, ShareBook, Subscription};
use sharebook_types::api::{RegisterRequest, Session};

const WAIT: Duration = Duration::from_secs(3);

pub fn client() -> ShareBook {
    ShareBook::in_memory(Config::default()).unwrap()
}

pub fn client_with_media(media: &FakeMedia) -> ShareBook {
    ShareBook::in_memory(config_with_media(media)).unwrap()
}

pub fn config_with_media(media: &FakeMedia) -> Config {
    Config {
        media: MediaConfig {
            base_url: media.base_url.clone(),
            ..MediaConfig::default()
        },
        ..Config::default()
    }
}

pub async fn register(client: &ShareBook, name: &str, email: &str) -> Session {
    client
        .auth()
        .register(RegisterRequest {
            email: email.into(),
            password: "hunter22".into(),
            name: name.into(),
            location: "Alexandria".into(),
            phone: None,
        })
        .await
        .unwrap()
}

/// Next snapshot, failing the test if none arrives in time.
pub async fn next<T>(sub: &mut Subscription<T>) -> T {
    tokio::time::timeout(WAIT, sub.next())
        .await
        .expect("snapshot in time")
        .expect("subscription open")
        .expect("snapshot ok")
}

/// Assert that no snapshot arrives for a short while.
pub async fn assert_quiet<T>(sub: &mut Subscription<T>) {
    let result = tokio::time::timeout(Duration::from_millis(200), sub.next()).await;
    assert!(result.is_err(), "unexpected snapshot");
}

pub fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sharebook_test_{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// One multipart request as seen by the fake host.
#[derive(Debug, Clone, Default)]
pub struct ReceivedUpload {
    pub cloud: String,
    pub resource_type: String,
    pub preset: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
}

#[derive(Clone)]
struct FakeState {
    uploads: Arc<Mutex<Vec<ReceivedUpload>>>,
    succeed: bool,
}

pub struct FakeMedia {
    pub base_url: String,
    uploads: Arc<Mutex<Vec<ReceivedUpload>>>,
}

impl FakeMedia {
    /// A host that answers every upload with a `secure_url`.
    pub async fn accepting() -> Self {
        Self::start(true).await
    }

    /// A host that answers with an error body and no `secure_url`.
    pub async fn rejecting() -> Self {
        Self::start(false).await
    }

    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    async fn start(succeed: bool) -> Self {
        let uploads = Arc::new(Mutex::new(Vec::new()));
        let state = FakeState {
            uploads: uploads.clone(),
            succeed,
        };

        let app = Router::new()
            .route("/{cloud}/{resource_type}/upload", post(upload))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            uploads,
        }
    }
}

async fn upload(
    State(state): State<FakeState>,
    Path((cloud, resource_type)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Json<Value> {
    let mut received = ReceivedUpload {
        cloud,
        resource_type,
        ..ReceivedUpload::default()
    };

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().map(String::from);
        match name.as_deref() {
            Some("file") => {
                received.file_name = field.file_name().map(String::from);
                received.content_type = field.content_type().map(String::from);
                received.size = field.bytes().await.unwrap().len();
            }
            Some("upload_preset") => received.preset = field.text().await.unwrap(),
            _ => {}
        }
    }

    let count = {
        let mut uploads = state.uploads.lock().unwrap();
        uploads.push(received.clone());
        uploads.len()
    };

    if state.succeed {
        Json(json!({
            "public_id": format!("upload_{}", count),
            "secure_url": format!(
                "https://cdn.test/{}/{}/upload_{}",
                received.cloud, received.resource_type, count
            ),
        }))
    } else {
        Json(json!({ "error": { "message": "Upload preset must be whitelisted for unsigned uploads" } }))
    }
}
