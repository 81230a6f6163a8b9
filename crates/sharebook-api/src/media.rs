use std::path::Path;

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use sharebook_types::api::UploadResponse;

use crate::config::MediaConfig;
use crate::error::{Error, Result};

/// What is being uploaded. Decides the endpoint, preset and part metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Cover,
    Pdf,
    Avatar,
}

impl MediaKind {
    fn resource_type(self) -> &'static str {
        match self {
            MediaKind::Cover | MediaKind::Avatar => "image",
            MediaKind::Pdf => "raw",
        }
    }

    fn mime(self) -> &'static str {
        match self {
            MediaKind::Cover | MediaKind::Avatar => "image/jpeg",
            MediaKind::Pdf => "application/pdf",
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            MediaKind::Cover => "cover.jpg",
            MediaKind::Pdf => "book.pdf",
            MediaKind::Avatar => "profile.jpg",
        }
    }
}

/// Unsigned uploads to the media host. Cheap to clone.
#[derive(Clone)]
pub struct MediaClient {
    http: reqwest::Client,
    config: MediaConfig,
}

impl MediaClient {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn endpoint(&self, kind: MediaKind) -> String {
        format!(
            "{}/{}/{}/upload",
            self.config.base_url.trim_end_matches('/'),
            self.config.cloud_name,
            kind.resource_type()
        )
    }

    fn preset(&self, kind: MediaKind) -> &str {
        match kind {
            MediaKind::Cover | MediaKind::Pdf => &self.config.book_preset,
            MediaKind::Avatar => &self.config.avatar_preset,
        }
    }

    /// Upload a local file and return its public URL.
    pub async fn upload_file(&self, path: &Path, kind: MediaKind) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        self.upload_bytes(bytes, kind).await
    }

    /// Upload raw bytes. Succeeds only when the host answers with a
    /// `secure_url`; the HTTP status alone is not trusted.
    pub async fn upload_bytes(&self, bytes: Vec<u8>, kind: MediaKind) -> Result<String> {
        let endpoint = self.endpoint(kind);
        let size = bytes.len();

        let part = Part::bytes(bytes)
            .file_name(kind.file_name())
            .mime_str(kind.mime())?;
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.preset(kind).to_string());

        let response = self.http.post(&endpoint).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        match secure_url_from(status, &body) {
            Ok(url) => {
                debug!("Uploaded {} bytes as {:?} to {}", size, kind, url);
                Ok(url)
            }
            Err(e) => {
                warn!("Upload to {} failed ({}): {}", endpoint, status, e);
                Err(e)
            }
        }
    }
}

fn secure_url_from(status: StatusCode, body: &str) -> Result<String> {
    let parsed: UploadResponse = serde_json::from_str(body)
        .map_err(|_| Error::Upload(format!("Upload failed - unexpected response ({})", status)))?;

    match parsed.secure_url {
        Some(url) if !url.is_empty() => Ok(url),
        _ => Err(Error::Upload(
            parsed
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "Upload failed - no secure_url".to_string()),
        )),
    }
}
