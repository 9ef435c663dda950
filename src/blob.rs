//! Blob store collaborator for voice clips.
//!
//! Audio arrives inline from clients as a base64 `data:` URI; the relay
//! decodes it and hands the bytes to an external blob store, which returns a
//! permanent URL. The store is a trait object so tests can swap in a fake.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

#[derive(Debug)]
pub enum UploadError {
    Http(reqwest::Error),
    Status(u16),
    BadResponse(String),
    BadDataUri(String),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Http(e) => write!(f, "upload request failed: {e}"),
            UploadError::Status(code) => write!(f, "blob store returned status {code}"),
            UploadError::BadResponse(msg) => write!(f, "unexpected blob store response: {msg}"),
            UploadError::BadDataUri(msg) => write!(f, "malformed data uri: {msg}"),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Http(err)
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` and returns the permanent URL they are served from.
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, UploadError>;
}

/// A decoded inline audio payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Decodes a `data:<mime>;base64,<payload>` URI as sent by the client for
/// voice messages.
pub fn decode_data_uri(uri: &str) -> Result<AudioClip, UploadError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| UploadError::BadDataUri("missing data: scheme".to_owned()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| UploadError::BadDataUri("missing payload separator".to_owned()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| UploadError::BadDataUri("payload is not base64".to_owned()))?;

    let bytes = BASE64
        .decode(payload)
        .map_err(|e| UploadError::BadDataUri(e.to_string()))?;

    Ok(AudioClip {
        bytes,
        content_type: if mime.is_empty() {
            "application/octet-stream".to_owned()
        } else {
            mime.to_owned()
        },
    })
}

/// Production blob store: POSTs the bytes to the configured endpoint and
/// reads the permanent URL out of the JSON response (`{"url": "..."}`).
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBlobStore {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_owned(),
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, UploadError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| UploadError::BadResponse(e.to_string()))?;
        body.get("url")
            .and_then(|url| url.as_str())
            .map(str::to_owned)
            .ok_or_else(|| UploadError::BadResponse(format!("no url field in {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_audio_data_uri() {
        let clip = decode_data_uri("data:audio/mpeg;base64,aGVsbG8=").unwrap();
        assert_eq!(clip.content_type, "audio/mpeg");
        assert_eq!(clip.bytes, b"hello");
    }

    #[test]
    fn empty_mime_falls_back_to_octet_stream() {
        let clip = decode_data_uri("data:;base64,aGVsbG8=").unwrap();
        assert_eq!(clip.content_type, "application/octet-stream");
    }

    #[test]
    fn rejects_non_base64_payload_encoding() {
        assert!(decode_data_uri("data:audio/mpeg,plaintext").is_err());
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(decode_data_uri("audio/mpeg;base64,aGVsbG8=").is_err());
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode_data_uri("data:audio/mpeg;base64,!!!").is_err());
    }
}
