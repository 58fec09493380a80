//! Blob storage for uploaded checkpoints.
//!
//! Uploads use the Azure Blob REST endpoint directly, authorised by a SAS token.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use stylegan2_config::BlobSettings;
use tokio_util::io::ReaderStream;

/// Destination for checkpoint uploads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the file at `source` as a new blob at `dest_path` inside the
    /// container, returning the number of bytes sent.
    async fn upload_file(&self, dest_path: &str, source: &Path) -> Result<u64, BlobError>;
}

/// Azure Blob Storage container authorised by a SAS token.
pub struct AzureBlobStore {
    client: reqwest::Client,
    account_url: String,
    container_name: String,
    credential: String,
}

impl AzureBlobStore {
    /// Create a container client from run settings.
    pub fn new(settings: &BlobSettings) -> Result<Self, BlobError> {
        if settings.account_url.trim().is_empty() {
            return Err(BlobError::MissingSetting("account_url"));
        }
        if settings.container_name.trim().is_empty() {
            return Err(BlobError::MissingSetting("container_name"));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            account_url: settings.account_url.trim_end_matches('/').to_string(),
            container_name: settings.container_name.trim_matches('/').to_string(),
            credential: settings.credential.trim_start_matches('?').to_string(),
        })
    }

    /// Full URL of a blob, including the SAS query string when present.
    #[must_use]
    pub fn blob_url(&self, dest_path: &str) -> String {
        let mut url = format!(
            "{}/{}/{}",
            self.account_url,
            self.container_name,
            dest_path.trim_start_matches('/')
        );
        if !self.credential.is_empty() {
            url.push('?');
            url.push_str(&self.credential);
        }
        url
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn upload_file(&self, dest_path: &str, source: &Path) -> Result<u64, BlobError> {
        let io_err = |e| BlobError::Io(source.to_path_buf(), e);
        let file = tokio::fs::File::open(source).await.map_err(io_err)?;
        let len = file.metadata().await.map_err(io_err)?.len();

        // Put Blob rejects chunked bodies, so the length is sent up front.
        let resp = self
            .client
            .put(self.blob_url(dest_path))
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", "2021-08-06")
            // Existing blobs are never overwritten.
            .header("If-None-Match", "*")
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| BlobError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BlobError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("uploaded {len} bytes to {}/{dest_path}", self.container_name);
        Ok(len)
    }
}

/// Errors that can occur when uploading blobs.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob storage setting {0} is empty")]
    MissingSetting(&'static str),
    #[error("cannot read upload source {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("blob upload request failed: {0}")]
    Http(String),
    #[error("blob upload rejected with status {status}: {body}")]
    Status { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    fn settings() -> BlobSettings {
        BlobSettings {
            account_url: "https://acct.blob.core.windows.net/".into(),
            credential: "?sv=2024&sig=abc".into(),
            container_name: "checkpoints".into(),
        }
    }

    #[test]
    fn test_blob_url() {
        let store = AzureBlobStore::new(&settings()).unwrap();
        assert_eq!(
            store.blob_url("faces/model_20.pt"),
            "https://acct.blob.core.windows.net/checkpoints/faces/model_20.pt?sv=2024&sig=abc"
        );
    }

    #[test]
    fn test_blob_url_without_credential() {
        let store = AzureBlobStore::new(&BlobSettings {
            credential: String::new(),
            ..settings()
        })
        .unwrap();
        assert_eq!(
            store.blob_url("/faces/model_0.pt"),
            "https://acct.blob.core.windows.net/checkpoints/faces/model_0.pt"
        );
    }

    #[test]
    fn test_missing_settings() {
        let err = AzureBlobStore::new(&BlobSettings::default()).err().unwrap();
        assert!(matches!(err, BlobError::MissingSetting("account_url")));

        let err = AzureBlobStore::new(&BlobSettings {
            container_name: String::new(),
            ..settings()
        })
        .err()
        .unwrap();
        assert!(matches!(err, BlobError::MissingSetting("container_name")));
    }

    /// Accept one request, answer 201, and return its lowercased head and body.
    async fn accept_one(listener: TcpListener) -> (String, Vec<u8>) {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = sock.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let len: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .expect("request carries a content-length")
            .trim()
            .parse()
            .unwrap();
        while buf.len() < head_end + len {
            let n = sock.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-body");
            buf.extend_from_slice(&chunk[..n]);
        }
        sock.write_all(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        (head, buf[head_end..head_end + len].to_vec())
    }

    #[tokio::test]
    async fn test_upload_streams_file_with_length() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("model_20.pt");
        let weights: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &weights).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_one(listener));

        let store = AzureBlobStore::new(&BlobSettings {
            account_url: format!("http://{addr}"),
            ..settings()
        })
        .unwrap();
        let sent = store.upload_file("faces/model_20.pt", &source).await.unwrap();
        assert_eq!(sent, weights.len() as u64);

        let (head, body) = server.await.unwrap();
        assert!(head.starts_with("put /checkpoints/faces/model_20.pt?sv=2024&sig=abc "));
        assert!(head.contains("x-ms-blob-type: blockblob"));
        assert!(head.contains("if-none-match: *"));
        assert!(!head.contains("transfer-encoding"));
        assert_eq!(body, weights);
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let store = AzureBlobStore::new(&settings()).unwrap();
        let err = store
            .upload_file("faces/model_1.pt", Path::new("/nonexistent/model_1.pt"))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Io(..)));
    }
}
