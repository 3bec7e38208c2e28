//! Transport seam between transfer workers and the upload server.

use std::path::Path;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tracklift_protocol::constants::{
    CHUNK_REQUEST_TIMEOUT, FIELD_CHUNK, FIELD_CHUNK_INDEX, FIELD_TOTAL_CHUNKS, FIELD_UPLOAD_ID,
    PATH_FINALIZE_UPLOAD, PATH_GET_UPLOAD_URL, PATH_INIT_UPLOAD, PATH_LIST_TRACKS, PATH_TRACKS,
    PATH_UPLOAD_CHUNK, REQUEST_TIMEOUT,
};
use tracklift_protocol::{
    AUDIO_CONTENT_TYPE, ChunkProgress, ErrorResponse, FinalizeUploadRequest,
    FinalizeUploadResponse, InitUploadRequest, InitUploadResponse, ListTracksResponse,
    MessageResponse, StoredTrack, UploadChunkResponse, UploadUrlRequest, UploadUrlResponse,
};

use crate::QueueError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests a transfer worker makes against the upload service.
pub trait UploadClient: Send + Sync {
    /// Opens a chunked session and returns its upload id.
    fn init_upload<'a>(
        &'a self,
        req: &'a InitUploadRequest,
    ) -> BoxFuture<'a, Result<String, QueueError>>;

    /// Sends one chunk.
    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_index: u32,
        total_chunks: u32,
        data: Vec<u8>,
    ) -> BoxFuture<'a, Result<ChunkProgress, QueueError>>;

    /// Reassembles a completed session into the stored track.
    fn finalize_upload<'a>(
        &'a self,
        req: &'a FinalizeUploadRequest,
    ) -> BoxFuture<'a, Result<StoredTrack, QueueError>>;

    /// Obtains a signed URL for a direct upload of `file_name`.
    fn get_upload_url<'a>(&'a self, file_name: &'a str)
    -> BoxFuture<'a, Result<String, QueueError>>;

    /// Streams the whole file at `path` to a signed URL.
    fn put_direct<'a>(
        &'a self,
        signed_url: &'a str,
        path: &'a Path,
        size: u64,
    ) -> BoxFuture<'a, Result<(), QueueError>>;
}

/// [`UploadClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUploadClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpUploadClient {
    /// Creates a client for the server at `base_url` (e.g. `http://localhost:8080`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, QueueError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Lists stored tracks.
    pub async fn list_tracks(&self) -> Result<Vec<StoredTrack>, QueueError> {
        let resp = self
            .http
            .get(self.url(PATH_LIST_TRACKS))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let body: ListTracksResponse = decode(resp).await?;
        Ok(body.items)
    }

    /// Deletes a stored track by name.
    pub async fn delete_track(&self, name: &str) -> Result<String, QueueError> {
        let mut url = reqwest::Url::parse(&self.url(PATH_TRACKS))
            .map_err(|e| QueueError::Validation(format!("invalid server URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| QueueError::Validation("server URL cannot have a path".into()))?
            .push(name);

        let resp = self
            .http
            .delete(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let body: MessageResponse = decode(resp).await?;
        Ok(body.message)
    }
}

/// Decodes a JSON success body or maps an error response.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, QueueError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    Err(error_from_response(resp).await)
}

async fn error_from_response(resp: reqwest::Response) -> QueueError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(body) => QueueError::from_response(status.as_u16(), Some(&body.code), body.error),
        Err(_) => {
            let message = if text.is_empty() {
                status.to_string()
            } else {
                text
            };
            QueueError::from_response(status.as_u16(), None, message)
        }
    }
}

impl UploadClient for HttpUploadClient {
    fn init_upload<'a>(
        &'a self,
        req: &'a InitUploadRequest,
    ) -> BoxFuture<'a, Result<String, QueueError>> {
        async move {
            let resp = self
                .http
                .post(self.url(PATH_INIT_UPLOAD))
                .timeout(REQUEST_TIMEOUT)
                .json(req)
                .send()
                .await?;
            let body: InitUploadResponse = decode(resp).await?;
            Ok(body.upload_id)
        }
        .boxed()
    }

    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_index: u32,
        total_chunks: u32,
        data: Vec<u8>,
    ) -> BoxFuture<'a, Result<ChunkProgress, QueueError>> {
        async move {
            let part = Part::bytes(data)
                .file_name("chunk")
                .mime_str("application/octet-stream")?;
            let form = Form::new()
                .text(FIELD_UPLOAD_ID, upload_id.to_string())
                .text(FIELD_CHUNK_INDEX, chunk_index.to_string())
                .text(FIELD_TOTAL_CHUNKS, total_chunks.to_string())
                .part(FIELD_CHUNK, part);

            let resp = self
                .http
                .post(self.url(PATH_UPLOAD_CHUNK))
                .timeout(CHUNK_REQUEST_TIMEOUT)
                .multipart(form)
                .send()
                .await?;
            let body: UploadChunkResponse = decode(resp).await?;
            Ok(body.progress)
        }
        .boxed()
    }

    fn finalize_upload<'a>(
        &'a self,
        req: &'a FinalizeUploadRequest,
    ) -> BoxFuture<'a, Result<StoredTrack, QueueError>> {
        async move {
            // Reassembly streams the whole file server-side.
            let resp = self
                .http
                .post(self.url(PATH_FINALIZE_UPLOAD))
                .timeout(CHUNK_REQUEST_TIMEOUT)
                .json(req)
                .send()
                .await?;
            let body: FinalizeUploadResponse = decode(resp).await?;
            Ok(body.file)
        }
        .boxed()
    }

    fn get_upload_url<'a>(
        &'a self,
        file_name: &'a str,
    ) -> BoxFuture<'a, Result<String, QueueError>> {
        async move {
            let req = UploadUrlRequest {
                file_name: file_name.to_string(),
            };
            let resp = self
                .http
                .post(self.url(PATH_GET_UPLOAD_URL))
                .timeout(REQUEST_TIMEOUT)
                .json(&req)
                .send()
                .await?;
            let body: UploadUrlResponse = decode(resp).await?;
            Ok(body.signed_url)
        }
        .boxed()
    }

    fn put_direct<'a>(
        &'a self,
        signed_url: &'a str,
        path: &'a Path,
        size: u64,
    ) -> BoxFuture<'a, Result<(), QueueError>> {
        async move {
            let file = tokio::fs::File::open(path).await?;
            let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));
            let resp = self
                .http
                .put(signed_url)
                .timeout(CHUNK_REQUEST_TIMEOUT)
                .header(reqwest::header::CONTENT_TYPE, AUDIO_CONTENT_TYPE)
                .header(reqwest::header::CONTENT_LENGTH, size)
                .body(body)
                .send()
                .await?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(error_from_response(resp).await)
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = HttpUploadClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(
            client.url(PATH_INIT_UPLOAD),
            "http://localhost:8080/api/init-upload"
        );
    }
}
