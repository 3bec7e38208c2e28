//! HTTP surface of the upload server.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracklift_protocol::constants::{
    FIELD_CHUNK, FIELD_CHUNK_INDEX, FIELD_TOTAL_CHUNKS, FIELD_UPLOAD_ID, PATH_DIRECT_UPLOAD,
    PATH_FINALIZE_UPLOAD, PATH_GET_UPLOAD_URL, PATH_INIT_UPLOAD, PATH_LIST_TRACKS, PATH_TRACKS,
    PATH_UPLOAD_CHUNK,
};
use tracklift_protocol::{
    AUDIO_CONTENT_TYPE, FinalizeUploadRequest, FinalizeUploadResponse, InitUploadRequest,
    InitUploadResponse, ListTracksResponse, MessageResponse, StoredTrack, UploadChunkResponse,
    UploadUrlRequest, UploadUrlResponse,
};
use tracklift_storage::{ObjectInfo, ObjectStore, UrlSigner};
use tracklift_transfer::validate_track_name;

use crate::error::UploadError;
use crate::finalize::{Finalizer, open_failed};
use crate::session::SessionStore;

/// Room for multipart framing and the text fields around a full chunk.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub finalizer: Arc<Finalizer>,
    pub store: Arc<dyn ObjectStore>,
    /// Verifies direct-upload URLs; `None` disables the direct `PUT` route.
    pub signer: Option<UrlSigner>,
    pub direct_url_ttl: Duration,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionStore>,
        store: Arc<dyn ObjectStore>,
        signer: Option<UrlSigner>,
        tracks_prefix: &str,
        direct_url_ttl: Duration,
    ) -> Self {
        let finalizer = Arc::new(Finalizer::new(
            Arc::clone(&sessions),
            Arc::clone(&store),
            tracks_prefix,
        ));
        Self {
            sessions,
            finalizer,
            store,
            signer,
            direct_url_ttl,
        }
    }

    fn track_name<'a>(&self, object_path: &'a str) -> &'a str {
        object_path
            .strip_prefix(self.finalizer.tracks_prefix())
            .unwrap_or(object_path)
    }

    fn stored_track(&self, info: &ObjectInfo) -> StoredTrack {
        StoredTrack {
            name: self.track_name(&info.name).to_string(),
            size: info.size,
        }
    }
}

/// Builds the `/api` router.
pub fn router(state: AppState) -> Router {
    let chunk_limit = usize::try_from(state.sessions.max_chunk_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(PATH_INIT_UPLOAD, post(init_upload))
        .route(
            PATH_UPLOAD_CHUNK,
            post(upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route(PATH_FINALIZE_UPLOAD, post(finalize_upload))
        .route(PATH_LIST_TRACKS, get(list_tracks))
        .route(&format!("{PATH_TRACKS}/{{*name}}"), delete(delete_track))
        .route(PATH_GET_UPLOAD_URL, post(get_upload_url))
        .route(
            &format!("{PATH_DIRECT_UPLOAD}/{{*path}}"),
            put(direct_upload).layer(DefaultBodyLimit::disable()),
        )
        .with_state(state)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, UploadError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| UploadError::InvalidRequest(e.body_text()))
}

async fn init_upload(
    State(state): State<AppState>,
    payload: Result<Json<InitUploadRequest>, JsonRejection>,
) -> Result<Json<InitUploadResponse>, UploadError> {
    let req = json_body(payload)?;
    let upload_id = state
        .sessions
        .init(&req.file_name, req.file_size, req.total_chunks)
        .await?;
    Ok(Json(InitUploadResponse { upload_id }))
}

fn multipart_error(e: MultipartError) -> UploadError {
    UploadError::InvalidRequest(e.body_text())
}

fn parse_u32_field(name: &str, value: &str) -> Result<u32, UploadError> {
    value
        .trim()
        .parse()
        .map_err(|_| UploadError::InvalidRequest(format!("{name} must be a non-negative integer")))
}

async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadChunkResponse>, UploadError> {
    let mut upload_id = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut data = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            FIELD_UPLOAD_ID => upload_id = Some(field.text().await.map_err(multipart_error)?),
            FIELD_CHUNK_INDEX => {
                let text = field.text().await.map_err(multipart_error)?;
                chunk_index = Some(parse_u32_field(FIELD_CHUNK_INDEX, &text)?);
            }
            FIELD_TOTAL_CHUNKS => {
                let text = field.text().await.map_err(multipart_error)?;
                total_chunks = Some(parse_u32_field(FIELD_TOTAL_CHUNKS, &text)?);
            }
            FIELD_CHUNK => data = Some(field.bytes().await.map_err(multipart_error)?),
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let upload_id = upload_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| UploadError::InvalidRequest(format!("{FIELD_UPLOAD_ID} is required")))?;
    let chunk_index = chunk_index
        .ok_or_else(|| UploadError::InvalidRequest(format!("{FIELD_CHUNK_INDEX} is required")))?;

    let progress = state
        .sessions
        .receive_chunk(&upload_id, chunk_index, total_chunks, data.as_deref())
        .await?;
    Ok(Json(UploadChunkResponse { progress }))
}

async fn finalize_upload(
    State(state): State<AppState>,
    payload: Result<Json<FinalizeUploadRequest>, JsonRejection>,
) -> Result<Json<FinalizeUploadResponse>, UploadError> {
    let req = json_body(payload)?;
    let info = state
        .finalizer
        .finalize(&req.upload_id, &req.file_name, req.total_chunks)
        .await?;
    Ok(Json(FinalizeUploadResponse {
        message: "Upload successful".into(),
        file: state.stored_track(&info),
    }))
}

async fn list_tracks(
    State(state): State<AppState>,
) -> Result<Json<ListTracksResponse>, UploadError> {
    let objects = state.store.list(state.finalizer.tracks_prefix()).await?;
    let items = objects.iter().map(|info| state.stored_track(info)).collect();
    Ok(Json(ListTracksResponse { items }))
}

async fn delete_track(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, UploadError> {
    let object_path = state.finalizer.object_path(&name);
    state.store.delete(&object_path).await?;
    info!(object = %object_path, "track deleted");
    Ok(Json(MessageResponse {
        message: format!("Deleted {name}"),
    }))
}

async fn get_upload_url(
    State(state): State<AppState>,
    payload: Result<Json<UploadUrlRequest>, JsonRejection>,
) -> Result<Json<UploadUrlResponse>, UploadError> {
    let req = json_body(payload)?;
    validate_track_name(&req.file_name)?;
    let object_path = state.finalizer.object_path(&req.file_name);
    let signed_url = state
        .store
        .sign_write_url(&object_path, state.direct_url_ttl)?;
    debug!(object = %object_path, "signed direct upload URL issued");
    Ok(Json(UploadUrlResponse { signed_url }))
}

#[derive(Debug, Deserialize)]
struct DirectUploadQuery {
    expires: i64,
    signature: String,
}

async fn direct_upload(
    State(state): State<AppState>,
    Path(object_path): Path<String>,
    query: Result<Query<DirectUploadQuery>, QueryRejection>,
    body: Body,
) -> Result<Json<FinalizeUploadResponse>, UploadError> {
    let signer = state
        .signer
        .as_ref()
        .ok_or_else(|| UploadError::NotFound("direct uploads are not enabled".into()))?;
    let Query(query) =
        query.map_err(|_| UploadError::Forbidden("missing upload URL signature".into()))?;
    signer.verify(
        &object_path,
        query.expires,
        &query.signature,
        chrono::Utc::now().timestamp(),
    )?;

    let mut writer = state
        .store
        .open_write_stream(&object_path, AUDIO_CONTENT_TYPE)
        .await
        .map_err(open_failed)?;

    let mut stream = body.into_data_stream();
    while let Some(frame) = stream.next().await {
        let result = match frame {
            Ok(bytes) => writer
                .write(&bytes)
                .await
                .map_err(|e| UploadError::StorageWrite(e.to_string())),
            Err(e) => Err(UploadError::InvalidRequest(format!(
                "request body interrupted: {e}"
            ))),
        };
        if let Err(e) = result {
            writer.abort().await;
            warn!(object = %object_path, error = %e, "direct upload aborted");
            return Err(e);
        }
    }

    let info = writer
        .finish()
        .await
        .map_err(|e| UploadError::StorageWrite(e.to_string()))?;
    info!(object = %info.name, size = info.size, "direct upload stored");

    Ok(Json(FinalizeUploadResponse {
        message: "Upload successful".into(),
        file: state.stored_track(&info),
    }))
}
