use crate::AppState;
use crate::api::error::AppError;
use crate::models::{ChunkIndex, Fingerprint, MergedArtifact, ReceivedChunk, TargetName, UploadStatus};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::io::StreamReader;
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    /// Content fingerprint of the whole file
    pub fingerprint: String,
    /// Desired final filename
    pub name: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub already_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub present_indices: Option<Vec<u64>>,
}

impl From<UploadStatus> for StatusResponse {
    fn from(status: UploadStatus) -> Self {
        match status {
            UploadStatus::AlreadyComplete { url } => Self {
                already_complete: true,
                url: Some(url),
                present_indices: None,
            },
            UploadStatus::Pending { present_indices } => Self {
                already_complete: false,
                url: None,
                present_indices: Some(present_indices.into_iter().collect()),
            },
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChunkQuery {
    /// Overrides the server's chunk timeout
    pub timeout_secs: Option<u64>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MergeRequest {
    pub fingerprint: String,
    pub name: String,
    /// Overrides the server's merge timeout
    pub timeout_secs: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/upload/status",
    params(StatusQuery),
    responses(
        (status = 200, description = "Upload status", body = StatusResponse),
        (status = 400, description = "Invalid fingerprint or name")
    ),
    tag = "uploads"
)]
pub async fn status_handler(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, AppError> {
    let fingerprint = Fingerprint::parse(query.fingerprint)?;
    let target_name = TargetName::parse(query.name)?;

    let status = state
        .uploads
        .query_status(&fingerprint, &target_name)
        .await?;
    Ok(Json(status.into()))
}

#[utoipa::path(
    put,
    path = "/upload/{fingerprint}/chunks/{index}",
    request_body(content = Vec<u8>, description = "Chunk data", content_type = "application/octet-stream"),
    params(
        ("fingerprint" = String, Path, description = "Content fingerprint of the whole file"),
        ("index" = u64, Path, description = "Chunk index (0-based)"),
        ChunkQuery
    ),
    responses(
        (status = 200, description = "Chunk stored", body = ReceivedChunk),
        (status = 400, description = "Invalid fingerprint or index"),
        (status = 413, description = "Chunk too large")
    ),
    tag = "uploads"
)]
pub async fn upload_chunk_handler(
    State(state): State<AppState>,
    Path((fingerprint, index)): Path<(String, String)>,
    Query(query): Query<ChunkQuery>,
    body: Body,
) -> Result<Json<ReceivedChunk>, AppError> {
    let fingerprint = Fingerprint::parse(fingerprint)?;
    let index = ChunkIndex::parse(&index)?;

    let reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));

    let ack = state
        .uploads
        .receive_chunk(
            &fingerprint,
            index,
            Box::new(reader),
            query.timeout_secs.map(Duration::from_secs),
        )
        .await?;
    Ok(Json(ack))
}

/// Splits a form filename of the shape `<fingerprint>-<index>`.
fn parse_chunk_file_name(file_name: &str) -> Result<(Fingerprint, ChunkIndex), AppError> {
    let (fingerprint, index) = file_name.rsplit_once('-').ok_or_else(|| {
        AppError::BadRequest(format!(
            "Chunk filename '{}' must look like <fingerprint>-<index>",
            file_name
        ))
    })?;
    Ok((Fingerprint::parse(fingerprint)?, ChunkIndex::parse(index)?))
}

#[utoipa::path(
    post,
    path = "/upload/single",
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Field `file` with filename `<fingerprint>-<index>`"),
    responses(
        (status = 200, description = "Chunk stored", body = ReceivedChunk),
        (status = 400, description = "Missing file field or malformed filename")
    ),
    tag = "uploads"
)]
pub async fn upload_single_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ReceivedChunk>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .ok_or_else(|| AppError::BadRequest("File field has no filename".to_string()))?
            .to_string();
        let (fingerprint, index) = parse_chunk_file_name(&file_name)?;

        let reader = StreamReader::new(Box::pin(field.map_err(std::io::Error::other)));
        let ack = state
            .uploads
            .receive_chunk(&fingerprint, index, Box::new(reader), None)
            .await?;
        return Ok(Json(ack));
    }

    Err(AppError::BadRequest("Missing 'file' field".to_string()))
}

#[utoipa::path(
    post,
    path = "/upload/merge",
    request_body = MergeRequest,
    responses(
        (status = 200, description = "Artifact finalized", body = MergedArtifact),
        (status = 404, description = "Nothing uploaded for this fingerprint"),
        (status = 409, description = "Chunks are missing"),
        (status = 422, description = "Merged content does not match the fingerprint")
    ),
    tag = "uploads"
)]
pub async fn merge_handler(
    State(state): State<AppState>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<MergedArtifact>, AppError> {
    let fingerprint = Fingerprint::parse(req.fingerprint)?;
    let target_name = TargetName::parse(req.name)?;

    let merged = state
        .uploads
        .merge(
            &fingerprint,
            &target_name,
            req.timeout_secs.map(Duration::from_secs),
        )
        .await?;
    Ok(Json(merged))
}

#[utoipa::path(
    delete,
    path = "/upload/{fingerprint}",
    params(
        ("fingerprint" = String, Path, description = "Content fingerprint of the whole file")
    ),
    responses(
        (status = 204, description = "Staged chunks discarded"),
        (status = 400, description = "Invalid fingerprint")
    ),
    tag = "uploads"
)]
pub async fn abort_upload_handler(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<StatusCode, AppError> {
    let fingerprint = Fingerprint::parse(fingerprint)?;
    state.uploads.remove_session(&fingerprint).await?;
    Ok(StatusCode::NO_CONTENT)
}
