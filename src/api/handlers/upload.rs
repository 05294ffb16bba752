use crate::AppState;
use crate::api::error::AppError;
use crate::entities::upload_sessions;
use crate::services::upload::{ChunkRequest, CreateSessionRequest};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{ConnectInfo, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateUploadRequest {
    pub project_id: String,
    #[serde(default)]
    pub directory_id: String,
    /// Used when `directory_id` is empty; the directory is created if missing
    #[serde(default)]
    pub directory_path: Option<String>,
    pub filename: String,
    pub filesize: i64,
    /// Bytes per chunk, 0 for the server default
    #[serde(default)]
    pub chunk_size: i32,
    /// Last modification time of the client's file (RFC 1123)
    #[serde(default, alias = "filemtime")]
    pub file_mtime: Option<String>,
    /// Hex SHA-256 of the whole file, if the client computed it
    #[serde(default)]
    pub checksum: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateUploadResponse {
    pub request_id: String,
    pub starting_block: i32,
    /// Present when the upload completed on creation (empty files)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub done: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadChunkResponse {
    pub file_id: Option<String>,
    pub done: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadEntry {
    pub request_id: String,
    pub filename: String,
    pub directory_id: String,
    pub project_id: String,
    pub size: i64,
    pub host: String,
    pub checksum: String,
    pub birthtime: DateTime<FixedOffset>,
}

impl From<upload_sessions::Model> for UploadEntry {
    fn from(session: upload_sessions::Model) -> Self {
        Self {
            request_id: session.id,
            filename: session.file_name,
            directory_id: session.directory_id,
            project_id: session.project_id,
            size: session.file_size,
            host: session.host,
            checksum: session.checksum,
            birthtime: session.birthtime,
        }
    }
}

/// Parses the client's modification time. RFC 1123 stamps are RFC 2822
/// compatible except for the "UTC" zone name.
fn parse_mtime(value: &str) -> Result<DateTime<FixedOffset>, AppError> {
    let value = value.trim();
    let normalized = match value.strip_suffix(" UTC") {
        Some(head) => format!("{} GMT", head),
        None => value.to_string(),
    };

    DateTime::parse_from_rfc2822(&normalized)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map_err(|_| AppError::BadRequest(format!("Invalid file_mtime '{}'", value)))
}

fn client_host(headers: &HeaderMap, connect: Option<ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| connect.map(|ConnectInfo(addr)| addr.to_string()))
        .unwrap_or_default()
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body = CreateUploadRequest,
    responses(
        (status = 200, description = "Upload created or resumed", body = CreateUploadResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No access to project"),
        (status = 404, description = "Project or directory not found")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn create_upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<CreateUploadRequest>,
) -> Result<Json<CreateUploadResponse>, AppError> {
    let file_mtime = match req.file_mtime.as_deref() {
        Some(value) if !value.trim().is_empty() => Some(parse_mtime(value)?),
        _ => None,
    };

    let created = state
        .upload_service
        .create_session(CreateSessionRequest {
            owner: claims.sub,
            project_id: req.project_id,
            directory_id: req.directory_id,
            directory_path: req.directory_path,
            file_name: req.filename,
            file_size: req.filesize,
            chunk_size: req.chunk_size,
            checksum: req.checksum,
            file_mtime,
            host: client_host(&headers, connect),
        })
        .await?;

    Ok(Json(CreateUploadResponse {
        request_id: created.session_id,
        starting_block: created.starting_block,
        done: created.finished.is_some(),
        file_id: created.finished.map(|f| f.file.id),
    }))
}

/// Form fields of one chunk post, as sent by Flow.js style clients.
#[derive(Default)]
struct ChunkForm {
    chunk_number: Option<i32>,
    total_chunks: Option<i32>,
    chunk_size: Option<i64>,
    total_size: Option<i64>,
    identifier: Option<String>,
    file_name: Option<String>,
    data: Option<Bytes>,
}

fn parse_field<T: std::str::FromStr>(name: &str, text: &str) -> Result<T, AppError> {
    text.trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid {} '{}'", name, text)))
}

async fn read_chunk_form(multipart: &mut Multipart) -> Result<ChunkForm, AppError> {
    let mut form = ChunkForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "chunkData" {
            form.data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?,
            );
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        match name.as_str() {
            "flowChunkNumber" => form.chunk_number = Some(parse_field(&name, &text)?),
            "flowTotalChunks" => form.total_chunks = Some(parse_field(&name, &text)?),
            "flowChunkSize" => form.chunk_size = Some(parse_field(&name, &text)?),
            "flowTotalSize" => form.total_size = Some(parse_field(&name, &text)?),
            "flowIdentifier" => form.identifier = Some(text),
            "flowFileName" => form.file_name = Some(text),
            // Informational only; the session already pins these
            "flowRelativePath" | "projectID" | "directoryID" | "fileID" => {}
            other => tracing::debug!("Ignoring unknown chunk field {}", other),
        }
    }

    Ok(form)
}

#[utoipa::path(
    post,
    path = "/upload/chunk",
    request_body(content = String, description = "Multipart form: flowChunkNumber, flowTotalChunks, flowChunkSize, flowTotalSize, flowIdentifier, flowFileName, flowRelativePath, projectID, directoryID, fileID, chunkData", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Chunk accepted", body = UploadChunkResponse),
        (status = 400, description = "Invalid chunk"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No access to upload"),
        (status = 404, description = "Upload not found")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Json<UploadChunkResponse>, AppError> {
    let form = match read_chunk_form(&mut multipart).await {
        Ok(form) => form,
        Err(e) => {
            // Drain the body so the client sees the error instead of a reset
            tracing::warn!("Chunk rejected early: {}. Consuming remaining stream...", e);
            while let Ok(Some(mut field)) = multipart.next_field().await {
                while let Ok(Some(_)) = field.chunk().await {}
            }
            return Err(e);
        }
    };

    let missing = |field: &str| AppError::BadRequest(format!("Missing {}", field));
    let session_id = form
        .identifier
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| missing("flowIdentifier"))?;
    let data = form.data.ok_or_else(|| missing("chunkData"))?;

    tracing::debug!(
        "Chunk {:?}/{:?} for upload {} ({})",
        form.chunk_number,
        form.total_chunks,
        session_id,
        form.file_name.as_deref().unwrap_or("?")
    );

    let outcome = state
        .upload_service
        .accept_chunk(ChunkRequest {
            session_id: session_id.trim().to_string(),
            caller: claims.sub,
            chunk_number: form.chunk_number.ok_or_else(|| missing("flowChunkNumber"))?,
            total_chunks: form.total_chunks.ok_or_else(|| missing("flowTotalChunks"))?,
            chunk_size: form.chunk_size.unwrap_or(data.len() as i64),
            total_size: form.total_size.ok_or_else(|| missing("flowTotalSize"))?,
            data,
        })
        .await?;

    Ok(Json(UploadChunkResponse {
        file_id: outcome.file_id,
        done: outcome.done,
    }))
}

#[utoipa::path(
    delete,
    path = "/upload/{id}",
    params(
        ("id" = String, Path, description = "Upload request ID")
    ),
    responses(
        (status = 204, description = "Upload deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the owner of the upload or project"),
        (status = 404, description = "Upload not found")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn delete_upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.upload_service.delete_session(&id, &claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/upload/{project}",
    params(
        ("project" = String, Path, description = "Project ID")
    ),
    responses(
        (status = 200, description = "Live uploads in the project", body = Vec<UploadEntry>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No access to project"),
        (status = 404, description = "Project not found")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn list_project_uploads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<UploadEntry>>, AppError> {
    let sessions = state
        .upload_service
        .list_sessions(&project_id, &claims.sub)
        .await?;

    Ok(Json(sessions.into_iter().map(UploadEntry::from).collect()))
}
