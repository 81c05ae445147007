//! Document routes. Payload and metadata handling is the same
//! [`DocumentManager`] the client uses, run on blocking threads against the
//! remote store's connection.

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use coursync_shared::protocol::{DocumentInfo, QuotaInfo};
use coursync_shared::types::DocumentType;
use coursync_store::{documents, quota, DocumentManager, FilePayload, UploadRequest};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::db::Table;
use crate::error::ServerError;

/// Run `f` on a blocking thread with the store connection and the manager.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ServerError>
where
    F: FnOnce(&Connection, &DocumentManager) -> Result<T, ServerError> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    let manager = state.documents.clone();
    tokio::task::spawn_blocking(move || db.with_conn(|conn| f(conn, &manager)))
        .await
        .map_err(|e| ServerError::Internal(format!("document task failed: {e}")))?
}

/// Remove every document of the given assignments, rows first and payload
/// files after the commit. Returns how many files were removed.
pub(crate) async fn purge_for_assignments(
    state: &AppState,
    assignment_ids: Vec<i64>,
) -> Result<usize, ServerError> {
    if assignment_ids.is_empty() {
        return Ok(0);
    }
    blocking(state, move |conn, manager| {
        let tx = conn.unchecked_transaction()?;
        let owners = documents::owners_of(&tx, &assignment_ids)?;
        let paths = documents::delete_for_assignments(&tx, &assignment_ids)?;
        for owner in owners {
            quota::recompute(&tx, owner)?;
        }
        tx.commit()?;
        Ok(manager.remove_files(paths.iter().map(String::as_str)))
    })
    .await
}

#[derive(Default)]
struct UploadForm {
    assignment_id: Option<i64>,
    doc_type: Option<DocumentType>,
    file: Option<(String, Bytes)>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ServerError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {e}")))?;
                form.file = Some((file_name, data));
            }
            "assignment_id" => {
                let text = field_text(field).await?;
                form.assignment_id = Some(text.trim().parse().map_err(|_| {
                    ServerError::BadRequest(format!("invalid assignment_id: {text}"))
                })?);
            }
            "type" => {
                form.doc_type = Some(field_text(field).await?.trim().parse()?);
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ServerError> {
    field
        .text()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {e}")))
}

fn missing(name: &str) -> ServerError {
    ServerError::BadRequest(format!("Missing '{name}' field in multipart form"))
}

pub async fn upload(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentInfo>), ServerError> {
    let form = read_form(multipart).await?;
    let assignment_id = form.assignment_id.ok_or_else(|| missing("assignment_id"))?;
    let doc_type = form.doc_type.ok_or_else(|| missing("type"))?;
    let (file_name, bytes) = form.file.ok_or_else(|| missing("file"))?;

    state.db.owned(Table::Assignments, user_id, assignment_id)?;

    let doc = blocking(&state, move |conn, manager| {
        let req = UploadRequest {
            user_id,
            assignment_id,
            doc_type,
            file: FilePayload {
                file_name: &file_name,
                bytes: &bytes,
            },
        };
        Ok(manager.upload(conn, &req)?)
    })
    .await?;

    info!(%user_id, id = doc.id, size = doc.file_size, "document uploaded via API");
    Ok((StatusCode::CREATED, Json(doc.info())))
}

pub async fn upload_version(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(parent_id): Path<i64>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentInfo>), ServerError> {
    let form = read_form(multipart).await?;
    let (file_name, bytes) = form.file.ok_or_else(|| missing("file"))?;

    let doc = blocking(&state, move |conn, manager| {
        let file = FilePayload {
            file_name: &file_name,
            bytes: &bytes,
        };
        Ok(manager.new_version(conn, user_id, parent_id, &file)?)
    })
    .await?;

    info!(%user_id, id = doc.id, version = doc.version, "document version uploaded");
    Ok((StatusCode::CREATED, Json(doc.info())))
}

pub async fn download(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ServerError> {
    let (doc, data) = blocking(&state, move |conn, manager| {
        let doc = documents::get(conn, id)?;
        if doc.user_id != user_id {
            return Err(ServerError::NotFound(format!("document {id}")));
        }
        let data = manager.read(&doc)?;
        Ok((doc, data))
    })
    .await?;

    let disposition = format!("attachment; filename=\"{}\"", header_safe(&doc.file_name));
    Ok((
        [
            (header::CONTENT_TYPE, doc.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}

/// File names travel in a header; keep them printable ASCII without quotes.
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let removed = blocking(&state, move |conn, manager| {
        Ok(manager.delete(conn, user_id, id)?)
    })
    .await?;
    Ok(Json(serde_json::json!({ "deleted": removed.len() })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub doc_type: Option<DocumentType>,
}

/// Latest version of every chain attached to an assignment.
pub async fn list_for_assignment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(assignment_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DocumentInfo>>, ServerError> {
    state.db.owned(Table::Assignments, user_id, assignment_id)?;

    let docs = blocking(&state, move |conn, _| {
        Ok(documents::list_latest(conn, assignment_id, query.doc_type)?)
    })
    .await?;
    Ok(Json(docs.iter().map(|d| d.info()).collect()))
}

pub async fn storage(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<QuotaInfo>, ServerError> {
    let info = blocking(&state, move |conn, manager| Ok(manager.quota(conn, user_id)?)).await?;
    Ok(Json(info))
}
