//! Document and processing endpoints.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{Document, DocumentStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::service::UploadRequest;

use super::AppState;

/// List documents query parameters
#[derive(Deserialize)]
pub struct ListDocumentsParams {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Serialize)]
pub struct ListDocumentsResponse {
    pub documents: Vec<Document>,
    pub total: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub message: &'static str,
    pub document_id: String,
    pub filename: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: DocumentStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: &'static str,
    pub document_id: String,
}

fn invalid_multipart(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::InvalidRequest {
        message: format!("Invalid multipart body: {}", e),
    }
}

/// Upload a file and start processing it
pub async fn upload_and_process_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ServiceResult<Json<ProcessResponse>> {
    let mut document_id: Option<String> = None;
    let mut owner_id: Option<String> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "documentId" => document_id = Some(field.text().await.map_err(invalid_multipart)?),
            "userId" => owner_id = Some(field.text().await.map_err(invalid_multipart)?),
            "file" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(invalid_multipart)?;
                file = Some((filename, content_type, data.to_vec()));
            }
            _ => {}
        }
    }

    let (Some(document_id), Some(owner_id)) = (document_id, owner_id) else {
        return Err(ServiceError::InvalidRequest {
            message: "documentId and userId are required".to_string(),
        });
    };
    let Some((filename, content_type, content)) = file else {
        return Err(ServiceError::InvalidRequest {
            message: "file is required".to_string(),
        });
    };

    let document = state
        .service
        .start_processing_with_upload(UploadRequest {
            document_id: &document_id,
            owner_id: &owner_id,
            filename: &filename,
            content_type: &content_type,
            content: &content,
        })
        .await?;

    Ok(Json(ProcessResponse {
        message: "Document processing started",
        document_id: document.id,
        filename: document.filename,
    }))
}

/// Re-run processing for an existing document
pub async fn process_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<ProcessResponse>> {
    let document = state.service.start_processing(&id)?;

    Ok(Json(ProcessResponse {
        message: "Document processing started",
        document_id: document.id,
        filename: document.filename,
    }))
}

pub async fn process_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<StatusResponse>> {
    let status = state.service.get_status(&id)?;
    Ok(Json(StatusResponse { status }))
}

/// List documents, `processed` ones by default
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDocumentsParams>,
) -> ServiceResult<Json<ListDocumentsResponse>> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            DocumentStatus::from_str(s).ok_or_else(|| ServiceError::InvalidRequest {
                message: format!("Unknown document status: {}", s),
            })
        })
        .transpose()?;

    let documents = state
        .service
        .list_documents(status, params.limit, params.offset)?;

    Ok(Json(ListDocumentsResponse {
        total: documents.len(),
        documents,
    }))
}

pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Document>> {
    Ok(Json(state.service.get_document(&id)?))
}

pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<DeleteResponse>> {
    state.service.delete_document(&id)?;

    Ok(Json(DeleteResponse {
        message: "Document deleted",
        document_id: id,
    }))
}
