use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Document is already being processed: {document_id}")]
    AlreadyProcessing { document_id: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unsupported content type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    #[error("Analyzer request failed")]
    Analyzer(#[from] AnalyzerError),

    #[error("Document processing failed")]
    Processing(#[from] ProcessingError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Blob storage error")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Errors from the vision completion endpoint
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Connection failed to analyzer at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Analyzer returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from analyzer")]
    InvalidResponse {
        #[source]
        source: reqwest::Error,
    },

    #[error("Analyzer returned no completion choices")]
    EmptyResponse,
}

/// Document processing errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Unsupported file type: {file_type}")]
    UnsupportedFileType { file_type: String },

    #[error("PDF rasterization failed: {message}")]
    Rasterization { message: String },

    #[error("PDF rasterization timed out after {secs}s")]
    RasterizerTimeout { secs: u64 },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("IO error")]
    Io(#[source] std::io::Error),
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Failed to create database directory {path}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Blob store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid blob path: {path}")]
    InvalidPath { path: String },

    #[error("Blob not found: {path}")]
    NotFound { path: String },

    #[error("Blob I/O failed for {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::AlreadyProcessing { .. } => StatusCode::CONFLICT,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServiceError::Analyzer(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::Processing(ProcessingError::UnsupportedFileType { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::AlreadyProcessing { .. } => "already_processing",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::UnsupportedMediaType { .. } => "unsupported_media_type",
            ServiceError::Analyzer(AnalyzerError::Connection { .. }) => "analyzer_connection",
            ServiceError::Analyzer(AnalyzerError::Status { .. }) => "analyzer_status",
            ServiceError::Analyzer(AnalyzerError::InvalidResponse { .. }) => {
                "analyzer_invalid_response"
            }
            ServiceError::Analyzer(AnalyzerError::EmptyResponse) => "analyzer_empty_response",
            ServiceError::Processing(ProcessingError::UnsupportedFileType { .. }) => {
                "unsupported_file_type"
            }
            ServiceError::Processing(ProcessingError::Rasterization { .. })
            | ServiceError::Processing(ProcessingError::RasterizerTimeout { .. }) => {
                "rasterization_error"
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => "file_too_large",
            ServiceError::Processing(ProcessingError::Io(_)) => "io_error",
            ServiceError::Database(_) => "database_error",
            ServiceError::Storage(_) => "storage_error",
            ServiceError::Config { .. } => "config_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        if status.is_server_error() {
            tracing::error!(error = %format_error_chain_ref(&self), "Request failed");
        }

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error together with its `source()` chain as `outer: inner: root`.
pub fn format_error_chain_ref(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
