//! Upload entry point: store the file, create or reset the record, start.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info};

use crate::db::{Document, DocumentStatus, FileType};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::service::DocumentService;
use crate::storage::upload_path;

/// A file received for processing
#[derive(Debug)]
pub struct UploadRequest<'a> {
    pub document_id: &'a str,
    pub owner_id: &'a str,
    pub filename: &'a str,
    pub content_type: &'a str,
    pub content: &'a [u8],
}

impl DocumentService {
    /// Store an upload and start processing it.
    ///
    /// The content type is validated before anything is written. An existing
    /// record keeps its id and content but is reset to `pending` with the new
    /// file before processing restarts.
    pub async fn start_processing_with_upload(
        self: &Arc<Self>,
        upload: UploadRequest<'_>,
    ) -> ServiceResult<Document> {
        let doc_id = upload.document_id;

        if doc_id.trim().is_empty() || upload.owner_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "documentId and userId are required".to_string(),
            });
        }

        let existing = self.db.get_document(doc_id)?;
        if existing
            .as_ref()
            .is_some_and(|doc| doc.status == DocumentStatus::Processing)
        {
            return Err(ServiceError::AlreadyProcessing {
                document_id: doc_id.to_string(),
            });
        }

        let file_type = FileType::from_content_type(upload.content_type).ok_or_else(|| {
            ServiceError::UnsupportedMediaType {
                content_type: upload.content_type.to_string(),
            }
        })?;

        self.check_upload_size(upload.content)?;

        let path = upload_path(upload.filename);
        self.blobs
            .put(&path, upload.content, upload.content_type)
            .await?;
        debug!(doc_id = %doc_id, path = %path, size = upload.content.len(), "Upload stored");

        let document = Document::new_upload(doc_id, upload.owner_id, upload.filename, file_type, &path);
        let stored = match existing {
            Some(_) => self.db.replace_document_upload(&document)?,
            None => false,
        };
        // Either a concurrent request created the record first, or the record
        // moved to `processing` while the blob was being written
        if !stored && !self.db.insert_document(&document)? {
            return Err(ServiceError::AlreadyProcessing {
                document_id: doc_id.to_string(),
            });
        }

        counter!("docpipe_uploads_total").increment(1);
        info!(
            doc_id = %doc_id,
            filename = %upload.filename,
            file_type = file_type.as_str(),
            replaced = stored,
            "Document uploaded"
        );

        self.start_processing(doc_id)
    }

    fn check_upload_size(&self, content: &[u8]) -> ServiceResult<()> {
        if content.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Uploaded file is empty".to_string(),
            });
        }

        let max = self.config.limits.max_document_size_bytes;
        let size = content.len() as u64;
        if size > max {
            return Err(ProcessingError::FileTooLarge { size, max }.into());
        }

        Ok(())
    }
}
