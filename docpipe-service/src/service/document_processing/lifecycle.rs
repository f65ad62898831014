//! Processing state machine.
//!
//! ```text
//! pending --start--> processing --ok--> processed
//!                         \------err--> failed
//! processed | failed --start--> processing
//! ```
//!
//! A start request against a record already in `processing` is refused.

use std::sync::Arc;

use tracing::info;

use crate::db::{Document, DocumentStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::service::DocumentService;

impl DocumentService {
    /// Move a document to `processing` and run extraction in the background.
    ///
    /// Returns as soon as the status is written; the outcome is observable
    /// through [`DocumentService::get_status`].
    pub fn start_processing(self: &Arc<Self>, document_id: &str) -> ServiceResult<Document> {
        let mut document = self.get_document(document_id)?;

        if document.status == DocumentStatus::Processing {
            return Err(ServiceError::AlreadyProcessing {
                document_id: document_id.to_string(),
            });
        }

        if !self
            .db
            .update_document_status(document_id, DocumentStatus::Processing)?
        {
            return Err(ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            });
        }
        document.status = DocumentStatus::Processing;

        info!(
            doc_id = %document_id,
            file_type = %document.file_type,
            "Document processing started"
        );

        self.spawn_extraction(document.clone());
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Document, DocumentStatus, FileType};
    use crate::error::ServiceError;
    use crate::service::test_support::{Harness, Reply, ScriptedAnalyzer, ScriptedRasterizer};
    use crate::storage::BlobStore;

    async fn harness_with_png(reply: Reply) -> Harness {
        let harness = Harness::new(ScriptedAnalyzer::new(reply), ScriptedRasterizer::pages(&[]));
        harness
            .blobs
            .put("documents/a.png", b"png", "image/png")
            .await
            .unwrap();
        let doc = Document::new_upload("doc-1", "user-1", "a.png", FileType::Png, "documents/a.png");
        harness.service.db.insert_document(&doc).unwrap();
        harness
    }

    #[tokio::test]
    async fn test_second_start_while_processing_is_refused() {
        let harness = harness_with_png(Reply::Completion(r#"{"summary":"ok"}"#.to_string())).await;

        let started = harness.service.start_processing("doc-1").unwrap();
        assert_eq!(started.status, DocumentStatus::Processing);
        assert_eq!(
            harness.service.get_status("doc-1").unwrap(),
            DocumentStatus::Processing
        );

        let err = harness.service.start_processing("doc-1").unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyProcessing { .. }));

        harness.settle().await;
        assert_eq!(
            harness.service.get_status("doc-1").unwrap(),
            DocumentStatus::Processed
        );

        // Finished documents may be processed again
        harness.service.start_processing("doc-1").unwrap();
        harness.settle().await;
        assert_eq!(harness.analyzer.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_run_marks_failed_and_can_restart() {
        let harness = harness_with_png(Reply::Status(500)).await;

        harness.service.start_processing("doc-1").unwrap();
        harness.settle().await;
        assert_eq!(
            harness.service.get_status("doc-1").unwrap(),
            DocumentStatus::Failed
        );

        harness.service.start_processing("doc-1").unwrap();
        harness.settle().await;
        assert_eq!(
            harness.service.get_status("doc-1").unwrap(),
            DocumentStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_panicking_workflow_marks_failed() {
        let harness = harness_with_png(Reply::Panic).await;

        harness.service.start_processing("doc-1").unwrap();
        harness.settle().await;

        assert_eq!(
            harness.service.get_status("doc-1").unwrap(),
            DocumentStatus::Failed
        );
        assert_eq!(harness.service.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let harness = harness_with_png(Reply::Status(500)).await;

        let err = harness.service.start_processing("missing").unwrap_err();
        assert!(matches!(err, ServiceError::DocumentNotFound { .. }));
    }
}
