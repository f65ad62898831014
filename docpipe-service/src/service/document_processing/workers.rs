//! Detached extraction tasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::{counter, gauge};
use tracing::{error, info};

use crate::db::{Document, DocumentStatus};
use crate::error::format_error_chain_ref;
use crate::service::DocumentService;

impl DocumentService {
    /// Run the extraction workflow on the task tracker.
    ///
    /// Every exit path of the task, including a panic, settles the record
    /// in `processed` or `failed`. Nobody awaits the task.
    pub(crate) fn spawn_extraction(self: &Arc<Self>, document: Document) {
        let service = Arc::clone(self);

        self.tasks.spawn(async move {
            gauge!("docpipe_workflows_in_flight").increment(1.0);
            let doc_id = document.id.clone();

            let outcome = AssertUnwindSafe(service.run_extraction(&document))
                .catch_unwind()
                .await;

            let status = match outcome {
                Ok(Ok(extracted)) => {
                    info!(
                        doc_id = %doc_id,
                        content_len = extracted.content.len(),
                        "Document processed"
                    );
                    DocumentStatus::Processed
                }
                Ok(Err(e)) => {
                    error!(doc_id = %doc_id, error = %format_error_chain_ref(&e), "Document processing failed");
                    DocumentStatus::Failed
                }
                Err(_) => {
                    error!(doc_id = %doc_id, "Document processing panicked");
                    DocumentStatus::Failed
                }
            };

            let settled = service.settle_status(&doc_id, status);
            counter!("docpipe_documents_finished_total", "status" => settled.as_str())
                .increment(1);
            gauge!("docpipe_workflows_in_flight").decrement(1.0);
        });
    }

    /// Write the final status, falling back to `failed` if `processed` could
    /// not be stored
    fn settle_status(&self, doc_id: &str, status: DocumentStatus) -> DocumentStatus {
        match self.db.update_document_status(doc_id, status) {
            Ok(true) => status,
            Ok(false) => {
                info!(doc_id = %doc_id, "Document deleted while processing");
                status
            }
            Err(e) => {
                error!(
                    doc_id = %doc_id,
                    status = status.as_str(),
                    error = %format_error_chain_ref(&e),
                    "Failed to store final document status"
                );
                if status != DocumentStatus::Failed {
                    if let Err(e) = self.db.update_document_status(doc_id, DocumentStatus::Failed) {
                        error!(doc_id = %doc_id, error = %e, "Failed to mark document as failed");
                    }
                }
                DocumentStatus::Failed
            }
        }
    }
}
