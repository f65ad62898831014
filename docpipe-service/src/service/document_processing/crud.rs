//! Document read and delete operations.

use tracing::info;

use crate::db::{Document, DocumentStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::service::DocumentService;

pub const DEFAULT_LIST_LIMIT: u32 = 500;

impl DocumentService {
    /// Get a document record
    pub fn get_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    /// Current lifecycle state of a document
    pub fn get_status(&self, document_id: &str) -> ServiceResult<DocumentStatus> {
        self.get_document(document_id).map(|doc| doc.status)
    }

    /// List documents, newest first.
    ///
    /// Defaults to `processed` documents, 500 per page.
    pub fn list_documents(
        &self,
        status: Option<DocumentStatus>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> ServiceResult<Vec<Document>> {
        self.db.list_documents(
            Some(status.unwrap_or(DocumentStatus::Processed)),
            limit.unwrap_or(DEFAULT_LIST_LIMIT),
            offset.unwrap_or(0),
        )
    }

    /// Hard-delete a document record. The stored blob is left in place.
    pub fn delete_document(&self, document_id: &str) -> ServiceResult<()> {
        if !self.db.delete_document(document_id)? {
            return Err(ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            });
        }

        info!(doc_id = %document_id, "Document deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Document, DocumentStatus, FileType};
    use crate::error::ServiceError;
    use crate::service::test_support::{Harness, Reply, ScriptedAnalyzer, ScriptedRasterizer};

    fn harness() -> Harness {
        Harness::new(
            ScriptedAnalyzer::new(Reply::Status(500)),
            ScriptedRasterizer::pages(&[]),
        )
    }

    fn insert(harness: &Harness, id: &str, status: DocumentStatus) {
        let doc = Document::new_upload(id, "user-1", "a.png", FileType::Png, "documents/a.png");
        harness.service.db.insert_document(&doc).unwrap();
        harness.service.db.update_document_status(id, status).unwrap();
    }

    #[test]
    fn test_delete_then_status_is_not_found() {
        let harness = harness();
        insert(&harness, "doc-1", DocumentStatus::Processed);

        harness.service.delete_document("doc-1").unwrap();

        assert!(matches!(
            harness.service.get_status("doc-1"),
            Err(ServiceError::DocumentNotFound { .. })
        ));
        assert!(matches!(
            harness.service.delete_document("doc-1"),
            Err(ServiceError::DocumentNotFound { .. })
        ));
    }

    #[test]
    fn test_list_defaults_to_processed() {
        let harness = harness();
        insert(&harness, "done", DocumentStatus::Processed);
        insert(&harness, "broken", DocumentStatus::Failed);
        insert(&harness, "waiting", DocumentStatus::Pending);

        let processed = harness.service.list_documents(None, None, None).unwrap();
        let ids: Vec<_> = processed.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["done"]);

        let failed = harness
            .service
            .list_documents(Some(DocumentStatus::Failed), Some(10), Some(0))
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "broken");
    }
}
