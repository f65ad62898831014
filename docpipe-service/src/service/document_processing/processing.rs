//! Extraction workflow: blob fetch, dispatch by file type, persistence.

use metrics::counter;
use tracing::{debug, info, warn};

use crate::analyzer::Metadata;
use crate::db::{Document, FileType};
use crate::error::{DatabaseError, ProcessingError, ServiceError, ServiceResult};
use crate::rasterizer::PAGE_MIME_TYPE;
use crate::service::DocumentService;

/// What a workflow run extracted from a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub content: String,
    pub summary: String,
    /// Only produced by the image path
    pub metadata: Option<Metadata>,
}

impl DocumentService {
    /// Extract and persist content for a document.
    ///
    /// Leaves the status untouched; the caller settles `processed` or `failed`.
    pub(crate) async fn run_extraction(&self, document: &Document) -> ServiceResult<ExtractedContent> {
        let doc_id = &document.id;

        let file_type = FileType::from_tag(&document.file_type).ok_or_else(|| {
            ProcessingError::UnsupportedFileType {
                file_type: document.file_type.clone(),
            }
        })?;

        let data = self.blobs.get(&document.file_path).await?;
        debug!(doc_id = %doc_id, file_type = file_type.as_str(), size = data.len(), "Fetched document blob");

        let extracted = if file_type.is_image() {
            self.extract_image(doc_id, &data, file_type).await?
        } else {
            self.extract_pdf(doc_id, &data).await?
        };

        self.persist_extraction(doc_id, &extracted)?;

        info!(
            doc_id = %doc_id,
            content_len = extracted.content.len(),
            "Document content extracted"
        );

        Ok(extracted)
    }

    /// One analyzer call with the document's own MIME type
    async fn extract_image(
        &self,
        doc_id: &str,
        data: &[u8],
        file_type: FileType,
    ) -> ServiceResult<ExtractedContent> {
        debug!(doc_id = %doc_id, "Analyzing image");
        let analysis = self.analyzer.analyze(data, file_type.mime_type()).await?;

        Ok(ExtractedContent {
            content: analysis.extracted_text,
            summary: analysis.summary,
            metadata: Some(analysis.metadata),
        })
    }

    /// Rasterize, then extract text page by page.
    ///
    /// A page that cannot be read or analyzed is skipped. The remaining
    /// non-empty page texts are joined with a blank line and serve as both
    /// content and summary.
    async fn extract_pdf(&self, doc_id: &str, data: &[u8]) -> ServiceResult<ExtractedContent> {
        let pages = self.rasterizer.rasterize(data).await?;
        if pages.is_empty() {
            warn!(doc_id = %doc_id, "Rasterizer produced no pages");
        } else {
            info!(doc_id = %doc_id, pages = pages.len(), "Extracting text from PDF pages");
        }

        let mut texts = Vec::with_capacity(pages.len());

        for (index, page_path) in pages.pages().iter().enumerate() {
            let page = index + 1;

            let image = match tokio::fs::read(page_path).await {
                Ok(image) => image,
                Err(e) => {
                    warn!(doc_id = %doc_id, page, error = %e, "Failed to read page image, skipping");
                    counter!("docpipe_pdf_pages_skipped_total").increment(1);
                    continue;
                }
            };

            match self.analyzer.extract_text(&image, PAGE_MIME_TYPE).await {
                Ok(text) if !text.is_empty() => texts.push(text),
                Ok(_) => debug!(doc_id = %doc_id, page, "Page has no text"),
                Err(e) => {
                    warn!(doc_id = %doc_id, page, error = %e, "Page analysis failed, skipping");
                    counter!("docpipe_pdf_pages_skipped_total").increment(1);
                }
            }
        }

        // Removes the page images
        drop(pages);

        let text = texts.join("\n\n");
        Ok(ExtractedContent {
            content: text.clone(),
            summary: text,
            metadata: None,
        })
    }

    /// Write content, then summary, then metadata. A record that disappears
    /// midway (deleted during processing) aborts the run.
    fn persist_extraction(&self, doc_id: &str, extracted: &ExtractedContent) -> ServiceResult<()> {
        let not_found = || ServiceError::DocumentNotFound {
            document_id: doc_id.to_string(),
        };

        if !self.db.update_document_content(doc_id, &extracted.content)? {
            return Err(not_found());
        }
        if !self.db.update_document_summary(doc_id, &extracted.summary)? {
            return Err(not_found());
        }
        if let Some(metadata) = &extracted.metadata {
            let metadata_json =
                serde_json::to_string(metadata).map_err(DatabaseError::Serialization)?;
            if !self.db.update_document_metadata(doc_id, &metadata_json)? {
                return Err(not_found());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::analyzer::RAW_TEXT_KEY;
    use crate::db::{Document, DocumentStatus, FileType};
    use crate::error::{AnalyzerError, ProcessingError, ServiceError, StorageError};
    use crate::service::test_support::{Harness, Reply, ScriptedAnalyzer, ScriptedRasterizer};
    use crate::storage::BlobStore;

    async fn stored_document(harness: &Harness, id: &str, file_type: FileType, data: &[u8]) -> Document {
        let path = format!("documents/{}.{}", id, file_type.as_str());
        harness
            .blobs
            .put(&path, data, file_type.mime_type())
            .await
            .unwrap();
        let doc = Document::new_upload(id, "user-1", &format!("{}.bin", id), file_type, &path);
        assert!(harness.service.db.insert_document(&doc).unwrap());
        doc
    }

    fn completion(json: &str) -> Reply {
        Reply::Completion(json.to_string())
    }

    #[tokio::test]
    async fn test_image_path_persists_all_fields() {
        let analyzer = ScriptedAnalyzer::new(completion(
            r#"{"summary":"A receipt","metadata":{"category":"receipt","raw_text_content":"TOTAL 9.99"}}"#,
        ));
        let harness = Harness::new(analyzer, ScriptedRasterizer::pages(&[]));
        let doc = stored_document(&harness, "img-1", FileType::Jpg, b"jpeg-bytes").await;

        let extracted = harness.service.run_extraction(&doc).await.unwrap();
        assert_eq!(extracted.content, "TOTAL 9.99");
        assert_eq!(extracted.summary, "A receipt");

        let calls = harness.analyzer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, b"jpeg-bytes");
        assert_eq!(calls[0].1, "image/jpeg");

        let stored = harness.service.db.get_document("img-1").unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("TOTAL 9.99"));
        assert_eq!(stored.summary.as_deref(), Some("A receipt"));
        let metadata = stored.metadata.unwrap();
        assert_eq!(metadata["category"], "receipt");
        assert_eq!(metadata[RAW_TEXT_KEY], "TOTAL 9.99");
    }

    #[tokio::test]
    async fn test_pdf_path_skips_failed_pages() {
        let analyzer = ScriptedAnalyzer::new(Reply::Status(500))
            .reply(b"page-1", completion(r#"{"summary":"first","metadata":{"raw_text_content":"A"}}"#))
            .reply(b"page-2", Reply::Status(503))
            .reply(b"page-3", completion(r#"{"summary":"C"}"#));
        let rasterizer = ScriptedRasterizer::pages(&[b"page-1", b"page-2", b"page-3"]);
        let harness = Harness::new(analyzer, rasterizer);
        let doc = stored_document(&harness, "pdf-1", FileType::Pdf, b"%PDF-1.7").await;

        let extracted = harness.service.run_extraction(&doc).await.unwrap();
        assert_eq!(extracted.content, "A\n\nC");
        assert_eq!(extracted.summary, "A\n\nC");
        assert_eq!(extracted.metadata, None);

        let calls = harness.analyzer.calls();
        let pages: Vec<_> = calls.iter().map(|(image, _)| image.clone()).collect();
        assert_eq!(
            pages,
            vec![b"page-1".to_vec(), b"page-2".to_vec(), b"page-3".to_vec()]
        );
        assert!(calls.iter().all(|(_, mime)| mime == "image/png"));

        let stored = harness.service.db.get_document("pdf-1").unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("A\n\nC"));
        assert_eq!(stored.summary.as_deref(), Some("A\n\nC"));
        assert!(stored.metadata.is_none());

        // Page images are removed once extraction finishes
        let dirs = harness.rasterizer.dirs();
        assert_eq!(dirs.len(), 1);
        assert!(!dirs[0].exists());
    }

    #[tokio::test]
    async fn test_pdf_with_no_readable_pages_is_empty() {
        let analyzer = ScriptedAnalyzer::new(Reply::Status(500));
        let rasterizer = ScriptedRasterizer::pages(&[b"page-1"]);
        let harness = Harness::new(analyzer, rasterizer);
        let doc = stored_document(&harness, "pdf-2", FileType::Pdf, b"%PDF").await;

        let extracted = harness.service.run_extraction(&doc).await.unwrap();
        assert_eq!(extracted.content, "");
    }

    #[tokio::test]
    async fn test_rasterizer_failure_fails_run() {
        let harness = Harness::new(
            ScriptedAnalyzer::new(completion(r#"{"summary":"x"}"#)),
            ScriptedRasterizer::failing(),
        );
        let doc = stored_document(&harness, "pdf-3", FileType::Pdf, b"%PDF").await;

        let err = harness.service.run_extraction(&doc).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Processing(ProcessingError::Rasterization { .. })
        ));
    }

    #[tokio::test]
    async fn test_image_analyzer_failure_fails_run() {
        let harness = Harness::new(
            ScriptedAnalyzer::new(Reply::Status(502)),
            ScriptedRasterizer::pages(&[]),
        );
        let doc = stored_document(&harness, "img-2", FileType::Png, b"png").await;

        let err = harness.service.run_extraction(&doc).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Analyzer(AnalyzerError::Status { status: 502, .. })
        ));

        let stored = harness.service.db.get_document("img-2").unwrap().unwrap();
        assert!(stored.content.is_none());
    }

    #[tokio::test]
    async fn test_unknown_file_type_is_rejected() {
        let harness = Harness::new(
            ScriptedAnalyzer::new(completion(r#"{"summary":"x"}"#)),
            ScriptedRasterizer::pages(&[]),
        );
        let mut doc = stored_document(&harness, "doc-1", FileType::Png, b"png").await;
        doc.file_type = "docx".to_string();

        let err = harness.service.run_extraction(&doc).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Processing(ProcessingError::UnsupportedFileType { .. })
        ));
        assert!(harness.analyzer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_blob_fails_run() {
        let harness = Harness::new(
            ScriptedAnalyzer::new(completion(r#"{"summary":"x"}"#)),
            ScriptedRasterizer::pages(&[]),
        );
        let doc = Document::new_upload("ghost", "user-1", "ghost.png", FileType::Png, "documents/ghost.png");
        harness.service.db.insert_document(&doc).unwrap();

        let err = harness.service.run_extraction(&doc).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_failed_summary_write_keeps_earlier_fields() {
        let harness = Harness::new(
            ScriptedAnalyzer::new(completion(
                r#"{"summary":"A receipt","metadata":{"raw_text_content":"TOTAL 9.99"}}"#,
            )),
            ScriptedRasterizer::pages(&[]),
        );
        let doc = stored_document(&harness, "img-3", FileType::Png, b"png").await;
        harness
            .service
            .db
            .execute_batch(
                "CREATE TRIGGER reject_summary BEFORE UPDATE OF summary ON documents \
                 BEGIN SELECT RAISE(ABORT, 'summary rejected'); END;",
            )
            .unwrap();

        let err = harness.service.run_extraction(&doc).await.unwrap_err();
        assert!(matches!(err, ServiceError::Database(_)));

        // Content was written first and is not rolled back
        let stored = harness.service.db.get_document("img-3").unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("TOTAL 9.99"));
        assert!(stored.summary.is_none());
        assert!(stored.metadata.is_none());

        harness.service.start_processing("img-3").unwrap();
        harness.settle().await;
        assert_eq!(
            harness.service.get_status("img-3").unwrap(),
            DocumentStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_deleted_record_aborts_persistence() {
        let harness = Harness::new(
            ScriptedAnalyzer::new(completion(r#"{"summary":"x"}"#)),
            ScriptedRasterizer::pages(&[]),
        );
        let doc = stored_document(&harness, "gone", FileType::Png, b"png").await;
        harness.service.db.delete_document("gone").unwrap();

        let err = harness.service.run_extraction(&doc).await.unwrap_err();
        assert!(matches!(err, ServiceError::DocumentNotFound { .. }));
    }
}
