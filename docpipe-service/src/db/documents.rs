//! Document CRUD operations.
//!
//! Every mutation is an independent statement; callers decide the order.

use chrono::{SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{Document, DocumentStatus};
use crate::error::{DatabaseError, ServiceResult};

const DOCUMENT_COLUMNS: &str = "id, owner_id, filename, file_type, file_path, content, summary, \
     metadata, status, created_at, updated_at";

/// Fixed-width RFC 3339 so `ORDER BY created_at` sorts chronologically
fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    /// Insert a new document.
    ///
    /// Returns `false` without touching the existing row when the id is taken.
    pub fn insert_document(&self, doc: &Document) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let metadata_json = doc
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(DatabaseError::Serialization)?;

        let rows = conn
            .execute(
                r#"
                INSERT OR IGNORE INTO documents (id, owner_id, filename, file_type, file_path, content, summary, metadata, status, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    doc.id,
                    doc.owner_id,
                    doc.filename,
                    doc.file_type,
                    doc.file_path,
                    doc.content,
                    doc.summary,
                    metadata_json,
                    doc.status.as_str(),
                    doc.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                    doc.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Point an existing document at a newly uploaded file and reset it to `pending`.
    ///
    /// Previously extracted content stays until the next run overwrites it.
    /// A record in `processing` is left alone and `false` is returned.
    pub fn replace_document_upload(&self, doc: &Document) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET owner_id = ?1, filename = ?2, file_type = ?3, file_path = ?4, \
                 status = ?5, updated_at = ?6 WHERE id = ?7 AND status != ?8",
                params![
                    doc.owner_id,
                    doc.filename,
                    doc.file_type,
                    doc.file_path,
                    DocumentStatus::Pending.as_str(),
                    timestamp_now(),
                    doc.id,
                    DocumentStatus::Processing.as_str(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
            params![id],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Update a document's lifecycle status
    pub fn update_document_status(&self, id: &str, status: DocumentStatus) -> ServiceResult<bool> {
        self.update_text_column(id, "status", status.as_str())
    }

    /// Update the extracted text
    pub fn update_document_content(&self, id: &str, content: &str) -> ServiceResult<bool> {
        self.update_text_column(id, "content", content)
    }

    /// Update the short description
    pub fn update_document_summary(&self, id: &str, summary: &str) -> ServiceResult<bool> {
        self.update_text_column(id, "summary", summary)
    }

    /// Update the serialized metadata mapping (a JSON object)
    pub fn update_document_metadata(&self, id: &str, metadata_json: &str) -> ServiceResult<bool> {
        self.update_text_column(id, "metadata", metadata_json)
    }

    fn update_text_column(
        &self,
        id: &str,
        column: &'static str,
        value: &str,
    ) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                &format!(
                    "UPDATE documents SET {} = ?1, updated_at = ?2 WHERE id = ?3",
                    column
                ),
                params![value, timestamp_now(), id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Hard-delete a document
    pub fn delete_document(&self, id: &str) -> ServiceResult<bool> {
        let mut conn = self.conn.lock().unwrap();

        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let rows = tx
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;
        tx.commit().map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// List documents, newest first, optionally restricted to one status
    pub fn list_documents(
        &self,
        status: Option<DocumentStatus>,
        limit: u32,
        offset: u32,
    ) -> ServiceResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM documents WHERE (?1 IS NULL OR status = ?1) \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                DOCUMENT_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(
                params![status.map(|s| s.as_str()), limit, offset],
                Document::from_row,
            )
            .map_err(DatabaseError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(docs)
    }
}
