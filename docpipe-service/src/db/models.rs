//! Database model structs.
//!
//! This module contains the document record and the enumerations stored with it.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Record exists but no processing attempt has started yet
    Pending,
    /// Extraction workflow is running (or was interrupted by a crash)
    Processing,
    /// Content, summary and metadata have been persisted
    Processed,
    /// The last processing attempt failed; a new attempt may be started
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "processed" => Some(DocumentStatus::Processed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// Supported upload formats.
///
/// The tag (`as_str`) is what gets stored in the `file_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Jpg,
    Png,
    Gif,
    Bmp,
    Webp,
    Tiff,
}

impl FileType {
    /// Map a declared upload content type onto a file-type tag
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "application/pdf" => Some(FileType::Pdf),
            "image/jpeg" | "image/jpg" => Some(FileType::Jpg),
            "image/png" => Some(FileType::Png),
            "image/gif" => Some(FileType::Gif),
            "image/bmp" => Some(FileType::Bmp),
            "image/webp" => Some(FileType::Webp),
            "image/tiff" => Some(FileType::Tiff),
            _ => None,
        }
    }

    /// Parse a stored tag; `jpeg` is accepted as an alias of `jpg`
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileType::Pdf),
            "jpg" | "jpeg" => Some(FileType::Jpg),
            "png" => Some(FileType::Png),
            "gif" => Some(FileType::Gif),
            "bmp" => Some(FileType::Bmp),
            "webp" => Some(FileType::Webp),
            "tiff" => Some(FileType::Tiff),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Jpg => "jpg",
            FileType::Png => "png",
            FileType::Gif => "gif",
            FileType::Bmp => "bmp",
            FileType::Webp => "webp",
            FileType::Tiff => "tiff",
        }
    }

    /// MIME type sent to the analyzer for this format
    pub fn mime_type(&self) -> &'static str {
        match self {
            FileType::Pdf => "application/pdf",
            FileType::Jpg => "image/jpeg",
            FileType::Png => "image/png",
            FileType::Gif => "image/gif",
            FileType::Bmp => "image/bmp",
            FileType::Webp => "image/webp",
            FileType::Tiff => "image/tiff",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, FileType::Pdf)
    }
}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub filename: String,
    /// Stored tag; parsed with [`FileType::from_tag`] when the workflow dispatches
    pub file_type: String,
    /// Blob store key
    pub file_path: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Build a fresh `pending` record for an upload
    pub fn new_upload(
        id: &str,
        owner_id: &str,
        filename: &str,
        file_type: FileType,
        file_path: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            owner_id: Some(owner_id.to_string()),
            filename: filename.to_string(),
            file_type: file_type.as_str().to_string(),
            file_path: file_path.to_string(),
            content: None,
            summary: None,
            metadata: None,
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let metadata_str: Option<String> = row.get(7)?;
        let status_str: String = row.get(8)?;
        let created_at_str: String = row.get(9)?;
        let updated_at_str: String = row.get(10)?;

        let status = DocumentStatus::from_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                rusqlite::types::Type::Text,
                format!("unknown document status: {}", status_str).into(),
            )
        })?;

        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            filename: row.get(2)?,
            file_type: row.get(3)?,
            file_path: row.get(4)?,
            content: row.get(5)?,
            summary: row.get(6)?,
            metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
            status,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
