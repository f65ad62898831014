//! Document lifecycle: upload, processing state machine, extraction workflow.
//!
//! - `upload`: store an uploaded file and start processing it
//! - `lifecycle`: the `pending -> processing -> processed | failed` guard
//! - `workers`: detached task boundary that settles the final status
//! - `processing`: the extraction workflow (image and PDF paths)
//! - `crud`: read and delete operations

mod crud;
mod lifecycle;
mod processing;
mod upload;
mod workers;

pub use upload::UploadRequest;
