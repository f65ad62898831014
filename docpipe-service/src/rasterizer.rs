//! PDF to page-image conversion through an external program.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::config::RasterizerConfig;
use crate::error::ProcessingError;

/// MIME type of every rasterized page
pub const PAGE_MIME_TYPE: &str = "image/png";

const PAGE_PREFIX: &str = "page_";
const PAGE_SUFFIX: &str = ".png";

/// Page images of one PDF, in page order.
///
/// The images live in a private temporary directory that is removed when
/// this value is dropped.
#[derive(Debug)]
pub struct RasterizedPages {
    dir: TempDir,
    pages: Vec<PathBuf>,
}

impl RasterizedPages {
    /// Collect every `page_<n>.png` in `dir`, ordered by `n`
    pub fn collect(dir: TempDir) -> std::io::Result<Self> {
        let pages = page_files(dir.path())?;
        Ok(Self { dir, pages })
    }

    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Turns a PDF into one image per page
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn rasterize(&self, pdf: &[u8]) -> Result<RasterizedPages, ProcessingError>;
}

/// Rasterizer backed by an ImageMagick-compatible command line
pub struct CommandRasterizer {
    config: RasterizerConfig,
}

impl CommandRasterizer {
    pub fn new(config: RasterizerConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, input: &Path, output_pattern: &Path) -> Command {
        let mut command = Command::new(&self.config.program);
        command.args(&self.config.args);
        if let Some(density) = self.config.density {
            command.arg("-density").arg(density.to_string());
        }
        command
            .arg(input)
            .arg(output_pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl PageRasterizer for CommandRasterizer {
    async fn rasterize(&self, pdf: &[u8]) -> Result<RasterizedPages, ProcessingError> {
        let dir = tempfile::Builder::new()
            .prefix("docpipe-pdf-")
            .tempdir()
            .map_err(ProcessingError::Io)?;

        let input = dir.path().join("input.pdf");
        tokio::fs::write(&input, pdf)
            .await
            .map_err(ProcessingError::Io)?;

        let output_pattern = dir.path().join(format!("{}%03d{}", PAGE_PREFIX, PAGE_SUFFIX));
        let mut command = self.build_command(&input, &output_pattern);

        debug!(program = %self.config.program, size = pdf.len(), "Rasterizing PDF");

        let output = match tokio::time::timeout(self.config.timeout(), command.output()).await {
            Ok(result) => result.map_err(|e| ProcessingError::Rasterization {
                message: format!("failed to run {}: {}", self.config.program, e),
            })?,
            Err(_) => {
                return Err(ProcessingError::RasterizerTimeout {
                    secs: self.config.timeout_secs,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProcessingError::Rasterization {
                message: format!("{} exited with {}: {}", self.config.program, output.status, stderr.trim()),
            });
        }

        let pages = RasterizedPages::collect(dir).map_err(ProcessingError::Io)?;
        debug!(pages = pages.len(), dir = %pages.dir().display(), "PDF rasterized");

        Ok(pages)
    }
}

/// Page number encoded in a `page_<n>.png` file name
fn page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(PAGE_PREFIX)?
        .strip_suffix(PAGE_SUFFIX)?
        .parse()
        .ok()
}

fn page_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut numbered = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(number) = name.to_str().and_then(page_number) {
            numbered.push((number, entry.path()));
        }
    }

    numbered.sort_by_key(|(number, _)| *number);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}
