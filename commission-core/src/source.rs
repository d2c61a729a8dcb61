//! Page sources: where the bytes for a page range come from.

use async_trait::async_trait;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::types::PageRange;

/// Errors raised while reading a document or materializing pages.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The document could not be opened or parsed.
    #[error("failed to load {path}: {message}")]
    Load {
        /// Document path.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },
    /// The requested pages are not in the document.
    #[error("{range} is outside the document ({page_count} pages)")]
    OutOfRange {
        /// Requested range.
        range: PageRange,
        /// Pages in the document.
        page_count: usize,
    },
    /// Writing or reading the chunk file failed.
    #[error("chunk file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// lopdf failed while splitting pages.
    #[error("PDF processing failed: {0}")]
    Pdf(String),
}

/// Bytes for one page range. A backing temporary file, if any, is removed on drop.
#[derive(Debug)]
pub struct ChunkFile {
    range: PageRange,
    bytes: Vec<u8>,
    file: Option<NamedTempFile>,
}

impl ChunkFile {
    /// Wraps bytes that need no file on disk.
    #[must_use]
    pub const fn in_memory(range: PageRange, bytes: Vec<u8>) -> Self {
        Self {
            range,
            bytes,
            file: None,
        }
    }

    /// Takes ownership of a written temporary file and loads its contents.
    pub fn from_temp(range: PageRange, file: NamedTempFile) -> std::io::Result<Self> {
        let bytes = std::fs::read(file.path())?;
        Ok(Self {
            range,
            bytes,
            file: Some(file),
        })
    }

    /// Pages contained in this chunk.
    #[must_use]
    pub const fn range(&self) -> PageRange {
        self.range
    }

    /// Document bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Path of the backing file, when there is one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(NamedTempFile::path)
    }
}

/// A paged document the controller can slice into chunks.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Produces a standalone document holding exactly `range`.
    async fn materialize(&self, range: PageRange) -> Result<ChunkFile, SourceError>;
}

/// A PDF on disk, split per chunk with lopdf.
#[derive(Debug, Clone)]
pub struct PdfPageSource {
    path: PathBuf,
    document: Arc<lopdf::Document>,
    page_count: usize,
}

impl PdfPageSource {
    /// Opens and parses the PDF at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let load_path = path.clone();
        let document = tokio::task::spawn_blocking(move || lopdf::Document::load(&load_path))
            .await
            .map_err(|e| SourceError::Pdf(e.to_string()))?
            .map_err(|e| SourceError::Load {
                path: path.clone(),
                message: e.to_string(),
            })?;
        let page_count = document.get_pages().len();
        tracing::debug!(
            event = "pdf_opened",
            path = %path.display(),
            page_count,
            "pdf_opened"
        );
        Ok(Self {
            path,
            document: Arc::new(document),
            page_count,
        })
    }

    /// Path the document was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PageSource for PdfPageSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn materialize(&self, range: PageRange) -> Result<ChunkFile, SourceError> {
        if range.is_empty() || range.end > self.page_count {
            return Err(SourceError::OutOfRange {
                range,
                page_count: self.page_count,
            });
        }
        let document = Arc::clone(&self.document);
        let page_count = self.page_count;
        tokio::task::spawn_blocking(move || write_page_subset(&document, page_count, range))
            .await
            .map_err(|e| SourceError::Pdf(e.to_string()))?
    }
}

fn write_page_subset(
    document: &lopdf::Document,
    page_count: usize,
    range: PageRange,
) -> Result<ChunkFile, SourceError> {
    let mut subset = document.clone();
    // lopdf page numbers are one-based.
    let drop: Vec<u32> = (0..page_count)
        .filter(|p| !range.contains(*p))
        .map(|p| (p + 1) as u32)
        .collect();
    subset.delete_pages(&drop);
    subset.prune_objects();

    let mut file = tempfile::Builder::new()
        .prefix("chunk-")
        .suffix(".pdf")
        .tempfile()?;
    subset
        .save_to(&mut file)
        .map_err(|e| SourceError::Pdf(e.to_string()))?;
    file.flush()?;
    Ok(ChunkFile::from_temp(range, file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_chunk_file_removes_temp_file_on_drop() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.7").unwrap();
        let path = file.path().to_path_buf();

        let chunk = ChunkFile::from_temp(PageRange::new(0, 1), file).unwrap();
        assert_eq!(chunk.bytes(), b"%PDF-1.7");
        assert_eq!(chunk.path(), Some(path.as_path()));
        assert!(path.exists());
        drop(chunk);
        assert!(!path.exists());
    }

    #[test]
    fn test_in_memory_chunk_has_no_path() {
        let chunk = ChunkFile::in_memory(PageRange::single(3), vec![1, 2, 3]);
        assert!(chunk.path().is_none());
        assert_eq!(chunk.range(), PageRange::single(3));
    }

    fn blank_pdf(pages: usize) -> NamedTempFile {
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut file = NamedTempFile::new().unwrap();
        doc.save_to(&mut file).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_materialize_writes_page_subset() {
        let pdf = blank_pdf(4);
        let source = PdfPageSource::open(pdf.path()).await.unwrap();
        assert_eq!(source.page_count(), 4);

        let chunk = source.materialize(PageRange::new(1, 3)).await.unwrap();
        let written = chunk.path().unwrap().to_path_buf();
        let subset = lopdf::Document::load_mem(chunk.bytes()).unwrap();
        assert_eq!(subset.get_pages().len(), 2);
        drop(chunk);
        assert!(!written.exists());
    }

    #[tokio::test]
    async fn test_materialize_rejects_out_of_range() {
        let pdf = blank_pdf(2);
        let source = PdfPageSource::open(pdf.path()).await.unwrap();
        let err = source.materialize(PageRange::new(1, 3)).await.unwrap_err();
        assert!(matches!(err, SourceError::OutOfRange { page_count: 2, .. }));
    }

    #[tokio::test]
    async fn test_open_missing_file_is_load_error() {
        let err = PdfPageSource::open("/nonexistent/statement.pdf").await.unwrap_err();
        assert!(matches!(err, SourceError::Load { .. }));
    }
}
