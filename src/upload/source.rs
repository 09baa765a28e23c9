//! Upload sources
//!
//! A source is the file being uploaded: a name, a size, a MIME type and
//! ranged reads. Reads are async so a large file never has to sit in memory
//! as a whole; only the chunk in flight is loaded.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Content type used when nothing better is known
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file to upload
#[async_trait]
pub trait UploadSource: Send + Sync {
    /// File name reported to the server
    fn file_name(&self) -> &str;

    /// Total size in bytes
    fn size(&self) -> u64;

    /// MIME type reported to the server
    fn content_type(&self) -> &str;

    /// Read `[start, end)`. A short read (including zero bytes) means the
    /// source ended early.
    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Bytes>;
}

/// Guess a video MIME type from a file name
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("ogv") => "video/ogg",
        Some("3gp") => "video/3gpp",
        Some("wmv") => "video/x-ms-wmv",
        Some("flv") => "video/x-flv",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// A file on disk
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    file_name: String,
    size: u64,
    content_type: String,
}

impl FileSource {
    /// Open a file, capturing its size and guessing its MIME type
    pub async fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let content_type = content_type_for(&file_name).to_string();

        Ok(Self {
            path,
            file_name,
            size: metadata.len(),
            content_type,
        })
    }

    /// Override the guessed MIME type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Bytes> {
        let len = end.saturating_sub(start);
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buf = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// An in-memory buffer
#[derive(Debug, Clone)]
pub struct MemorySource {
    file_name: String,
    content_type: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(&file_name).to_string();
        Self {
            file_name,
            content_type,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

#[async_trait]
impl UploadSource for MemorySource {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Bytes> {
        let len = self.data.len() as u64;
        let start = start.min(len) as usize;
        let end = end.min(len) as usize;
        Ok(self.data.slice(start..end.max(start)))
    }
}
