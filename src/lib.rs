//! Course Video Uploadr Library
//!
//! Resumable, chunked video uploads to a course platform's video-streaming API.
//!
//! # Features
//!
//! - **Chunked**: files are sent as base64 chunks of 5-50 MiB, one at a time
//! - **Resilient**: bounded per-chunk retries with growing delays
//! - **Self-healing**: expired upload sessions are recovered automatically
//! - **Observable**: progress/status/error/recovery observers, tracing spans and
//!   Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use course_video_uploadr::api::HttpVideoStreamingApi;
//! use course_video_uploadr::auth::StaticToken;
//! use course_video_uploadr::upload::{FileSource, UploadMetadata, UploadSettings, VideoUploadClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let api = HttpVideoStreamingApi::new(
//!         "https://learn.example.com/api",
//!         None,
//!         Arc::new(StaticToken::new("token")),
//!     )?;
//!     let mut client = VideoUploadClient::new(Arc::new(api), UploadSettings::default());
//!
//!     let source = Arc::new(FileSource::open("lecture-01.mp4").await?);
//!     let metadata = UploadMetadata::for_course("course-42").with_title("Lecture 1");
//!     let result = client.upload_file(source, metadata).await?;
//!     println!("uploaded video {}", result.video_id);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use upload::{UploadError, VideoUploadClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
