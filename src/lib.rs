//! Mizuchi S3 Library
//!
//! S3-compatible object storage client with resumable multipart uploads.
//!
//! # Features
//!
//! - **SigV4**: Header signing and presigned URLs
//! - **Region Resolution**: Per-bucket region lookup with a shared cache
//! - **Resumable Uploads**: Incomplete uploads are discovered and unchanged parts skipped
//! - **Typed Errors**: Service errors carry their code, request id and region hint
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_s3::config::Config;
//! use mizuchi_s3::upload::{put_object::PutObjectHandler, ObjectSource, PutObjectOptions, UploadHandler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let handler = PutObjectHandler::new(Arc::new(config.build_client()?));
//!     let result = handler
//!         .upload(
//!             "my-bucket",
//!             "backup.tar",
//!             ObjectSource::File("backup.tar".into()),
//!             &PutObjectOptions::default(),
//!         )
//!         .await?;
//!     println!("ETag: {}", result.etag);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod metrics;
pub mod s3;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use s3::{S3Client, S3ClientConfig, S3ClientError, S3Error};
pub use upload::{ObjectSource, PutObjectOptions, UploadError, UploadResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
