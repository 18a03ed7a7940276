//! Mizuchi S3 - S3 client command line
//!
//! Uploads objects with resumable multipart uploads, resolves bucket regions,
//! presigns URLs and aborts incomplete uploads.

use anyhow::Context;
use clap::{Parser, Subcommand};
use mizuchi_s3::config::Config;
use mizuchi_s3::s3::EnvironmentCredentials;
use mizuchi_s3::upload::put_object::PutObjectHandler;
use mizuchi_s3::upload::{ObjectSource, PutObjectOptions, UploadHandler};
use mizuchi_s3::{logging, metrics};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Mizuchi S3 - S3 client with resumable multipart uploads
#[derive(Parser, Debug)]
#[command(name = "mizuchi-s3")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Read credentials from AWS_* environment variables before every request
    #[arg(long)]
    env_credentials: bool,

    /// Print Prometheus metrics after the command
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file, resuming an incomplete upload of the same object
    Upload {
        bucket: String,
        key: String,
        file: PathBuf,
        /// Content type (default application/octet-stream)
        #[arg(long)]
        content_type: Option<String>,
        /// Metadata as key=value, repeatable
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Print the region of a bucket
    Region { bucket: String },
    /// Print a presigned URL
    Presign {
        bucket: String,
        key: String,
        /// HTTP method the URL grants
        #[arg(long, default_value = "GET")]
        method: String,
        /// Validity in seconds (max 604800)
        #[arg(long, default_value_t = 3600)]
        expires: u64,
    },
    /// Abort the incomplete upload of an object
    Abort { bucket: String, key: String },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load configuration from {:?}", path))?,
        None => Config::default(),
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    logging::init_subscriber(&config.logging)?;
    info!("Starting Mizuchi S3 v{}", mizuchi_s3::VERSION);

    let mut client = config.build_client()?;
    if args.env_credentials {
        client = client.with_credentials_provider(Arc::new(EnvironmentCredentials::new()));
    }
    let client = Arc::new(client);

    match args.command {
        Command::Upload {
            bucket,
            key,
            file,
            content_type,
            metadata,
        } => {
            let handler = PutObjectHandler::new(client);
            let options = PutObjectOptions {
                content_type,
                metadata: metadata.into_iter().collect(),
            };
            let result = handler
                .upload(&bucket, &key, ObjectSource::File(file), &options)
                .await?;
            println!("{}", result.etag);
        }
        Command::Region { bucket } => {
            println!("{}", client.get_bucket_region(&bucket).await?);
        }
        Command::Presign {
            bucket,
            key,
            method,
            expires,
        } => {
            let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("invalid HTTP method '{}'", method))?;
            let url = client
                .presigned_url(method, &bucket, &key, expires, None)
                .await?;
            println!("{}", url);
        }
        Command::Abort { bucket, key } => {
            let handler = PutObjectHandler::new(client);
            match handler.multipart().remove_incomplete_upload(&bucket, &key).await? {
                Some(upload_id) => println!("aborted {}", upload_id),
                None => println!("no incomplete upload for {}/{}", bucket, key),
            }
        }
    }

    if args.print_metrics {
        print!("{}", metrics::render());
    }

    Ok(())
}
