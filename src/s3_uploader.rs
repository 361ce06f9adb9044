use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use log::{info, warn};
use std::path::Path;

use crate::clip::Clip;
use crate::error::ReplayError;

/// Permanent retention for clips an operator selects.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Uploads the clip's file and returns where it can be fetched from.
    async fn upload(&self, clip: &Clip) -> Result<String, ReplayError>;
}

const DEFAULT_REGION: &str = "eu-north-1";

/// Configured region first, then the environment and profile, then eu-north-1.
fn region_chain(region: Option<&str>) -> RegionProviderChain {
    RegionProviderChain::first_try(region.map(|r| Region::new(r.to_string())))
        .or_default_provider()
        .or_else(Region::new(DEFAULT_REGION))
}

pub struct S3Uploader {
    client: Client,
    bucket: String,
    region: String,
    /// Optional endpoint override (for example, "http://127.0.0.1:9000" for MinIO)
    endpoint: Option<String>,
}

impl S3Uploader {
    /// Creates a new S3Uploader.
    ///
    /// * `bucket` - The S3 bucket name.
    /// * `region` - Explicit region; `None` defers to the AWS default provider chain.
    /// * `endpoint` - An optional endpoint override (pass, for example, Some("http://127.0.0.1:9000")
    ///   to use a local S3-compatible service like MinIO).
    pub async fn new(bucket: &str, region: Option<&str>, endpoint: Option<&str>) -> Result<Self> {
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_chain(region))
            .load()
            .await;
        let region = shared_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        info!("Using S3 bucket {} in {}", bucket, region);

        let mut config = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(ep) = endpoint {
            config = config.endpoint_url(ep).force_path_style(true);
        }

        let client = Client::from_conf(config.build());

        Ok(S3Uploader {
            client,
            bucket: bucket.to_string(),
            region,
            endpoint: endpoint.map(|s| s.to_string()),
        })
    }

    /// Uploads the file at `file_path` to the S3 bucket using the specified `object_key`.
    ///
    /// Returns the URL where the object is available.
    pub async fn upload_file(&self, file_path: &Path, object_key: &str) -> Result<String> {
        let body = ByteStream::from_path(file_path)
            .await
            .with_context(|| format!("file does not exist: {}", file_path.display()))?;

        info!("Starting S3 upload for {}...", object_key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type("video/mp4")
            .body(body)
            .send()
            .await
            .with_context(|| format!("put_object {} failed", object_key))?;

        let url = self.object_url(object_key);
        info!("Successfully uploaded file to {}", url);

        if let Err(err) = self.allow_public_reads().await {
            warn!("Could not set bucket policy: {:#}", err);
        }

        Ok(url)
    }

    fn object_url(&self, object_key: &str) -> String {
        if let Some(ref ep) = self.endpoint {
            let trimmed = ep.trim_end_matches('/');
            format!("{}/{}/{}", trimmed, self.bucket, object_key)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, object_key
            )
        }
    }

    /// Grants anonymous GetObject on the clips/ prefix so review links play directly.
    async fn allow_public_reads(&self) -> Result<()> {
        let policy = serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "PublicReadGetObject",
                "Effect": "Allow",
                "Principal": "*",
                "Action": "s3:GetObject",
                "Resource": format!("arn:aws:s3:::{}/clips/*", self.bucket),
            }]
        });

        self.client
            .put_bucket_policy()
            .bucket(&self.bucket)
            .policy(policy.to_string())
            .send()
            .await?;
        Ok(())
    }
}

/// Object key a clip is stored under.
pub fn object_key(clip: &Clip) -> String {
    format!("clips/{}", clip.filename)
}

#[async_trait]
impl UploadSink for S3Uploader {
    async fn upload(&self, clip: &Clip) -> Result<String, ReplayError> {
        self.upload_file(&clip.local_path, &object_key(clip))
            .await
            .map_err(|err| ReplayError::UploadFailed(format!("{:#}", err)))
    }
}
