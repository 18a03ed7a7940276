//! Bucket region cache and resolver
//!
//! A bucket's region is looked up once with `GET ?location` and cached for
//! the life of the cache. Entries are dropped whenever a request against the
//! bucket fails so the next call re-resolves.
//!
//! The lookup is signed for [`DEFAULT_REGION`]. When the service answers with
//! a region-mismatch error whose body names the right region, the lookup is
//! retried exactly once signed for that region.

use super::addressing::{RequestOptions, DEFAULT_REGION};
use super::engine::Payload;
use super::{xml, S3Client, S3ClientError};
use crate::metrics;
use dashmap::DashMap;
use reqwest::Method;

/// Process-held mapping bucket name -> region
///
/// Shared between clients through `Arc`; reads are lock-free per shard and
/// writes are last-writer-wins.
#[derive(Debug, Default)]
pub struct RegionCache {
    regions: DashMap<String, String>,
}

impl RegionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached region of `bucket`
    pub fn get(&self, bucket: &str) -> Option<String> {
        self.regions.get(bucket).map(|r| r.value().clone())
    }

    pub fn insert(&self, bucket: impl Into<String>, region: impl Into<String>) {
        self.regions.insert(bucket.into(), region.into());
    }

    /// Drop the entry for `bucket`, if any
    pub fn invalidate(&self, bucket: &str) {
        if self.regions.remove(bucket).is_some() {
            tracing::debug!(bucket = %bucket, "Invalidated cached bucket region");
        }
    }

    pub fn contains(&self, bucket: &str) -> bool {
        self.regions.contains_key(bucket)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl S3Client {
    /// Region of `bucket`
    ///
    /// A region fixed at construction is authoritative for every bucket.
    /// Otherwise the cache is consulted before issuing a location lookup.
    #[tracing::instrument(
        name = "s3.get_bucket_region",
        skip(self),
        fields(s3.bucket = %bucket, s3.region = tracing::field::Empty),
        err
    )]
    pub async fn get_bucket_region(&self, bucket: &str) -> Result<String, S3ClientError> {
        if let Some(region) = self.region() {
            return Ok(region.to_string());
        }

        if let Some(region) = self.region_cache().get(bucket) {
            metrics::record_region_lookup("cached");
            tracing::Span::current().record("s3.region", region.as_str());
            return Ok(region);
        }

        let region = match self.location_lookup(bucket, DEFAULT_REGION).await {
            Ok(region) => region,
            Err(err) => {
                let hint = match err.s3_error() {
                    Some(e) if e.is_region_mismatch() => e.region.clone(),
                    _ => None,
                };
                let Some(hint) = hint else {
                    metrics::record_region_lookup("failure");
                    return Err(err);
                };

                tracing::info!(
                    bucket = %bucket,
                    region = %hint,
                    "Region mismatch on location lookup, retrying with hinted region"
                );
                metrics::record_region_lookup("retried");
                self.location_lookup(bucket, &hint).await?
            }
        };

        self.region_cache().insert(bucket, region.clone());
        metrics::record_region_lookup("resolved");
        tracing::Span::current().record("s3.region", region.as_str());
        Ok(region)
    }

    /// One `GET ?location` signed for `sign_region`
    async fn location_lookup(&self, bucket: &str, sign_region: &str) -> Result<String, S3ClientError> {
        let opts = RequestOptions::new(Method::GET)
            .bucket(bucket)
            .query("location")
            .force_path_style();

        let response = self
            .execute(opts, Payload::empty(), &[200], Some(sign_region))
            .await?;
        let body = response.text().await?;
        let region = xml::parse_bucket_region(&body)?.unwrap_or_else(|| DEFAULT_REGION.to_string());

        tracing::debug!(bucket = %bucket, region = %region, "Resolved bucket region");
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_cache_insert_get_invalidate() {
        let cache = RegionCache::new();
        assert!(cache.is_empty());
        assert!(cache.get("bucket").is_none());

        cache.insert("bucket", "eu-west-1");
        assert_eq!(cache.get("bucket").as_deref(), Some("eu-west-1"));
        assert!(cache.contains("bucket"));

        cache.insert("bucket", "us-west-2");
        assert_eq!(cache.get("bucket").as_deref(), Some("us-west-2"));
        assert_eq!(cache.len(), 1);

        cache.invalidate("bucket");
        assert!(cache.get("bucket").is_none());

        // Invalidating an unknown bucket is a no-op
        cache.invalidate("other");
    }

    #[tokio::test]
    async fn test_cache_concurrent_writers() {
        let cache = Arc::new(RegionCache::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.insert(format!("bucket-{}", i % 2), "eu-west-1");
                cache.get("bucket-0");
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len(), 2);
    }
}
