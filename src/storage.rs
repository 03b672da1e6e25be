//! Artifact Store Adapter — `spec.md` §4.8.
//!
//! Backed by `aws-sdk-s3` pointed at a MinIO endpoint (MinIO speaks the S3
//! API, so no MinIO-specific SDK is needed) — the same approach the
//! retrieved pack's `byeongsu-hong-pranklin` manifest takes for object
//! storage.

use std::time::Duration;

use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store put failed: {0}")]
    Put(String),
    #[error("object store get failed: {0}")]
    Get(String),
    #[error("object store delete failed: {0}")]
    Delete(String),
    #[error("presign failed: {0}")]
    Presign(String),
    #[error("bucket creation failed: {0}")]
    Bucket(String),
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub use_ssl: bool,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// Thin wrapper over an S3-compatible client. `put` auto-creates the
/// target bucket on first use, per `spec.md` §4.8.
#[derive(Clone)]
pub struct ArtifactStore {
    client: Client,
}

impl ArtifactStore {
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        let scheme = if config.use_ssl { "https" } else { "http" };
        let endpoint_url = format!("{scheme}://{}", config.endpoint);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "sri-facturacion-static",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .endpoint_url(endpoint_url)
            .region(aws_sdk_s3::config::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
        })
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let exists = self
            .client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .is_ok();
        if exists {
            return Ok(());
        }
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::Bucket(e.to_string()))?;
        Ok(())
    }

    /// Uploads `bytes` under `bucket/key`, auto-creating the bucket if it
    /// does not yet exist. Returns the canonical `"<bucket>/<key>"` path.
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.ensure_bucket(bucket).await?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Put(e.to_string()))?;
        Ok(format!("{bucket}/{key}"))
    }

    /// Streams an object's bytes back. The caller is responsible for
    /// turning this into a streamed HTTP response body rather than
    /// buffering further.
    pub async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Get(e.to_string()))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Get(e.to_string()))?;
        Ok(bytes.into_bytes().to_vec())
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete(e.to_string()))?;
        Ok(())
    }

    pub async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let presign_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::Presign(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;
        Ok(presigned.uri().to_string())
    }
}

/// Canonical object-store layout (`spec.md` §6, "Object-store layout").
pub mod layout {
    pub const BUCKET_CERTIFICATES: &str = "certificates";
    pub const BUCKET_INVOICES: &str = "invoices";

    pub fn certificate_key(ruc: &str, epoch_seconds: i64) -> String {
        format!("{ruc}/certificate_{epoch_seconds}.p12")
    }

    pub fn signed_xml_key(ruc: &str, clave_acceso: &str) -> String {
        format!("signed/{ruc}/{clave_acceso}.xml")
    }

    pub fn signed_pdf_key(ruc: &str, clave_acceso: &str) -> String {
        format!("signed/{ruc}/{clave_acceso}.pdf")
    }

    pub fn authorized_xml_key(ruc: &str, clave_acceso: &str) -> String {
        format!("authorized/{ruc}/{clave_acceso}.xml")
    }
}

#[cfg(test)]
mod tests {
    use super::layout::*;

    #[test]
    fn layout_keys_match_spec_paths() {
        assert_eq!(
            signed_xml_key("1790011674001", "1".repeat(49).as_str()),
            format!("signed/1790011674001/{}.xml", "1".repeat(49))
        );
        assert_eq!(
            authorized_xml_key("1790011674001", "2".repeat(49).as_str()),
            format!("authorized/1790011674001/{}.xml", "2".repeat(49))
        );
        assert_eq!(
            certificate_key("1790011674001", 1_700_000_000),
            "1790011674001/certificate_1700000000.p12"
        );
    }
}
