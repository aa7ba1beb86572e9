//! S3-compatible blob store backend (Cloudflare R2).

use std::env;

use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;

use crate::error::{Error, Result};

use super::BlobStore;

const ENV_ACCOUNT_ID: &str = "QUILL_R2_ACCOUNT_ID";
const ENV_BUCKET: &str = "QUILL_R2_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "QUILL_R2_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "QUILL_R2_SECRET_ACCESS_KEY";

/// S3-compatible storage configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Config {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// Bucket name.
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
}

impl S3Config {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// S3-compatible endpoint URL for the configured account.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

/// Blob store backed by an S3-compatible bucket.
#[derive(Clone, Debug)]
pub struct S3BlobStore {
    config: S3Config,
    client: Client,
}

impl S3BlobStore {
    /// Build a store for the given configuration.
    #[must_use]
    pub fn new(config: S3Config) -> Self {
        let client = build_s3_client(&config);
        Self { config, client }
    }
}

impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let key = normalize_object_key(key)?;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()));

        let content_type = content_type.trim();
        if !content_type.is_empty() {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .map_err(|error| storage_error("put_object", &self.config.bucket, &key, error))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let key = normalize_object_key(key)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|error| storage_error("get_object", &self.config.bucket, &key, error))?;

        let payload = response.body.collect().await.map_err(|error| {
            storage_error("get_object_body", &self.config.bucket, &key, error)
        })?;
        Ok(payload.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = normalize_object_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|error| {
                storage_error("delete_object", &self.config.bucket, &key, error)
            })?;
        Ok(())
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<S3Config>> {
    let account_id = lookup(ENV_ACCOUNT_ID).map(|value| value.trim().to_string());
    let bucket = lookup(ENV_BUCKET).map(|value| value.trim().to_string());
    let access_key_id = lookup(ENV_ACCESS_KEY_ID).map(|value| value.trim().to_string());
    let secret_access_key = lookup(ENV_SECRET_ACCESS_KEY).map(|value| value.trim().to_string());

    let any_present = account_id.is_some()
        || bucket.is_some()
        || access_key_id.is_some()
        || secret_access_key.is_some();
    if !any_present {
        return Ok(None);
    }

    let mut missing = Vec::new();
    if account_id.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_ACCOUNT_ID);
    }
    if bucket.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_BUCKET);
    }
    if access_key_id.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_ACCESS_KEY_ID);
    }
    if secret_access_key.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_SECRET_ACCESS_KEY);
    }

    if !missing.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Blob storage configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    }

    Ok(Some(S3Config {
        account_id: account_id.expect("validated above"),
        bucket: bucket.expect("validated above"),
        access_key_id: access_key_id.expect("validated above"),
        secret_access_key: secret_access_key.expect("validated above"),
    }))
}

fn build_s3_client(config: &S3Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "quill-core-blob-storage",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new("auto"))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

/// Map an SDK failure onto the error taxonomy.
///
/// The S3 SDK does not expose a stable typed split between credential and
/// permission rejections across operations, so classification keys off the
/// rendered service error.
fn storage_error(
    operation: &str,
    bucket: &str,
    object_key: &str,
    error: impl std::fmt::Display,
) -> Error {
    let rendered = format!("S3 {operation} failed for {bucket}/{object_key}: {error}");
    let lowered = rendered.to_ascii_lowercase();

    if lowered.contains("expiredtoken")
        || lowered.contains("invalidaccesskeyid")
        || lowered.contains("signaturedoesnotmatch")
    {
        Error::Auth(rendered)
    } else if lowered.contains("accessdenied") {
        Error::Permission(rendered)
    } else {
        Error::Storage(rendered)
    }
}

fn normalize_object_key(key: &str) -> Result<String> {
    let key = key.trim().trim_matches('/').to_string();
    if key.is_empty() {
        return Err(Error::InvalidInput(
            "Blob object key cannot be empty".to_string(),
        ));
    }
    Ok(key)
}
