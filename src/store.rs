//! Artifact storage.
//!
//! Published JSON and HTML go through [`ArtifactStore::put`]. Objects live in
//! one of two [`Scope`]s, each with its own credentials and default bucket:
//! `public` objects are world-readable (`public-read` ACL), `private` ones
//! are not.
//!
//! | Store | Target | Used by |
//! |-------|--------|---------|
//! | [`SpacesStore`] | DigitalOcean Spaces (S3 API) at `https://{region}.digitaloceanspaces.com` | `run`, `run-all` |
//! | [`LocalStore`] | `{root}/{bucket or scope}/{key}` on disk | `--out-dir` dry runs |

use crate::config::{SpacesConfig, StorageConfig};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=300";

/// Spaces ignores the signing region but the SDK requires one.
const SIGNING_REGION: &str = "us-east-1";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Upload of {key} failed: {message}")]
    Upload { key: String, message: String },
    #[error("Spaces scope \"{0}\" is not configured")]
    Unconfigured(Scope),
    #[error("Invalid object key \"{0}\"")]
    InvalidKey(String),
    #[error("Invalid bucket name \"{0}\"")]
    InvalidBucket(String),
}

/// Access scope of an uploaded object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Public,
    Private,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Public => "public",
            Scope::Private => "private",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object upload.
#[derive(Debug, Clone)]
pub struct PutRequest<'a> {
    pub scope: Scope,
    /// Overrides the scope's default bucket.
    pub bucket: Option<&'a str>,
    pub key: &'a str,
    pub body: Vec<u8>,
    pub content_type: &'a str,
    pub cache_control: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    /// Where the object landed (`s3://bucket/key` or a file path).
    pub location: String,
    pub bytes: usize,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether uploads to `scope` can succeed at all.
    fn supports(&self, scope: Scope) -> bool;

    async fn put(&self, request: PutRequest<'_>) -> Result<PutReceipt, StoreError>;
}

// ============================================================================
// Spaces
// ============================================================================

struct ScopeClient {
    client: aws_sdk_s3::Client,
    bucket: String,
}

/// DigitalOcean Spaces over the S3 API.
pub struct SpacesStore {
    public: Option<ScopeClient>,
    private: Option<ScopeClient>,
}

impl SpacesStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            public: config.public.as_ref().map(scope_client),
            private: config.private.as_ref().map(scope_client),
        }
    }

    fn scope(&self, scope: Scope) -> Option<&ScopeClient> {
        match scope {
            Scope::Public => self.public.as_ref(),
            Scope::Private => self.private.as_ref(),
        }
    }
}

pub fn spaces_endpoint(region: &str) -> String {
    format!("https://{region}.digitaloceanspaces.com")
}

fn scope_client(config: &SpacesConfig) -> ScopeClient {
    let credentials = Credentials::new(&config.key, &config.secret, None, None, "spaces");
    let s3_config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(SIGNING_REGION))
        .endpoint_url(spaces_endpoint(&config.region))
        .credentials_provider(credentials)
        .build();
    ScopeClient {
        client: aws_sdk_s3::Client::from_conf(s3_config),
        bucket: config.bucket.clone(),
    }
}

#[async_trait]
impl ArtifactStore for SpacesStore {
    fn supports(&self, scope: Scope) -> bool {
        self.scope(scope).is_some()
    }

    async fn put(&self, request: PutRequest<'_>) -> Result<PutReceipt, StoreError> {
        let target = self
            .scope(request.scope)
            .ok_or(StoreError::Unconfigured(request.scope))?;
        let bucket = request.bucket.unwrap_or(&target.bucket);
        let bytes = request.body.len();

        let mut put = target
            .client
            .put_object()
            .bucket(bucket)
            .key(request.key)
            .body(ByteStream::from(request.body))
            .content_type(request.content_type)
            .cache_control(request.cache_control);
        if request.scope == Scope::Public {
            put = put.acl(ObjectCannedAcl::PublicRead);
        }

        put.send().await.map_err(|e| StoreError::Upload {
            key: request.key.to_string(),
            message: DisplayErrorContext(&e).to_string(),
        })?;

        Ok(PutReceipt {
            location: format!("s3://{bucket}/{}", request.key),
            bytes,
        })
    }
}

// ============================================================================
// Local directory
// ============================================================================

/// Non-empty and made only of plain path components.
fn stays_inside(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Writes artifacts under a local directory instead of uploading them.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, scope: Scope, bucket: Option<&str>, key: &str) -> Result<PathBuf, StoreError> {
        if !stays_inside(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let bucket = bucket.unwrap_or(scope.as_str());
        if !stays_inside(bucket) || Path::new(bucket).components().count() != 1 {
            return Err(StoreError::InvalidBucket(bucket.to_string()));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    fn supports(&self, _scope: Scope) -> bool {
        true
    }

    async fn put(&self, request: PutRequest<'_>) -> Result<PutReceipt, StoreError> {
        let path = self.path_for(request.scope, request.bucket, request.key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &request.body).await?;
        Ok(PutReceipt {
            location: path.display().to_string(),
            bytes: request.body.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request<'a>(key: &'a str, body: &str) -> PutRequest<'a> {
        PutRequest {
            scope: Scope::Public,
            bucket: None,
            key,
            body: body.as_bytes().to_vec(),
            content_type: HTML_CONTENT_TYPE,
            cache_control: DEFAULT_CACHE_CONTROL,
        }
    }

    #[test]
    fn scope_names() {
        assert_eq!(Scope::Public.to_string(), "public");
        assert_eq!(
            serde_json::from_str::<Scope>("\"private\"").unwrap(),
            Scope::Private
        );
        assert!(serde_json::from_str::<Scope>("\"shared\"").is_err());
    }

    #[test]
    fn endpoint_from_region() {
        assert_eq!(spaces_endpoint("nyc3"), "https://nyc3.digitaloceanspaces.com");
    }

    #[test]
    fn spaces_store_supports_configured_scopes_only() {
        let store = SpacesStore::new(&StorageConfig {
            public: Some(SpacesConfig {
                region: "nyc3".to_string(),
                key: "k".to_string(),
                secret: "s".to_string(),
                bucket: "tables".to_string(),
            }),
            private: None,
        });
        assert!(store.supports(Scope::Public));
        assert!(!store.supports(Scope::Private));
    }

    #[tokio::test]
    async fn unconfigured_scope_fails_before_upload() {
        let store = SpacesStore::new(&StorageConfig::default());
        let err = store.put(request("a.html", "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unconfigured(Scope::Public)));
    }

    #[tokio::test]
    async fn local_store_writes_under_scope() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let receipt = store
            .put(request("tables/rates.html", "<figure></figure>"))
            .await
            .unwrap();

        let path = tmp.path().join("public/tables/rates.html");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<figure></figure>");
        assert_eq!(receipt.bytes, 17);
        assert_eq!(receipt.location, path.display().to_string());
    }

    #[tokio::test]
    async fn local_store_uses_bucket_override() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let mut req = request("a.json", "{}");
        req.bucket = Some("archive");
        store.put(req).await.unwrap();
        assert!(tmp.path().join("archive/a.json").exists());
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_keys() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        for key in ["../x.json", "/etc/x.json", ""] {
            let err = store.put(request(key, "{}")).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "{key}");
        }
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_buckets() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        let store = LocalStore::new(&root);
        for bucket in ["../x", "/tmp", "a/b", ""] {
            let mut req = request("a.json", "{}");
            req.bucket = Some(bucket);
            let err = store.put(req).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidBucket(_)), "{bucket}");
        }
        assert!(!tmp.path().join("x").exists());
    }
}
