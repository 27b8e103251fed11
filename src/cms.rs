//! CMS document access.
//!
//! The patcher only needs two operations from a CMS, captured by
//! [`DocumentStore`]: fetch a document's current HTML plus its concurrency
//! token, and write new HTML back with that token. [`GhostClient`] implements
//! it against the Ghost Admin API.
//!
//! ## Ghost Admin API
//!
//! | Operation | Request |
//! |-----------|---------|
//! | fetch by slug | `GET {base}/{type}/?filter=slug:'{slug}'&limit=1&fields=id,slug,title,html,updated_at` |
//! | fetch by id | `GET {base}/{type}/{id}/?fields=id,slug,title,html,updated_at` |
//! | write | `PUT {base}/{type}/{id}/?source=html` with `{"{type}": [{id, html, updated_at}]}` |
//!
//! Every request carries `Authorization: Ghost {jwt}`, where the token is
//! HS256-signed with the hex-decoded admin secret, `kid` set to the key id,
//! audience `/{version}/admin/` and a five-minute lifetime. Ghost rejects a
//! write whose `updated_at` is stale, which surfaces here as a
//! [`CmsError::Status`].

use crate::config::GhostConfig;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DOCUMENT_FIELDS: &str = "id,slug,title,html,updated_at";
const TOKEN_LIFETIME_SECS: i64 = 300;

#[derive(Error, Debug)]
pub enum CmsError {
    #[error("Ghost API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Ghost API request failed ({status})")]
    Status { status: u16, body: String },
    #[error("Ghost API returned no {0} in its response")]
    EmptyResponse(ContentType),
    #[error("Ghost API returned an unexpected document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Could not sign Ghost admin token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("Ghost admin secret is not valid hex: {0}")]
    Secret(#[from] hex::FromHexError),
    #[error("Invalid Ghost admin URL: {0}")]
    Url(String),
    #[error("Unsupported Ghost content type \"{0}\"")]
    UnsupportedType(String),
}

/// Document collection in the CMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContentType {
    Pages,
    Posts,
}

impl ContentType {
    /// Collection name used in URLs and response bodies.
    pub fn collection(self) -> &'static str {
        match self {
            ContentType::Pages => "pages",
            ContentType::Posts => "posts",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContentType::Pages => "page",
            ContentType::Posts => "post",
        })
    }
}

impl FromStr for ContentType {
    type Err = CmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page" | "pages" => Ok(ContentType::Pages),
            "post" | "posts" => Ok(ContentType::Posts),
            other => Err(CmsError::UnsupportedType(other.to_string())),
        }
    }
}

impl TryFrom<String> for ContentType {
    type Error = CmsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        value.to_string()
    }
}

/// How a document is located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Slug(String),
    Id(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Slug(slug) => write!(f, "slug \"{slug}\""),
            Identifier::Id(id) => write!(f, "id \"{id}\""),
        }
    }
}

/// A document body plus the token that guards writes to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub html: String,
    /// Last-modified marker, echoed back on write.
    pub updated_at: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when no document matches.
    async fn fetch(
        &self,
        content_type: ContentType,
        identifier: &Identifier,
    ) -> Result<Option<Document>, CmsError>;

    /// Replace the document body. Fails if `document.updated_at` is stale.
    async fn write(
        &self,
        content_type: ContentType,
        document: &Document,
    ) -> Result<Document, CmsError>;
}

// ============================================================================
// Ghost
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct AdminClaims {
    iat: i64,
    exp: i64,
    aud: String,
}

#[derive(Debug, Deserialize)]
struct GhostItem {
    id: String,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl From<GhostItem> for Document {
    fn from(item: GhostItem) -> Self {
        Document {
            id: item.id,
            html: item.html.unwrap_or_default(),
            updated_at: item.updated_at.unwrap_or_default(),
        }
    }
}

/// Ghost Admin API client.
pub struct GhostClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    secret: Vec<u8>,
    version: String,
}

impl GhostClient {
    pub fn new(config: &GhostConfig) -> Result<Self, CmsError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: normalize_base_url(&config.admin_url)?,
            key_id: config.key_id.clone(),
            secret: hex::decode(&config.secret)?,
            version: config.version.clone(),
        })
    }

    /// Short-lived admin JWT.
    fn token(&self) -> Result<String, CmsError> {
        let iat = Utc::now().timestamp();
        let claims = AdminClaims {
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
            aud: format!("/{}/admin/", self.version),
        };
        let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
        header.kid = Some(self.key_id.clone());
        Ok(jsonwebtoken::encode(
            &header,
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )?)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Option<Value>, CmsError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Ghost {}", self.token()?))
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CmsError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(response.json().await?))
    }
}

/// First item of `{ "<collection>": [...] }`.
fn first_item(response: Value, content_type: ContentType) -> Result<Option<Document>, CmsError> {
    let item = match response {
        Value::Object(mut map) => match map.remove(content_type.collection()) {
            Some(Value::Array(items)) => items.into_iter().next(),
            _ => None,
        },
        _ => None,
    };
    item.map(|v| serde_json::from_value::<GhostItem>(v).map(Document::from))
        .transpose()
        .map_err(CmsError::from)
}

#[async_trait]
impl DocumentStore for GhostClient {
    async fn fetch(
        &self,
        content_type: ContentType,
        identifier: &Identifier,
    ) -> Result<Option<Document>, CmsError> {
        let collection = content_type.collection();
        let response = match identifier {
            Identifier::Slug(slug) => {
                let filter = format!("slug:'{slug}'");
                self.request(
                    reqwest::Method::GET,
                    &format!("{collection}/"),
                    &[
                        ("filter", filter.as_str()),
                        ("limit", "1"),
                        ("fields", DOCUMENT_FIELDS),
                    ],
                    None,
                )
                .await?
            }
            Identifier::Id(id) => {
                self.request(
                    reqwest::Method::GET,
                    &format!("{collection}/{id}/"),
                    &[("fields", DOCUMENT_FIELDS)],
                    None,
                )
                .await?
            }
        };
        match response {
            Some(value) => first_item(value, content_type),
            None => Ok(None),
        }
    }

    async fn write(
        &self,
        content_type: ContentType,
        document: &Document,
    ) -> Result<Document, CmsError> {
        let collection = content_type.collection();
        let mut body = serde_json::Map::new();
        body.insert(
            collection.to_string(),
            json!([{
                "id": document.id,
                "html": document.html,
                "updated_at": document.updated_at,
            }]),
        );
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("{collection}/{}/", document.id),
                &[("source", "html")],
                Some(Value::Object(body)),
            )
            .await?
            .ok_or(CmsError::EmptyResponse(content_type))?;
        first_item(response, content_type)?.ok_or(CmsError::EmptyResponse(content_type))
    }
}

/// Ensure the admin URL ends in `/ghost/api/admin/`.
pub fn normalize_base_url(url: &str) -> Result<String, CmsError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(CmsError::Url("GHOST_ADMIN_API_URL is empty".to_string()));
    }
    let trimmed = url.trim_end_matches('/');
    if trimmed.to_ascii_lowercase().ends_with("/ghost/api/admin") {
        Ok(format!("{trimmed}/"))
    } else {
        Ok(format!("{trimmed}/ghost/api/admin/"))
    }
}
