//! Object-store adapter for original document bytes.
//!
//! Talks to any S3-compatible store (MinIO, Ceph RGW, AWS S3) over the REST
//! API with AWS Signature V4 authentication, using only pure-Rust crypto
//! (`hmac` + `sha2`) — no C library dependencies.
//!
//! Objects are addressed by opaque handles shaped as
//! `documents/YYYY/MM/DD/<epochMillis>_<shortRand>_<originalFilename>`, laid
//! out for human inspection of the bucket, not for lookup: the handle is
//! stored on the document row and never re-derived.
//!
//! # Environment Variables
//!
//! Credentials are read from environment variables:
//! - `BLOB_ACCESS_KEY_ID` — required
//! - `BLOB_SECRET_ACCESS_KEY` — required
//! - `BLOB_SESSION_TOKEN` — optional (temporary credentials)

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use crate::config::BlobStoreConfig;
use crate::error::{Result, ServiceError};

type HmacSha256 = Hmac<Sha256>;

/// Storage operations the ingestion and deletion pipelines need.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, handle: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    async fn get(&self, handle: &str) -> Result<Vec<u8>>;
    /// Idempotent: deleting a missing object succeeds.
    async fn delete(&self, handle: &str) -> Result<()>;
    async fn exists(&self, handle: &str) -> Result<bool>;
}

/// Generate a fresh storage handle for an upload.
pub fn generate_handle(original_filename: &str) -> String {
    let now = Utc::now();
    let short_rand: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!(
        "documents/{}/{}_{}_{}",
        now.format("%Y/%m/%d"),
        now.timestamp_millis(),
        short_rand,
        sanitize_filename(original_filename)
    )
}

/// Keep handles valid object keys: anything outside `[A-Za-z0-9._-]` becomes
/// an underscore.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// S3-compatible blob store speaking SigV4 over path-style URLs.
pub struct S3BlobStore {
    client: reqwest::Client,
    scheme: String,
    host: String,
    bucket: String,
    region: String,
    credentials: Credentials,
}

struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("BLOB_ACCESS_KEY_ID").map_err(|_| {
            ServiceError::external("BLOB_ACCESS_KEY_ID environment variable not set")
        })?;
        let secret_access_key = std::env::var("BLOB_SECRET_ACCESS_KEY").map_err(|_| {
            ServiceError::external("BLOB_SECRET_ACCESS_KEY environment variable not set")
        })?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("BLOB_SESSION_TOKEN").ok(),
        })
    }
}

impl S3BlobStore {
    pub fn new(config: &BlobStoreConfig) -> Result<Self> {
        let credentials = Credentials::from_env()?;
        let (scheme, host) = split_endpoint(&config.endpoint);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::external(format!("blob client init failed: {}", e)))?;

        Ok(Self {
            client,
            scheme,
            host,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            credentials,
        })
    }

    fn object_uri(&self, handle: &str) -> String {
        let encoded: String = handle
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        format!("/{}/{}", uri_encode(&self.bucket), encoded)
    }

    /// Sign one request and return the headers to attach, including
    /// `Authorization`. Signed headers are host, payload hash, date, and the
    /// session token when present.
    fn sign(&self, method: &str, canonical_uri: &str, payload_hash: &str) -> Vec<(String, String)> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        let mut request_headers = vec![
            ("Authorization".to_string(), authorization),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date),
        ];
        if let Some(ref token) = self.credentials.session_token {
            request_headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        request_headers
    }

    async fn send(
        &self,
        method: reqwest::Method,
        handle: &str,
        body: Option<(&[u8], &str)>,
    ) -> Result<reqwest::Response> {
        let canonical_uri = self.object_uri(handle);
        let payload_hash = match body {
            Some((bytes, _)) => hex_sha256(bytes),
            None => hex_sha256(b""),
        };
        let headers = self.sign(method.as_str(), &canonical_uri, &payload_hash);
        let url = format!("{}://{}{}", self.scheme, self.host, canonical_uri);

        let mut builder = self.client.request(method, &url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some((bytes, content_type)) = body {
            builder = builder
                .header("Content-Type", content_type)
                .body(bytes.to_vec());
        }

        builder
            .send()
            .await
            .map_err(|e| ServiceError::external(format!("blob store unreachable: {}", e)))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, handle: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let resp = self
            .send(reqwest::Method::PUT, handle, Some((bytes, content_type)))
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(ServiceError::external(format!(
                "blob store PUT failed (HTTP {}): {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>> {
        let resp = self.send(reqwest::Method::GET, handle, None).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::ingestion_failed(format!(
                "stored object missing: {}",
                handle
            )));
        }
        if !resp.status().is_success() {
            return Err(ServiceError::external(format!(
                "blob store GET failed (HTTP {}) for {}",
                resp.status(),
                handle
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ServiceError::external(format!("blob store read failed: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        let resp = self.send(reqwest::Method::DELETE, handle, None).await?;
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(ServiceError::external(format!(
            "blob store DELETE failed (HTTP {}) for {}",
            resp.status(),
            handle
        )))
    }

    async fn exists(&self, handle: &str) -> Result<bool> {
        let resp = self.send(reqwest::Method::HEAD, handle, None).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(ServiceError::external(format!(
                "blob store HEAD failed (HTTP {}) for {}",
                resp.status(),
                handle
            )));
        }
        Ok(true)
    }
}

fn split_endpoint(endpoint: &str) -> (String, String) {
    if let Some(host) = endpoint.strip_prefix("https://") {
        ("https".to_string(), host.trim_end_matches('/').to_string())
    } else if let Some(host) = endpoint.strip_prefix("http://") {
        ("http".to_string(), host.trim_end_matches('/').to_string())
    } else {
        ("https".to_string(), endpoint.trim_end_matches('/').to_string())
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key:
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding for canonical requests: everything except unreserved
/// characters (`A-Z a-z 0-9 - _ . ~`) is percent-encoded.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
