//! Minimal S3-compatible client: HEAD, PUT, and presigned GET.
//!
//! Requests use path-style addressing (`<endpoint>/<bucket>/<key>`) and
//! AWS Signature Version 4 with an unsigned payload.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use derivforge_common::{Error, Result};
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode, Url};
use sha2::{Digest, Sha256};

use super::store::ObjectStore;
use crate::config::OffloadConfig;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SERVICE: &str = "s3";

/// Longest validity S3 accepts for a presigned URL.
const MAX_PRESIGN_SECS: u64 = 7 * 24 * 3600;

/// Request timeout for HEAD and PUT.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Access key, secret, and region for request signing.
#[derive(Clone)]
pub struct SigningKey {
    access_key_id: String,
    secret_access_key: String,
    region: String,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
        }
    }

    /// `<date>/<region>/s3/aws4_request`
    fn scope(&self, date: &str) -> String {
        format!("{date}/{}/{SERVICE}/aws4_request", self.region)
    }

    fn credential(&self, date: &str) -> String {
        format!("{}/{}", self.access_key_id, self.scope(date))
    }

    /// Signature over a canonical request made at `amz_date`.
    fn sign(&self, canonical_request: &str, amz_date: &str) -> Result<String> {
        let date = &amz_date[..8.min(amz_date.len())];
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{}\n{}",
            self.scope(date),
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let secret = format!("AWS4{}", self.secret_access_key);
        let k_date = hmac(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, self.region.as_bytes())?;
        let k_service = hmac(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac(&k_service, b"aws4_request")?;
        Ok(hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?))
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::internal(format!("hmac key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encode per SigV4: unreserved characters pass, `/` optionally.
fn uri_encode(value: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn canonical_request(
    method: &str,
    path: &str,
    query: &[(String, String)],
    headers: &[(&str, String)],
) -> String {
    let query = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");
    format!("{method}\n{path}\n{query}\n{canonical_headers}\n{signed_headers}\n{UNSIGNED_PAYLOAD}")
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// [`ObjectStore`] speaking the S3 REST API over blocking HTTP.
#[derive(Debug)]
pub struct S3ObjectStore {
    client: Client,
    endpoint: Url,
    bucket: String,
    key: SigningKey,
}

impl S3ObjectStore {
    pub fn new(endpoint: &str, bucket: &str, key: SigningKey) -> Result<Self> {
        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| Error::invalid_input(format!("offload endpoint {endpoint:?}: {e}")))?;
        if endpoint.host_str().is_none() {
            return Err(Error::invalid_input("offload endpoint has no host"));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            bucket: bucket.trim().to_string(),
            key,
        })
    }

    pub fn from_config(config: &OffloadConfig) -> Result<Self> {
        Self::new(
            &config.endpoint,
            &config.bucket,
            SigningKey::new(
                config.access_key_id.trim(),
                config.secret_access_key.trim(),
                config.region.trim(),
            ),
        )
    }

    /// Encoded request path for an object key.
    fn object_path(&self, key: &str) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        format!(
            "{base}/{}/{}",
            uri_encode(&self.bucket, false),
            uri_encode(key, true)
        )
    }

    fn object_url(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.set_path(path);
        url.set_query(None);
        let mut raw = url.to_string();
        if !query.is_empty() {
            raw.push('?');
            raw.push_str(
                &query
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&"),
            );
        }
        Url::parse(&raw).map_err(|e| Error::internal(format!("object url: {e}")))
    }

    fn send(
        &self,
        method: Method,
        key: &str,
        extra: Vec<(&'static str, String)>,
        body: Option<File>,
    ) -> Result<reqwest::blocking::Response> {
        let path = self.object_path(key);
        let url = self.object_url(&path, &[])?;
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

        let headers: Vec<(&str, String)> = vec![
            ("host", host_header(&url)),
            ("x-amz-content-sha256", UNSIGNED_PAYLOAD.to_string()),
            ("x-amz-date", amz_date.clone()),
        ];
        let canonical = canonical_request(method.as_str(), &path, &[], &headers);
        let signature = self.key.sign(&canonical, &amz_date)?;
        let authorization = format!(
            "{ALGORITHM} Credential={},SignedHeaders=host;x-amz-content-sha256;x-amz-date,Signature={signature}",
            self.key.credential(&amz_date[..8])
        );

        let mut request = self
            .client
            .request(method, url)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("x-amz-date", amz_date)
            .header("authorization", authorization);
        for (name, value) in extra {
            request = request.header(name, value);
        }
        if let Some(file) = body {
            request = request.body(file);
        }

        request
            .send()
            .map_err(|e| Error::offload_failed(format!("{key}: {e}")))
    }

    /// Presigned GET URL as of `now`.
    pub fn presign_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String> {
        let path = self.object_path(key);
        let host_url = self.object_url(&path, &[])?;
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let expires = ttl.as_secs().clamp(1, MAX_PRESIGN_SECS);

        // Already in canonical (sorted) order.
        let mut query: Vec<(String, String)> = vec![
            ("X-Amz-Algorithm".into(), ALGORITHM.into()),
            (
                "X-Amz-Credential".into(),
                uri_encode(&self.key.credential(&amz_date[..8]), false),
            ),
            ("X-Amz-Date".into(), amz_date.clone()),
            ("X-Amz-Expires".into(), expires.to_string()),
            ("X-Amz-SignedHeaders".into(), "host".into()),
        ];
        let headers = [("host", host_header(&host_url))];
        let canonical = canonical_request("GET", &path, &query, &headers);
        let signature = self.key.sign(&canonical, &amz_date)?;
        query.push(("X-Amz-Signature".into(), signature));

        Ok(self.object_url(&path, &query)?.to_string())
    }
}

impl ObjectStore for S3ObjectStore {
    fn exists(&self, key: &str) -> Result<bool> {
        let response = self.send(Method::HEAD, key, Vec::new(), None)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::offload_failed(format!("HEAD {key}: {status}"))),
        }
    }

    fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        let mut extra = vec![
            ("content-type", content_type.to_string()),
            ("content-length", length.to_string()),
        ];
        if !cache_control.trim().is_empty() {
            extra.push(("cache-control", cache_control.trim().to_string()));
        }

        let response = self.send(Method::PUT, key, extra, Some(file))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::offload_failed(format!("PUT {key}: {}", response.status())))
        }
    }

    fn presigned_get(&self, key: &str, ttl: Duration) -> Result<String> {
        self.presign_at(key, ttl, Utc::now())
    }
}
