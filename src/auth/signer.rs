//! SigV4 request signer
//!
//! Computes AWS Signature Version 4 headers for outbound requests. The
//! signer is stateless and performs no I/O; given the same timestamp it
//! always produces the same signature.

use crate::config::SigningCredentials;
use crate::error::{Error, Result};
use crate::types::Method;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Signature scheme identifier
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Service name the signature is scoped to
const SERVICE: &str = "execute-api";

/// Timestamp format for the `x-amz-date` header
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Signs requests with the AWS Signature Version 4 scheme
#[derive(Clone)]
pub struct RequestSigner {
    credentials: SigningCredentials,
}

impl RequestSigner {
    /// Create a new signer
    pub fn new(credentials: SigningCredentials) -> Self {
        Self { credentials }
    }

    /// Sign a request, stamping the current time
    ///
    /// Returns the headers to merge into the request: `Authorization`,
    /// `x-amz-date` and `host`. Every supplied header participates in the
    /// signature, so headers added after signing would invalidate it.
    pub fn sign(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&str>,
    ) -> Result<HashMap<String, String>> {
        self.sign_at(method, url, headers, body, Utc::now())
    }

    /// Sign a request at a fixed timestamp
    pub fn sign_at(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, String>> {
        let parsed = Url::parse(url)?;
        let host = host_with_port(&parsed)
            .ok_or_else(|| Error::signing(format!("URL has no host: {url}")))?;

        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        // Canonical headers: every supplied header, lowercased and trimmed,
        // plus host and x-amz-date. Values for a repeated key are merged.
        let mut header_pairs: Vec<(String, String)> = headers
            .iter()
            .filter(|(key, _)| {
                let key = key.to_lowercase();
                key != "host" && key != "x-amz-date"
            })
            .map(|(key, value)| (key.to_lowercase(), value.trim().to_string()))
            .collect();
        header_pairs.push(("host".to_string(), host.clone()));
        header_pairs.push(("x-amz-date".to_string(), amz_date.clone()));
        header_pairs.sort();
        let header_pairs = merge_repeated_keys(header_pairs);

        let canonical_headers: String = header_pairs
            .iter()
            .map(|(key, value)| format!("{key}:{value}\n"))
            .collect();
        let signed_headers = header_pairs
            .iter()
            .map(|(key, _)| key.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let payload_hash = hex_sha256(body.unwrap_or("").as_bytes());

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_path(&parsed),
            canonical_query_string(&parsed),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!(
            "{date_stamp}/{}/{SERVICE}/aws4_request",
            self.credentials.region
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = self.derive_signing_key(&date_stamp)?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "{ALGORITHM} Credential={}/{credential_scope}, \
             SignedHeaders={signed_headers}, Signature={signature}",
            self.credentials.access_key_id
        );

        let mut signed = HashMap::new();
        signed.insert("Authorization".to_string(), authorization);
        signed.insert("x-amz-date".to_string(), amz_date);
        signed.insert("host".to_string(), host);
        Ok(signed)
    }

    /// Derive the signing key: AWS4+secret -> date -> region -> service
    fn derive_signing_key(&self, date_stamp: &str) -> Result<Vec<u8>> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.credentials.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Host for the canonical headers, keeping any non-default port
fn host_with_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}

/// Canonical path: each already-encoded segment is encoded once more,
/// slashes preserved
fn canonical_path(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical query string: pairs encoded then sorted by key and value
fn canonical_query_string(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| (uri_encode(&key), uri_encode(&value)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode everything outside the unreserved set
fn uri_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Merge values of adjacent entries sharing a key, comma separated
fn merge_repeated_keys(pairs: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        match merged.last_mut() {
            Some((last_key, last_value)) if *last_key == key => {
                last_value.push(',');
                last_value.push_str(&value);
            }
            _ => merged.push((key, value)),
        }
    }
    merged
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::signing(format!("Invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
