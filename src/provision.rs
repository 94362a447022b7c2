//! Remote index provisioning.
//!
//! Fetches a prebuilt vector index from an S3 bucket so query-time hosts
//! never need embedding credentials or a corpus checkout. Uses the S3
//! REST API with AWS Signature V4 authentication (`hmac` + `sha2` +
//! `hex`, no C dependencies) and supports custom endpoints for
//! S3-compatible services (MinIO, LocalStack).
//!
//! Absence of a remote copy is not an error: the caller receives
//! [`FetchOutcome::RemoteEmpty`] and the system degrades to "retrieval
//! disabled". Downloads land in a `<dir>.tmp` staging directory that is
//! renamed into place only when complete, matching the atomicity rule
//! for locally built indexes.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional (temporary credentials / IAM roles)

use anyhow::{bail, Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::RemoteConfig;

type HmacSha256 = Hmac<Sha256>;

/// Result of a provisioning attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A local index already exists; nothing was downloaded.
    AlreadyPresent,
    /// The remote index was downloaded (object count attached).
    Fetched(usize),
    /// No remote copy exists. Retrieval stays disabled.
    RemoteEmpty,
}

/// Download the remote index into `index_dir` unless one is already there.
pub async fn fetch_remote_index(
    remote: &RemoteConfig,
    index_dir: &Path,
) -> Result<FetchOutcome> {
    if index_dir.exists() {
        return Ok(FetchOutcome::AlreadyPresent);
    }

    let creds = AwsCredentials::from_env()?;
    let client = reqwest::Client::new();

    let keys = list_objects(remote, &creds, &client).await?;
    if keys.is_empty() {
        return Ok(FetchOutcome::RemoteEmpty);
    }

    let staging = staging_dir(index_dir);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let prefix = remote.prefix.trim_end_matches('/');
    for key in &keys {
        let rel = if prefix.is_empty() {
            key.as_str()
        } else {
            key.strip_prefix(prefix)
                .map(|s| s.trim_start_matches('/'))
                .unwrap_or(key.as_str())
        };
        if rel.is_empty() {
            continue;
        }

        let bytes = download_object(remote, &creds, &client, key).await?;
        let local = staging.join(rel);
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&local, &bytes)
            .with_context(|| format!("Failed to write {}", local.display()))?;
    }

    if let Some(parent) = index_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&staging, index_dir).with_context(|| {
        format!(
            "Failed to move fetched index into place at {}",
            index_dir.display()
        )
    })?;

    Ok(FetchOutcome::Fetched(keys.len()))
}

fn staging_dir(dir: &Path) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "index".to_string());
    name.push_str(".tmp");
    dir.with_file_name(name)
}

// ============ AWS Credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ Signed requests ============

/// List all object keys under the configured prefix, following
/// `ListObjectsV2` continuation tokens.
async fn list_objects(
    remote: &RemoteConfig,
    creds: &AwsCredentials,
    client: &reqwest::Client,
) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let mut query_params = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), "1000".to_string()),
        ];
        if !remote.prefix.is_empty() {
            query_params.push(("prefix".to_string(), remote.prefix.clone()));
        }
        if let Some(ref token) = continuation_token {
            query_params.push(("continuation-token".to_string(), token.clone()));
        }

        let xml = signed_get(remote, creds, client, "/", &query_params)
            .await
            .with_context(|| {
                format!(
                    "Failed to list s3://{}/{}",
                    remote.bucket, remote.prefix
                )
            })?;
        let xml = String::from_utf8_lossy(&xml).to_string();

        let (batch, is_truncated, next_token) = parse_list_response(&xml);
        keys.extend(batch);

        if is_truncated {
            continuation_token = next_token;
        } else {
            break;
        }
    }

    Ok(keys)
}

async fn download_object(
    remote: &RemoteConfig,
    creds: &AwsCredentials,
    client: &reqwest::Client,
    key: &str,
) -> Result<Vec<u8>> {
    let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
    let path = format!("/{}", encoded_key);
    signed_get(remote, creds, client, &path, &[])
        .await
        .with_context(|| format!("Failed to get s3://{}/{}", remote.bucket, key))
}

/// Issue one SigV4-signed GET and return the response body bytes.
async fn signed_get(
    remote: &RemoteConfig,
    creds: &AwsCredentials,
    client: &reqwest::Client,
    canonical_uri: &str,
    query_params: &[(String, String)],
) -> Result<Vec<u8>> {
    let host = s3_host(remote);

    let now = Utc::now();
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(b"");

    // Canonical query string must be sorted by key.
    let mut sorted_params = query_params.to_vec();
    sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
    let canonical_querystring: String = sorted_params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut headers = vec![
        ("host".to_string(), host.clone()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
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
        "GET\n{}\n{}\n{}\n{}\n{}",
        canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, remote.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key =
        derive_signing_key(&creds.secret_access_key, &date_stamp, &remote.region, "s3");
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    let scheme = scheme_for(remote);
    let full_url = if canonical_querystring.is_empty() {
        format!("{}://{}{}", scheme, host, canonical_uri)
    } else {
        format!("{}://{}{}?{}", scheme, host, canonical_uri, canonical_querystring)
    };

    let mut req_builder = client
        .get(&full_url)
        .header("Authorization", &authorization)
        .header("x-amz-content-sha256", &payload_hash)
        .header("x-amz-date", &amz_date);
    if let Some(ref token) = creds.session_token {
        req_builder = req_builder.header("x-amz-security-token", token);
    }

    let resp = req_builder.send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!(
            "S3 request failed (HTTP {}): {}",
            status,
            body.chars().take(500).collect::<String>()
        );
    }

    Ok(resp.bytes().await?.to_vec())
}

// ============ SigV4 helpers ============

fn s3_host(remote: &RemoteConfig) -> String {
    if let Some(ref endpoint) = remote.endpoint_url {
        endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    } else {
        format!("{}.s3.{}.amazonaws.com", remote.bucket, remote.region)
    }
}

fn scheme_for(remote: &RemoteConfig) -> &'static str {
    match &remote.endpoint_url {
        Some(endpoint) if endpoint.starts_with("http://") => "http",
        _ => "https",
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

/// kDate = HMAC("AWS4" + secret, date); kRegion = HMAC(kDate, region);
/// kService = HMAC(kRegion, service); kSigning = HMAC(kService, "aws4_request")
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986: everything except `A-Z a-z 0-9 - _ . ~`.
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

// ============ XML parsing (minimal, no extra deps) ============

/// Parse a `ListObjectsV2` response: object keys, truncation flag, and
/// continuation token. Directory-marker keys (trailing `/`) are skipped.
fn parse_list_response(xml: &str) -> (Vec<String>, bool, Option<String>) {
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut keys = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];

        if let Some(key) = extract_xml_value(block, "Key") {
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(key);
            }
        }

        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    (keys, is_truncated, next_token)
}

/// Extract the text content of a simple, non-nested XML tag.
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)?;
    let value_start = start + open.len();
    let end = xml[value_start..].find(&close)?;
    Some(xml[value_start..value_start + end].to_string())
}
