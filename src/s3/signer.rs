//! AWS Signature Version 4
//!
//! - [Signature Version 4 signing process](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)
//!
//! Signing is a pure function of the resolved request, the keys, the region,
//! the timestamp and the payload-hash token. Callers attach `x-amz-date` and
//! `x-amz-content-sha256` before signing so both are covered by the signature.

use super::addressing::{uri_escape, SignedRequestOptions};
use super::S3ClientError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Signing algorithm identifier
pub const SIGN_V4_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Payload-hash token for bodies that are not hashed up front
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// SHA-256 of the empty payload
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Service name used in the credential scope
pub const S3_SERVICE: &str = "s3";

/// Longest validity of a presigned URL (7 days)
pub const PRESIGN_EXPIRY_MAX: u64 = 604_800;

/// Headers never covered by the signature
const IGNORED_HEADERS: [&str; 4] = ["authorization", "content-length", "content-type", "user-agent"];

/// Hex encoded SHA256 hash.
pub fn hex_sha256(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// HMAC with SHA256 hash.
pub fn hmac_sha256(key: &[u8], content: &[u8]) -> Result<Vec<u8>, S3ClientError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| S3ClientError::SigningError(e.to_string()))?;
    mac.update(content);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `YYYYMMDDTHHmmssZ`, the `x-amz-date` format
pub fn amz_date(date: DateTime<Utc>) -> String {
    date.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `YYYYMMDD`, the date part of the credential scope
pub fn short_date(date: DateTime<Utc>) -> String {
    date.format("%Y%m%d").to_string()
}

/// Whether `token` is a well-formed hex SHA-256 digest
pub fn is_sha256_hex(token: &str) -> bool {
    token.len() == 64 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

fn scope(date: DateTime<Utc>, region: &str) -> String {
    format!("{}/{}/{}/aws4_request", short_date(date), region, S3_SERVICE)
}

/// Sorted names of the headers covered by the signature
fn signed_headers(headers: &BTreeMap<String, String>) -> Vec<&str> {
    headers
        .keys()
        .map(String::as_str)
        .filter(|name| !IGNORED_HEADERS.contains(name))
        .collect()
}

fn canonical_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<&str> = query.split('&').collect();
    params.sort_unstable();
    params
        .into_iter()
        .map(|param| {
            if param.contains('=') {
                param.to_string()
            } else {
                format!("{}=", param)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn collapse_spaces(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_space = false;
    for c in value.chars() {
        if c == ' ' {
            if !previous_space {
                out.push(c);
            }
            previous_space = true;
        } else {
            out.push(c);
            previous_space = false;
        }
    }
    out
}

fn canonical_request(
    method: &str,
    path: &str,
    headers: &BTreeMap<String, String>,
    signed: &[&str],
    hashed_payload: &str,
) -> String {
    let (resource, query) = path.split_once('?').unwrap_or((path, ""));

    let canonical_headers: String = signed
        .iter()
        .map(|name| format!("{}:{}\n", name, collapse_spaces(headers[*name].trim())))
        .collect();

    [
        method.to_uppercase(),
        resource.to_string(),
        canonical_query(query),
        canonical_headers,
        signed.join(";"),
        hashed_payload.to_string(),
    ]
    .join("\n")
}

fn string_to_sign(canonical_request: &str, date: DateTime<Utc>, region: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        SIGN_V4_ALGORITHM,
        amz_date(date),
        scope(date, region),
        hex_sha256(canonical_request.as_bytes())
    )
}

fn signing_key(secret_key: &str, date: DateTime<Utc>, region: &str) -> Result<Vec<u8>, S3ClientError> {
    let secret = format!("AWS4{}", secret_key);
    let date_key = hmac_sha256(secret.as_bytes(), short_date(date).as_bytes())?;
    let region_key = hmac_sha256(&date_key, region.as_bytes())?;
    let service_key = hmac_sha256(&region_key, S3_SERVICE.as_bytes())?;
    hmac_sha256(&service_key, b"aws4_request")
}

fn check_keys(access_key: &str, secret_key: &str) -> Result<(), S3ClientError> {
    if access_key.is_empty() {
        return Err(S3ClientError::SigningError("access key is required".into()));
    }
    if secret_key.is_empty() {
        return Err(S3ClientError::SigningError("secret key is required".into()));
    }
    Ok(())
}

/// Compute the `authorization` header value of a request
///
/// `x-amz-date` and `x-amz-content-sha256` must already be present on
/// `options`; `payload_hash` is either a hex SHA-256 digest or
/// [`UNSIGNED_PAYLOAD`].
pub fn sign_v4(
    options: &SignedRequestOptions,
    access_key: &str,
    secret_key: &str,
    region: &str,
    date: DateTime<Utc>,
    payload_hash: &str,
) -> Result<String, S3ClientError> {
    check_keys(access_key, secret_key)?;

    let signed = signed_headers(&options.headers);
    let creq = canonical_request(
        options.method.as_str(),
        &options.path,
        &options.headers,
        &signed,
        payload_hash,
    );
    tracing::trace!(canonical_request = %creq, "calculated canonical request");

    let sts = string_to_sign(&creq, date, region);
    let key = signing_key(secret_key, date, region)?;
    let signature = hex::encode(hmac_sha256(&key, sts.as_bytes())?);

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        SIGN_V4_ALGORITHM,
        access_key,
        scope(date, region),
        signed.join(";"),
        signature
    ))
}

/// Build a presigned URL for a request
///
/// The signature travels in the query string and only the `host` header is
/// signed; the payload is always [`UNSIGNED_PAYLOAD`].
pub fn presign_v4(
    options: &SignedRequestOptions,
    access_key: &str,
    secret_key: &str,
    session_token: Option<&str>,
    region: &str,
    date: DateTime<Utc>,
    expires: u64,
) -> Result<String, S3ClientError> {
    check_keys(access_key, secret_key)?;
    if expires < 1 {
        return Err(S3ClientError::InvalidArgument(
            "expires must be at least 1 second".into(),
        ));
    }
    if expires > PRESIGN_EXPIRY_MAX {
        return Err(S3ClientError::InvalidArgument(format!(
            "expires must be less than {} seconds",
            PRESIGN_EXPIRY_MAX
        )));
    }

    let signed = signed_headers(&options.headers);
    let credential = format!("{}/{}", access_key, scope(date, region));

    let mut presign_query = vec![
        format!("X-Amz-Algorithm={}", SIGN_V4_ALGORITHM),
        format!("X-Amz-Credential={}", uri_escape(&credential)),
        format!("X-Amz-Date={}", amz_date(date)),
        format!("X-Amz-Expires={}", expires),
        format!("X-Amz-SignedHeaders={}", uri_escape(&signed.join(";"))),
    ];
    if let Some(token) = session_token.filter(|t| !t.is_empty()) {
        presign_query.push(format!("X-Amz-Security-Token={}", uri_escape(token)));
    }

    let resource = options.resource();
    let query = match options.query_string() {
        "" => presign_query.join("&"),
        existing => format!("{}&{}", existing, presign_query.join("&")),
    };
    let path = format!("{}?{}", resource, query);

    let creq = canonical_request(
        options.method.as_str(),
        &path,
        &options.headers,
        &signed,
        UNSIGNED_PAYLOAD,
    );
    let sts = string_to_sign(&creq, date, region);
    let key = signing_key(secret_key, date, region)?;
    let signature = hex::encode(hmac_sha256(&key, sts.as_bytes())?);

    let host = options
        .headers
        .get("host")
        .cloned()
        .unwrap_or_else(|| options.host.clone());

    Ok(format!(
        "{}://{}{}&X-Amz-Signature={}",
        options.scheme, host, path, signature
    ))
}
