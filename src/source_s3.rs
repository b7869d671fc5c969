//! S3 item source.
//!
//! Lists and downloads objects from an S3 bucket using the S3 REST API with
//! AWS Signature V4 authentication. Listing follows `ListObjectsV2`
//! continuation tokens until the bucket is exhausted.
//!
//! With `S3_ENDPOINT_URL` set, requests go to that endpoint with path-style
//! addressing (`{endpoint}/{bucket}/{key}`), which covers MinIO, LocalStack
//! and the GCS XML API interoperability endpoint
//! (`https://storage.googleapis.com` with HMAC keys).
//!
//! Signing uses only pure-Rust dependencies (`hmac`, `sha2`).
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials)

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use crate::config::S3SourceConfig;
use crate::traits::ItemSource;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials used for request signing.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Where requests are sent and how the bucket is addressed.
#[derive(Debug, Clone)]
struct Endpoint {
    scheme: &'static str,
    host: String,
    /// `{host}/{bucket}/{key}` instead of `{bucket}.{host}/{key}`.
    path_style: bool,
}

impl Endpoint {
    fn resolve(bucket: &str, region: &str, endpoint_url: Option<&str>) -> Self {
        match endpoint_url {
            Some(url) => {
                let scheme = if url.starts_with("http://") { "http" } else { "https" };
                let host = url
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                Self {
                    scheme,
                    host,
                    path_style: true,
                }
            }
            None => Self {
                scheme: "https",
                host: format!("{}.s3.{}.amazonaws.com", bucket, region),
                path_style: false,
            },
        }
    }
}

/// An [`ItemSource`] over one S3 bucket (optionally restricted to a key
/// prefix). Item names are full object keys.
pub struct S3Source {
    client: reqwest::Client,
    bucket: String,
    prefix: String,
    region: String,
    endpoint: Endpoint,
    creds: AwsCredentials,
}

impl S3Source {
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        region: impl Into<String>,
        endpoint_url: Option<&str>,
        creds: AwsCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        let bucket = bucket.into();
        let region = region.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: Endpoint::resolve(&bucket, &region, endpoint_url),
            bucket,
            prefix: prefix.into(),
            region,
            creds,
        })
    }

    /// Build from configuration; bucket and credentials are required here.
    pub fn from_config(s3: &S3SourceConfig, timeout: Duration) -> Result<Self> {
        let bucket = s3
            .bucket
            .clone()
            .ok_or_else(|| anyhow!("S3_BUCKET (or GCS_BUCKET_NAME) must be set for SOURCE_KIND=s3"))?;
        let creds = AwsCredentials {
            access_key_id: s3
                .access_key_id
                .clone()
                .context("AWS_ACCESS_KEY_ID environment variable not set")?,
            secret_access_key: s3
                .secret_access_key
                .clone()
                .context("AWS_SECRET_ACCESS_KEY environment variable not set")?,
            session_token: s3.session_token.clone(),
        };
        Self::new(
            bucket,
            s3.prefix.clone(),
            s3.region.clone(),
            s3.endpoint_url.as_deref(),
            creds,
            timeout,
        )
    }

    /// Canonical URI for a bucket-relative path (`""` for the bucket root).
    fn canonical_uri(&self, encoded_key: &str) -> String {
        if self.endpoint.path_style {
            format!("/{}/{}", uri_encode(&self.bucket), encoded_key)
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("/{}", encoded_key)
        }
    }

    /// Build a SigV4-signed GET request.
    fn signed_get(
        &self,
        canonical_uri: &str,
        query: &[(String, String)],
    ) -> Result<reqwest::RequestBuilder> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical query string must be sorted by key.
        let mut sorted = query.to_vec();
        sorted.sort();
        let canonical_querystring: String = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), self.endpoint.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
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

        let uri = if canonical_uri.is_empty() { "/" } else { canonical_uri };
        let canonical_request = format!(
            "GET\n{}\n{}\n{}\n{}\n{}",
            uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        )?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", self.endpoint.scheme, self.endpoint.host, uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req = self
            .client
            .get(url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        Ok(req)
    }
}

#[async_trait]
impl ItemSource for S3Source {
    fn source_tag(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    /// All object keys under the prefix, in listing order. "Directory"
    /// placeholder keys ending in `/` are left out.
    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        let uri = self.canonical_uri("");

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !self.prefix.is_empty() {
                query.push(("prefix".to_string(), self.prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.signed_get(&uri, &query)?.send().await.with_context(|| {
                format!(
                    "Failed to list S3 objects in s3://{}/{}",
                    self.bucket, self.prefix
                )
            })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml_body = resp.text().await?;
            let page = parse_list_objects_response(&xml_body);
            debug!(
                bucket = %self.bucket,
                keys = page.keys.len(),
                truncated = page.is_truncated,
                "listed S3 page"
            );
            keys.extend(page.keys);

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                (true, None) => bail!("S3 listing is truncated but has no continuation token"),
                (false, _) => break,
            }
        }

        Ok(keys)
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let encoded_key = name.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let uri = self.canonical_uri(&encoded_key);

        let resp = self
            .signed_get(&uri, &[])?
            .send()
            .await
            .with_context(|| format!("Failed to get s3://{}/{}", self.bucket, name))?;

        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                name
            );
        }

        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", self.bucket, name))?;
        Ok(bytes.to_vec())
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~` as-is.
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

// ============ XML Parsing ============

/// One page of a `ListObjectsV2` response.
#[derive(Debug, Default)]
struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

fn parse_list_objects_response(xml: &str) -> ListPage {
    let mut page = ListPage {
        is_truncated: extract_xml_value(xml, "IsTruncated").is_some_and(|v| v == "true"),
        next_token: extract_xml_value(xml, "NextContinuationToken").map(|t| xml_unescape(&t)),
        ..ListPage::default()
    };

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];

        if let Some(key) = extract_xml_value(block, "Key").map(|k| xml_unescape(&k)) {
            if !key.is_empty() && !key.ends_with('/') {
                page.keys.push(key);
            }
        }

        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    page
}

/// Text content of the first `<tag>` (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let value_start = xml.find(&open)? + open.len();
    let end = xml[value_start..].find(&close)?;
    Some(xml[value_start..value_start + end].to_string())
}

/// Decode the five predefined entities and numeric character references
/// (`&#13;`, `&#x2F;`). Anything unrecognised is kept as written.
fn xml_unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .and_then(|semi| decode_entity(&rest[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        }
    }

    #[test]
    fn uri_encode_reserved_characters() {
        assert_eq!(uri_encode("a b+c/d"), "a%20b%2Bc%2Fd");
        assert_eq!(uri_encode("Report-1_v2.pdf~"), "Report-1_v2.pdf~");
    }

    #[test]
    fn signing_key_matches_aws_reference() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn parses_list_page() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>library</Name>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok&amp;1</NextContinuationToken>
  <Contents><Key>reports/</Key><Size>0</Size></Contents>
  <Contents><Key>reports/q1.pdf</Key><Size>10</Size></Contents>
  <Contents><Key>R&amp;D.PDF</Key><Size>12</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_objects_response(xml);
        assert!(page.is_truncated);
        assert_eq!(page.next_token.as_deref(), Some("tok&1"));
        assert_eq!(page.keys, vec!["reports/q1.pdf", "R&D.PDF"]);
    }

    #[test]
    fn decodes_numeric_character_references() {
        let xml = "<ListBucketResult><IsTruncated>false</IsTruncated>\
                   <Contents><Key>scan&#13;.pdf</Key></Contents>\
                   <Contents><Key>a&#x2F;b&#X41;.pdf</Key></Contents>\
                   <Contents><Key>&amp;lt; &unknown; &#xZZ; 5 &amp; 6.pdf</Key></Contents>\
                   </ListBucketResult>";
        let page = parse_list_objects_response(xml);
        assert_eq!(
            page.keys,
            vec!["scan\r.pdf", "a/bA.pdf", "&lt; &unknown; &#xZZ; 5 & 6.pdf"]
        );
    }

    #[test]
    fn parses_last_page() {
        let page = parse_list_objects_response(
            "<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>",
        );
        assert!(!page.is_truncated);
        assert!(page.keys.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn aws_endpoint_is_virtual_hosted() {
        let src = S3Source::new("library", "", "eu-west-1", None, creds(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(src.endpoint.host, "library.s3.eu-west-1.amazonaws.com");
        assert_eq!(src.endpoint.scheme, "https");
        assert_eq!(src.canonical_uri(""), "");
        assert_eq!(src.canonical_uri("a/b.pdf"), "/a/b.pdf");
        assert_eq!(src.source_tag(), "s3://library");
    }

    #[test]
    fn custom_endpoint_is_path_style() {
        let src = S3Source::new(
            "library",
            "",
            "auto",
            Some("http://127.0.0.1:9000/"),
            creds(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(src.endpoint.host, "127.0.0.1:9000");
        assert_eq!(src.endpoint.scheme, "http");
        assert_eq!(src.canonical_uri(""), "/library");
        assert_eq!(src.canonical_uri("a/b.pdf"), "/library/a/b.pdf");
    }

    #[test]
    fn from_config_requires_bucket_and_credentials() {
        let mut cfg = S3SourceConfig {
            bucket: None,
            prefix: String::new(),
            region: "us-east-1".into(),
            endpoint_url: None,
            access_key_id: Some("AKID".into()),
            secret_access_key: Some("secret".into()),
            session_token: None,
        };
        assert!(S3Source::from_config(&cfg, Duration::from_secs(5)).is_err());

        cfg.bucket = Some("library".into());
        cfg.secret_access_key = None;
        let err = S3Source::from_config(&cfg, Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(err.to_string().contains("AWS_SECRET_ACCESS_KEY"));
    }
}
