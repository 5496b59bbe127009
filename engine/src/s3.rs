//! S3-compatible store client.
//!
//! Path-style requests over `reqwest`, authenticated with AWS Signature
//! Version 4. Besides the standard ListObjects and CopyObject calls, the
//! client speaks the ECS metadata search extension (`GET /{bucket}?query=`).
//! Response bodies are small XML documents; only the few elements the
//! pipeline needs are extracted.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Method, Url};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::StoreError;
use crate::model::ObjectKey;
use crate::store::{CopyRequest, ListPage, QueryPage, RemoteStore, NO_MORE_PAGES};

type HmacSha256 = Hmac<Sha256>;

const LIST_OPERATION: &str = "ListObjects";
const QUERY_OPERATION: &str = "MetadataQuery";
const COPY_OPERATION: &str = "CopyObject";

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Base URL, e.g. `https://ecs.example.com:9021`
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Region used in the signing scope; ECS accepts any value
    pub region: String,
    pub request_timeout: Duration,
}

/// `RemoteStore` backed by an S3-compatible HTTP endpoint.
pub struct S3Client {
    config: S3Config,
    origin: String,
    host: String,
    http: reqwest::Client,
}

impl S3Client {
    pub fn new(config: S3Config) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidEndpoint {
            endpoint: config.endpoint.clone(),
            reason: reason.to_string(),
        };

        let url = Url::parse(&config.endpoint).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid("scheme must be http or https"));
        }
        let host_name = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host_name, port),
            None => host_name.to_string(),
        };
        let origin = format!("{}://{}", url.scheme(), host);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| StoreError::Transport {
                operation: "connect",
                source,
            })?;

        Ok(S3Client {
            config,
            origin,
            host,
            http,
        })
    }

    /// Full request URL for `uri` and an already encoded query string.
    ///
    /// `Url` resolves `.` and `..` path segments (also in their percent-encoded
    /// forms), so a key containing them would be sent to another path than
    /// the one signed. Such paths are refused.
    fn request_url(&self, operation: &'static str, uri: &str, query: &str) -> Result<Url, StoreError> {
        let raw = if query.is_empty() {
            format!("{}{}", self.origin, uri)
        } else {
            format!("{}{}?{}", self.origin, uri, query)
        };
        let url = Url::parse(&raw).map_err(|e| StoreError::MalformedRequest {
            operation,
            path: uri.to_string(),
            reason: e.to_string(),
        })?;
        if url.path() != uri {
            return Err(StoreError::MalformedRequest {
                operation,
                path: uri.to_string(),
                reason: format!("path would be sent as '{}'", url.path()),
            });
        }
        Ok(url)
    }

    /// Send a signed request and return the response body.
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        uri: &str,
        params: &[(&str, &str)],
        extra_headers: &[(&str, &str)],
    ) -> Result<String, StoreError> {
        let query = canonical_query(params);
        let url = self.request_url(operation, uri, &query)?;

        let now = Utc::now();
        let payload_hash = hex::encode(Sha256::digest(b""));
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.host.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert(
            "x-amz-date".to_string(),
            now.format("%Y%m%dT%H%M%SZ").to_string(),
        );
        for (name, value) in extra_headers {
            headers.insert(name.to_lowercase(), value.to_string());
        }

        let canonical = CanonicalRequest {
            method: method.as_str(),
            uri,
            query: &query,
            headers: &headers,
            payload_hash: &payload_hash,
        };
        let authorization = sign_v4(
            &self.config.access_key,
            &self.config.secret_key,
            &self.config.region,
            &canonical,
            now,
        );

        trace!(operation, %url, "sending request");
        let mut request = self.http.request(method, url);
        for (name, value) in &headers {
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        request = request.header("authorization", authorization);

        let response = request
            .send()
            .await
            .map_err(|source| StoreError::Transport { operation, source })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| StoreError::Transport { operation, source })?;

        // CopyObject can fail after the 200 status line has been sent; the
        // failure is then only visible in the body.
        if !status.is_success() || body.contains("<Error>") {
            return Err(parse_error(operation, status.as_u16(), &body));
        }

        Ok(body)
    }
}

#[async_trait]
impl RemoteStore for S3Client {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        max_keys: u32,
    ) -> Result<ListPage, StoreError> {
        let max_keys = max_keys.to_string();
        let mut params = vec![("max-keys", max_keys.as_str())];
        if !prefix.is_empty() {
            params.push(("prefix", prefix));
        }
        if !marker.is_empty() {
            params.push(("marker", marker));
        }

        let body = self
            .send(LIST_OPERATION, Method::GET, &bucket_path(bucket), &params, &[])
            .await?;
        parse_list_objects(&body)
    }

    async fn query(
        &self,
        bucket: &str,
        query: &str,
        marker: &str,
        max_keys: u32,
    ) -> Result<QueryPage, StoreError> {
        let max_keys = max_keys.to_string();
        let mut params = vec![("query", query), ("max-keys", max_keys.as_str())];
        if !marker.is_empty() {
            params.push(("marker", marker));
        }

        let body = self
            .send(QUERY_OPERATION, Method::GET, &bucket_path(bucket), &params, &[])
            .await?;
        parse_query_result(&body)
    }

    async fn copy_object(&self, request: &CopyRequest) -> Result<(), StoreError> {
        let copy_source = format!(
            "/{}/{}",
            request.source_bucket,
            encode_key(&request.source_key)
        );
        let headers = [
            ("x-amz-copy-source", copy_source.as_str()),
            ("x-amz-acl", request.acl.as_header()),
            ("x-amz-metadata-directive", request.directive.as_header()),
        ];

        self.send(
            COPY_OPERATION,
            Method::PUT,
            &object_path(&request.target_bucket, &request.target_key),
            &[],
            &headers,
        )
        .await?;
        Ok(())
    }
}

/// The pieces of a request covered by the signature.
struct CanonicalRequest<'a> {
    method: &'a str,
    uri: &'a str,
    query: &'a str,
    /// Lowercase names, sorted
    headers: &'a BTreeMap<String, String>,
    payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    fn render(&self) -> String {
        let canonical_headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.uri,
            self.query,
            canonical_headers,
            self.signed_headers(),
            self.payload_hash
        )
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Build the `Authorization` header value for `request`.
fn sign_v4(
    access_key: &str,
    secret_key: &str,
    region: &str,
    request: &CanonicalRequest<'_>,
    now: DateTime<Utc>,
) -> String {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let scope = format!("{}/{}/s3/aws4_request", date_stamp, region);

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(request.render().as_bytes()))
    );

    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
        access_key,
        scope,
        request.signed_headers(),
        signature
    )
}

/// Sorted, percent-encoded query string.
fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode every path segment of a key, keeping the slashes.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn bucket_path(bucket: &str) -> String {
    format!("/{}", urlencoding::encode(bucket))
}

fn object_path(bucket: &str, key: &str) -> String {
    format!("/{}/{}", urlencoding::encode(bucket), encode_key(key))
}

fn malformed(operation: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::MalformedResponse {
        operation,
        reason: reason.into(),
    }
}

/// Walk the elements of an XML document.
///
/// `visit` is called when an element closes, with the local name of its
/// parent (`None` for the root), its own local name and its unescaped text.
/// The text buffer may be taken. Returns the local name of the root element.
fn walk_xml<F>(operation: &'static str, body: &str, mut visit: F) -> Result<Option<Vec<u8>>, StoreError>
where
    F: FnMut(Option<&[u8]>, &[u8], &mut String),
{
    let mut reader = Reader::from_str(body);
    let mut open: Vec<Vec<u8>> = Vec::new();
    let mut root = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                root.get_or_insert_with(|| name.clone());
                open.push(name);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name().as_ref().to_vec();
                root.get_or_insert_with(|| name.clone());
                text.clear();
                visit(open.last().map(Vec::as_slice), &name, &mut text);
            }
            Ok(Event::Text(e)) => {
                let unescaped = e.unescape().map_err(|err| malformed(operation, err.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::End(_)) => {
                if let Some(name) = open.pop() {
                    visit(open.last().map(Vec::as_slice), &name, &mut text);
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(malformed(operation, err.to_string())),
        }
    }

    Ok(root)
}

fn parse_list_objects(body: &str) -> Result<ListPage, StoreError> {
    let mut keys = Vec::new();
    let mut is_truncated = None;
    let mut next_marker = None;

    let root = walk_xml(LIST_OPERATION, body, |parent, name, text| match (parent, name) {
        (Some(b"Contents"), b"Key") => keys.push(ObjectKey::from(std::mem::take(text))),
        (Some(b"ListBucketResult"), b"IsTruncated") => is_truncated = Some(text.trim().to_string()),
        (Some(b"ListBucketResult"), b"NextMarker") => next_marker = Some(std::mem::take(text)),
        _ => {}
    })?;

    if root.as_deref() != Some(&b"ListBucketResult"[..]) {
        return Err(malformed(LIST_OPERATION, "missing ListBucketResult element"));
    }

    let is_truncated = match is_truncated.as_deref() {
        Some("true") => true,
        Some("false") | None => false,
        Some(other) => {
            return Err(malformed(
                LIST_OPERATION,
                format!("unexpected IsTruncated value '{}'", other),
            ))
        }
    };

    Ok(ListPage {
        keys,
        is_truncated,
        next_marker: next_marker.filter(|m| !m.is_empty()),
    })
}

fn parse_query_result(body: &str) -> Result<QueryPage, StoreError> {
    let mut matches = Vec::new();
    let mut next_marker = None;

    let root = walk_xml(QUERY_OPERATION, body, |parent, name, text| match (parent, name) {
        (Some(b"object"), b"objectName") => matches.push(ObjectKey::from(std::mem::take(text))),
        (Some(b"BucketQueryResult"), b"NextMarker") => next_marker = Some(std::mem::take(text)),
        _ => {}
    })?;

    if root.as_deref() != Some(&b"BucketQueryResult"[..]) {
        return Err(malformed(QUERY_OPERATION, "missing BucketQueryResult element"));
    }

    // Without a marker there is nothing to resume from: treat it as the end.
    let next_marker = next_marker
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| NO_MORE_PAGES.to_string());

    Ok(QueryPage {
        matches,
        next_marker,
    })
}

fn parse_error(operation: &'static str, status: u16, body: &str) -> StoreError {
    let mut code = None;
    let mut message = None;

    // Proxies answer with HTML or nothing at all; keep whatever was found.
    let _ = walk_xml(operation, body, |parent, name, text| match (parent, name) {
        (Some(b"Error"), b"Code") => code = Some(text.trim().to_string()),
        (Some(b"Error"), b"Message") => message = Some(text.trim().to_string()),
        _ => {}
    });

    StoreError::Service {
        operation,
        status,
        code: code.filter(|c| !c.is_empty()).unwrap_or_else(|| "Unknown".to_string()),
        message: message.unwrap_or_default(),
    }
}
