use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::{Body, Client};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_METHOD: &str = "POST";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub url: String,
    pub file: PathBuf,
    /// Empty means `POST`.
    pub method: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub status: u16,
    /// Response body when it decoded as JSON.
    pub data: Option<serde_json::Value>,
}

pub trait Uploader {
    fn upload(&self, opts: &UploadOptions) -> Result<UploadResult>;
}

/// Streams a file as the request body over a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
}

impl HttpUploader {
    /// No request timeout; callers bound the whole operation if they need one.
    pub fn new() -> Result<Self> {
        Self::with_timeout(None)
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn parse_method(method: &str) -> Result<Method> {
    let method = if method.is_empty() {
        DEFAULT_METHOD
    } else {
        method
    };
    Method::from_bytes(method.as_bytes()).map_err(|_| Error::InvalidMethod {
        method: method.to_string(),
    })
}

fn build_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|_| Error::InvalidHeader { name: k.clone() })?;
        let value =
            HeaderValue::from_str(v).map_err(|_| Error::InvalidHeader { name: k.clone() })?;
        map.insert(name, value);
    }
    Ok(map)
}

impl Uploader for HttpUploader {
    fn upload(&self, opts: &UploadOptions) -> Result<UploadResult> {
        let method = parse_method(&opts.method)?;
        let headers = build_headers(&opts.headers)?;
        let file = File::open(&opts.file).map_err(|e| Error::io(&opts.file, e))?;

        debug!(method = %method, file = %opts.file.display(), "uploading archive");
        let resp = self
            .client
            .request(method.clone(), opts.url.as_str())
            .headers(headers)
            .body(Body::from(file))
            .send()?;

        let status = resp.status();
        let body = resp.bytes()?;
        let data = if body.is_empty() {
            None
        } else {
            serde_json::from_slice(&body).ok()
        };

        if !status.is_success() {
            return Err(Error::UploadStatus {
                status: status.to_string(),
            });
        }

        info!(method = %method, status = status.as_u16(), "archive uploaded");
        Ok(UploadResult {
            status: status.as_u16(),
            data,
        })
    }
}
